//! Execution context handed to every unit action.
//!
//! The context is the only way an action touches shared run state: it reads
//! fields published by its dependencies and records recoverable issues.
//! Output goes back to the scheduler as [`Fields`] and is published only if
//! the action succeeds.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::domain::Category;
use crate::probes::ProbeError;

use super::store::{Fields, ResultStore};

/// Fatal, whole-unit errors. Anything returned here fails the unit.
#[derive(Debug, Clone, Error)]
pub enum UnitError {
    #[error("{0}")]
    Fatal(String),

    #[error("probe '{what}' failed: {message}")]
    Probe { what: String, message: String },

    #[error("read of field '{field}' not owned by a declared dependency")]
    UndeclaredRead { field: String },

    #[error("publication of field '{field}' not owned by this unit")]
    UndeclaredField { field: String },

    #[error("field '{field}' could not be serialized: {message}")]
    Serialize { field: String, message: String },

    #[error("field '{field}' has an unexpected shape: {message}")]
    Shape { field: String, message: String },

    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

impl UnitError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }
}

/// The action a collection unit runs
#[async_trait]
pub trait UnitAction: Send + Sync {
    async fn run(&self, ctx: UnitContext) -> Result<Fields, UnitError>;
}

#[async_trait]
impl<F, Fut> UnitAction for F
where
    F: Fn(UnitContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Fields, UnitError>> + Send + 'static,
{
    async fn run(&self, ctx: UnitContext) -> Result<Fields, UnitError> {
        (self)(ctx).await
    }
}

/// Per-unit view of the run's Result Store
#[derive(Clone)]
pub struct UnitContext {
    unit: Arc<str>,
    category: Option<Category>,
    store: Arc<ResultStore>,
    readable: Arc<HashSet<String>>,
}

impl UnitContext {
    pub(crate) fn new(
        unit: Arc<str>,
        category: Option<Category>,
        store: Arc<ResultStore>,
        readable: Arc<HashSet<String>>,
    ) -> Self {
        Self {
            unit,
            category,
            store,
            readable,
        }
    }

    /// Name of the unit this context belongs to
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn category(&self) -> Option<Category> {
        self.category
    }

    /// Read a field owned by one of this unit's dependencies.
    ///
    /// Dependencies are `Done` before the action starts, so `None` means
    /// the owner did not publish the field.
    pub fn read(&self, field: &str) -> Result<Option<Value>, UnitError> {
        if !self.readable.contains(field) {
            return Err(UnitError::UndeclaredRead {
                field: field.to_string(),
            });
        }
        Ok(self.store.get(field).cloned())
    }

    /// Typed form of [`UnitContext::read`]
    pub fn read_as<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>, UnitError> {
        match self.read(field)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| UnitError::Shape {
                    field: field.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Record a recoverable problem and mark this unit's category incomplete
    pub fn issue(&self, message: impl Into<String>) {
        self.store.issues().push(message);
        if let Some(category) = self.category {
            self.store.clear_category(category);
        }
    }

    /// Turn a probe result into the unit's error policy.
    ///
    /// `Unavailable` becomes an issue and `Ok(None)`; `Fatal` fails the unit.
    pub fn recover<T>(&self, what: &str, result: Result<T, ProbeError>) -> Result<Option<T>, UnitError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(ProbeError::Unavailable(reason)) => {
                self.issue(format!("{}: {}", what, reason));
                Ok(None)
            }
            Err(ProbeError::Fatal(message)) => Err(UnitError::Probe {
                what: what.to_string(),
                message,
            }),
        }
    }
}

impl std::fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitContext")
            .field("unit", &self.unit)
            .field("category", &self.category)
            .field("readable", &self.readable.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::{UnitRegistry, UnitSpec};
    use serde_json::json;

    fn context_for(readable: &[&str]) -> (UnitContext, Arc<ResultStore>) {
        let mut registry = UnitRegistry::new();
        registry
            .register(
                UnitSpec::new("Main", |_ctx: UnitContext| async { Ok(Fields::new()) })
                    .owns(["Username", "Hostname"]),
            )
            .unwrap();
        registry
            .register(
                UnitSpec::new("Sec", |_ctx: UnitContext| async { Ok(Fields::new()) })
                    .category(Category::Security)
                    .owns(["AvList"]),
            )
            .unwrap();
        let registry = registry.build().unwrap();
        let store = Arc::new(ResultStore::for_registry(&registry));
        store.publish("Main", Fields::new().with("Username", "alice"));

        let ctx = UnitContext::new(
            Arc::from("Sec"),
            Some(Category::Security),
            store.clone(),
            Arc::new(readable.iter().map(|s| s.to_string()).collect()),
        );
        (ctx, store)
    }

    #[test]
    fn test_read_declared_dependency_field() {
        let (ctx, _store) = context_for(&["Username", "Hostname"]);
        assert_eq!(ctx.read("Username").unwrap(), Some(json!("alice")));
        assert_eq!(ctx.read("Hostname").unwrap(), None);
        assert_eq!(ctx.read_as::<String>("Username").unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn test_read_undeclared_field_rejected() {
        let (ctx, _store) = context_for(&[]);
        assert!(matches!(
            ctx.read("Username"),
            Err(UnitError::UndeclaredRead { .. })
        ));
    }

    #[test]
    fn test_recover_policies() {
        let (ctx, store) = context_for(&[]);

        let ok = ctx.recover("av", Ok::<_, ProbeError>(vec!["x"])).unwrap();
        assert_eq!(ok, Some(vec!["x"]));
        assert!(store.issues().is_empty());

        let missing = ctx
            .recover::<u32>("firewall", Err(ProbeError::Unavailable("no wmi".into())))
            .unwrap();
        assert_eq!(missing, None);
        assert_eq!(store.issues().snapshot(), vec!["firewall: no wmi".to_string()]);

        store.settle_category(Category::Security, true);
        assert!(!store.category_success(Category::Security));

        let fatal = ctx.recover::<u32>("tpm", Err(ProbeError::Fatal("boom".into())));
        assert!(matches!(fatal, Err(UnitError::Probe { .. })));
    }
}
