//! Task registry: the static table of collection units.
//!
//! Units are registered with a builder ([`UnitSpec`]) and frozen into an
//! immutable [`Registry`] by [`UnitRegistry::build`], which rejects every
//! configuration error before anything is scheduled.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::domain::Category;

use super::context::{UnitAction, UnitContext, UnitError};
use super::store::Fields;

/// Configuration errors detected at registration or build time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Unit name cannot be empty")]
    EmptyName,

    #[error("Unit '{0}' is registered more than once")]
    DuplicateUnit(String),

    #[error("Unit '{unit}' depends on unknown unit '{dependency}'")]
    UnknownDependency { unit: String, dependency: String },

    #[error("Unit '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Field '{field}' is declared by both '{first}' and '{second}'")]
    DuplicateField {
        field: String,
        first: String,
        second: String,
    },
}

/// Builder for one collection unit
pub struct UnitSpec {
    name: String,
    action: Arc<dyn UnitAction>,
    dependencies: Vec<String>,
    non_blocking: bool,
    category: Option<Category>,
    fields: Vec<String>,
    timeout: Option<Duration>,
}

impl UnitSpec {
    /// Create a unit from an async closure
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(UnitContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Fields, UnitError>> + Send + 'static,
    {
        Self::with_action(name, Arc::new(action))
    }

    /// Create a unit from a shared action object
    pub fn with_action(name: impl Into<String>, action: Arc<dyn UnitAction>) -> Self {
        Self {
            name: name.into(),
            action,
            dependencies: Vec::new(),
            non_blocking: false,
            category: None,
            fields: Vec::new(),
            timeout: None,
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Overall completion does not wait for this unit
    pub fn non_blocking(mut self) -> Self {
        self.non_blocking = true;
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Fields this unit is the sole writer of
    pub fn owns<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Override the scheduler's default unit timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A validated, immutable collection unit
pub struct UnitDef {
    name: Arc<str>,
    action: Arc<dyn UnitAction>,
    dependencies: Vec<String>,
    non_blocking: bool,
    category: Option<Category>,
    fields: Vec<String>,
    timeout: Option<Duration>,
    /// Fields owned by this unit's transitive dependencies
    readable: Arc<HashSet<String>>,
}

impl UnitDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        self.name.clone()
    }

    pub(crate) fn action(&self) -> Arc<dyn UnitAction> {
        self.action.clone()
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn is_non_blocking(&self) -> bool {
        self.non_blocking
    }

    pub fn category(&self) -> Option<Category> {
        self.category
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn readable(&self) -> Arc<HashSet<String>> {
        self.readable.clone()
    }
}

impl std::fmt::Debug for UnitDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitDef")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("non_blocking", &self.non_blocking)
            .field("category", &self.category)
            .field("fields", &self.fields)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Mutable registration table
#[derive(Default)]
pub struct UnitRegistry {
    units: Vec<UnitSpec>,
    index: HashMap<String, usize>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit. Duplicate names are rejected immediately.
    pub fn register(&mut self, spec: UnitSpec) -> Result<&mut Self, RegistryError> {
        if spec.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.index.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateUnit(spec.name));
        }

        self.index.insert(spec.name.clone(), self.units.len());
        self.units.push(spec);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Validate the table and freeze it
    pub fn build(self) -> Result<Registry, RegistryError> {
        let mut owners: HashMap<&str, &str> = HashMap::new();

        for spec in &self.units {
            for dependency in &spec.dependencies {
                if dependency == &spec.name {
                    return Err(RegistryError::SelfDependency(spec.name.clone()));
                }
                if !self.index.contains_key(dependency) {
                    return Err(RegistryError::UnknownDependency {
                        unit: spec.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }

            for field in &spec.fields {
                if let Some(first) = owners.insert(field.as_str(), spec.name.as_str()) {
                    if first != spec.name {
                        return Err(RegistryError::DuplicateField {
                            field: field.clone(),
                            first: first.to_string(),
                            second: spec.name.clone(),
                        });
                    }
                }
            }
        }

        let order = self.topological_order()?;

        // Readable fields accumulate in dependency order
        let mut readable: Vec<HashSet<String>> = vec![HashSet::new(); self.units.len()];
        for &idx in &order {
            let mut fields = HashSet::new();
            for dependency in &self.units[idx].dependencies {
                let dep_idx = self.index[dependency];
                fields.extend(self.units[dep_idx].fields.iter().cloned());
                fields.extend(readable[dep_idx].iter().cloned());
            }
            readable[idx] = fields;
        }

        let units = self
            .units
            .into_iter()
            .zip(readable)
            .map(|(spec, readable)| {
                let mut seen = HashSet::new();
                let mut dependencies = spec.dependencies;
                dependencies.retain(|d| seen.insert(d.clone()));
                UnitDef {
                    name: Arc::from(spec.name),
                    action: spec.action,
                    dependencies,
                    non_blocking: spec.non_blocking,
                    category: spec.category,
                    fields: spec.fields,
                    timeout: spec.timeout,
                    readable: Arc::new(readable),
                }
            })
            .collect();

        Ok(Registry {
            inner: Arc::new(RegistryInner {
                units,
                index: self.index,
                order,
            }),
        })
    }

    /// Dependencies-first order, or the first cycle found
    fn topological_order(&self) -> Result<Vec<usize>, RegistryError> {
        let mut order = Vec::with_capacity(self.units.len());
        let mut visited = vec![false; self.units.len()];
        let mut stack: Vec<usize> = Vec::new();

        for idx in 0..self.units.len() {
            self.visit(idx, &mut visited, &mut stack, &mut order)?;
        }

        Ok(order)
    }

    fn visit(
        &self,
        idx: usize,
        visited: &mut [bool],
        stack: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), RegistryError> {
        if let Some(pos) = stack.iter().position(|&i| i == idx) {
            let mut cycle: Vec<String> = stack[pos..]
                .iter()
                .map(|&i| self.units[i].name.clone())
                .collect();
            cycle.push(self.units[idx].name.clone());
            return Err(RegistryError::Cycle(cycle));
        }
        if visited[idx] {
            return Ok(());
        }

        stack.push(idx);
        for dependency in &self.units[idx].dependencies {
            self.visit(self.index[dependency], visited, stack, order)?;
        }
        stack.pop();

        visited[idx] = true;
        order.push(idx);
        Ok(())
    }
}

struct RegistryInner {
    units: Vec<UnitDef>,
    index: HashMap<String, usize>,
    order: Vec<usize>,
}

/// Validated unit table, cheap to clone
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Units in registration order
    pub fn units(&self) -> &[UnitDef] {
        &self.inner.units
    }

    pub fn get(&self, name: &str) -> Option<&UnitDef> {
        self.inner.index.get(name).map(|&idx| &self.inner.units[idx])
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
        self.inner.index.get(name).copied()
    }

    /// Units ordered so that every unit comes after its dependencies
    pub fn dependency_order(&self) -> impl Iterator<Item = &UnitDef> {
        self.inner.order.iter().map(|&idx| &self.inner.units[idx])
    }

    pub fn len(&self) -> usize {
        self.inner.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.units.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.units()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str) -> UnitSpec {
        UnitSpec::new(name, |_ctx: UnitContext| async { Ok(Fields::new()) })
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = UnitRegistry::new();
        registry.register(unit("A")).unwrap();

        let err = registry.register(unit("A")).err().unwrap();
        assert_eq!(err, RegistryError::DuplicateUnit("A".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut registry = UnitRegistry::new();
        registry.register(unit("A").depends_on(["Missing"])).unwrap();

        assert_eq!(
            registry.build().err().unwrap(),
            RegistryError::UnknownDependency {
                unit: "A".to_string(),
                dependency: "Missing".to_string(),
            }
        );
    }

    #[test]
    fn test_forward_reference_allowed() {
        let mut registry = UnitRegistry::new();
        registry.register(unit("B").depends_on(["A"])).unwrap();
        registry.register(unit("A")).unwrap();

        let registry = registry.build().unwrap();
        let order: Vec<&str> = registry.dependency_order().map(|u| u.name()).collect();
        assert_eq!(order, vec!["A", "B"]);
    }

    #[test]
    fn test_cycle_detected() {
        let mut registry = UnitRegistry::new();
        registry.register(unit("A").depends_on(["C"])).unwrap();
        registry.register(unit("B").depends_on(["A"])).unwrap();
        registry.register(unit("C").depends_on(["B"])).unwrap();

        match registry.build() {
            Err(RegistryError::Cycle(path)) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("Expected cycle, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut registry = UnitRegistry::new();
        registry.register(unit("A").depends_on(["A"])).unwrap();
        assert_eq!(
            registry.build().err().unwrap(),
            RegistryError::SelfDependency("A".to_string())
        );
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut registry = UnitRegistry::new();
        registry.register(unit("A").owns(["Cpu"])).unwrap();
        registry.register(unit("B").owns(["Cpu"])).unwrap();

        assert!(matches!(
            registry.build(),
            Err(RegistryError::DuplicateField { .. })
        ));
    }

    #[test]
    fn test_readable_fields_are_transitive() {
        let mut registry = UnitRegistry::new();
        registry.register(unit("A").owns(["a"])).unwrap();
        registry.register(unit("B").owns(["b"]).depends_on(["A"])).unwrap();
        registry.register(unit("C").owns(["c"]).depends_on(["B"])).unwrap();
        let registry = registry.build().unwrap();

        let readable = registry.get("C").unwrap().readable();
        assert!(readable.contains("a"));
        assert!(readable.contains("b"));
        assert!(!readable.contains("c"));
        assert!(registry.get("A").unwrap().readable().is_empty());
    }
}
