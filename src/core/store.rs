//! Shared Result Store for one run.
//!
//! Every field is declared by exactly one unit at registration time and
//! backed by a write-once cell, so publication needs no store-wide lock.
//! The only shared mutable container is the [`Issues`] list, guarded by a
//! single append lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::domain::Category;

use super::context::UnitError;
use super::registry::Registry;

/// Fields staged by a unit action, published atomically when it is `Done`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(BTreeMap<String, Value>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Fields::insert_value`]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert_value(name, value);
        self
    }

    /// Stage a raw JSON value
    pub fn insert_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Stage any serializable value
    pub fn insert<T: Serialize>(&mut self, name: &str, value: &T) -> Result<(), UnitError> {
        let value = serde_json::to_value(value).map_err(|e| UnitError::Serialize {
            field: name.to_string(),
            message: e.to_string(),
        })?;
        self.0.insert(name.to_string(), value);
        Ok(())
    }

    /// Stage a value only if present; absent values stay unpublished
    pub fn insert_some<T: Serialize>(
        &mut self,
        name: &str,
        value: Option<&T>,
    ) -> Result<(), UnitError> {
        match value {
            Some(value) => self.insert(name, value),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Append-only list of recoverable problems
#[derive(Debug, Default)]
pub struct Issues {
    entries: Mutex<Vec<String>>,
}

impl Issues {
    pub fn push(&self, issue: impl Into<String>) {
        let issue = issue.into();
        warn!(%issue, "Issue recorded");
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(issue);
    }

    /// Copy of the entries appended so far, in append order
    pub fn snapshot(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct FieldSlot {
    owner: String,
    value: OnceLock<Value>,
}

/// Write-success bookkeeping for one category
#[derive(Debug)]
struct CategoryFlag {
    registered: usize,
    pending: AtomicUsize,
    clean: AtomicBool,
}

/// Result Store owned by one scheduled run
#[derive(Debug)]
pub struct ResultStore {
    slots: HashMap<String, FieldSlot>,
    categories: HashMap<Category, CategoryFlag>,
    issues: Issues,
}

impl ResultStore {
    /// Build an empty store with one slot per declared field
    pub fn for_registry(registry: &Registry) -> Self {
        let mut slots = HashMap::new();
        let mut counts: HashMap<Category, usize> = HashMap::new();

        for unit in registry.units() {
            for field in unit.fields() {
                slots.insert(
                    field.clone(),
                    FieldSlot {
                        owner: unit.name().to_string(),
                        value: OnceLock::new(),
                    },
                );
            }
            if let Some(category) = unit.category() {
                *counts.entry(category).or_default() += 1;
            }
        }

        let categories = Category::ALL
            .iter()
            .map(|&category| {
                let registered = counts.get(&category).copied().unwrap_or(0);
                (
                    category,
                    CategoryFlag {
                        registered,
                        pending: AtomicUsize::new(registered),
                        clean: AtomicBool::new(true),
                    },
                )
            })
            .collect();

        Self {
            slots,
            categories,
            issues: Issues::default(),
        }
    }

    /// Name of the unit that owns a field
    pub fn owner_of(&self, field: &str) -> Option<&str> {
        self.slots.get(field).map(|slot| slot.owner.as_str())
    }

    /// Published value of a field, if its owner has completed
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.slots.get(field).and_then(|slot| slot.value.get())
    }

    pub fn issues(&self) -> &Issues {
        &self.issues
    }

    /// Reject a publication that touches fields the unit does not own
    pub(crate) fn check_publication(&self, unit: &str, fields: &Fields) -> Result<(), UnitError> {
        for name in fields.names() {
            match self.slots.get(name) {
                Some(slot) if slot.owner == unit => {}
                _ => {
                    return Err(UnitError::UndeclaredField {
                        field: name.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Publish checked fields. Each cell is written at most once.
    pub(crate) fn publish(&self, unit: &str, fields: Fields) {
        for (name, value) in fields.0 {
            if let Some(slot) = self.slots.get(&name) {
                if slot.value.set(value).is_err() {
                    warn!(unit, field = %name, "Field already published, keeping first value");
                }
            }
        }
    }

    /// Mark a category as incomplete because of a recoverable miss
    pub fn clear_category(&self, category: Category) {
        if let Some(flag) = self.categories.get(&category) {
            flag.clean.store(false, Ordering::SeqCst);
        }
    }

    /// Account for one contributing unit reaching a terminal state
    pub(crate) fn settle_category(&self, category: Category, clean: bool) {
        if let Some(flag) = self.categories.get(&category) {
            if !clean {
                flag.clean.store(false, Ordering::SeqCst);
            }
            let _ = flag
                .pending
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
    }

    /// True once every contributing unit is `Done` without recoverable misses
    pub fn category_success(&self, category: Category) -> bool {
        self.categories.get(&category).is_some_and(|flag| {
            flag.registered > 0
                && flag.pending.load(Ordering::SeqCst) == 0
                && flag.clean.load(Ordering::SeqCst)
        })
    }

    /// Point-in-time copy of every published field, flag and issue
    pub fn snapshot(&self) -> StoreSnapshot {
        let fields = self
            .slots
            .iter()
            .filter_map(|(name, slot)| slot.value.get().map(|v| (name.clone(), v.clone())))
            .collect();

        let categories = Category::ALL
            .iter()
            .map(|&category| (category, self.category_success(category)))
            .collect();

        StoreSnapshot {
            fields,
            categories,
            issues: self.issues.snapshot(),
        }
    }
}

/// Immutable copy of the store that assembly works from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    fields: BTreeMap<String, Value>,
    categories: BTreeMap<Category, bool>,
    issues: Vec<String>,
}

impl StoreSnapshot {
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_category(mut self, category: Category, success: bool) -> Self {
        self.categories.insert(category, success);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Typed read; a value of the wrong shape reads as absent
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> Option<T> {
        let value = self.fields.get(field)?;
        match serde_json::from_value(value.clone()) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!(field, error = %e, "Field has unexpected shape, treating as absent");
                None
            }
        }
    }

    /// String read that treats empty strings as absent
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn category_success(&self, category: Category) -> bool {
        self.categories.get(&category).copied().unwrap_or(false)
    }

    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    pub fn push_issue(&mut self, issue: impl Into<String>) {
        self.issues.push(issue.into());
    }
}
