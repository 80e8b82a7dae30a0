//! Mock ApicClient for unit testing
//!
//! Stores written slices in memory per label key and serves canned query
//! results, so controllers can be tested without a fabric.

use crate::apic_trait::ApicClientTrait;
use crate::error::ApicError;
use crate::models::{ApicObject, ApicSlice};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One recorded writer call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Write(String),
    Clear(String),
}

/// Mock ApicClient for testing
#[derive(Debug, Clone, Default)]
pub struct MockApicClient {
    written: Arc<Mutex<HashMap<String, ApicSlice>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    classes: Arc<Mutex<HashMap<String, Vec<ApicObject>>>>,
    subtrees: Arc<Mutex<HashMap<String, Vec<ApicObject>>>>,
    fail: Arc<AtomicBool>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockApicClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Objects returned by `query_class(class)` (for test setup)
    pub fn set_class_objects(&self, class: &str, objects: Vec<ApicObject>) {
        lock(&self.classes).insert(class.to_string(), objects);
    }

    /// Objects returned by `query_dn_subtree(dn, ..)` (for test setup)
    pub fn set_subtree_objects(&self, dn: &str, objects: Vec<ApicObject>) {
        lock(&self.subtrees).insert(dn.to_string(), objects);
    }

    /// Make every call fail with an API error
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Slice currently owned by `key`
    pub fn written(&self, key: &str) -> Option<ApicSlice> {
        lock(&self.written).get(key).cloned()
    }

    /// Every label key currently holding objects
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.written).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Number of write calls made for `key`
    pub fn write_count(&self, key: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| matches!(c, MockCall::Write(k) if k == key))
            .count()
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    fn check_fail(&self) -> Result<(), ApicError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ApicError::Api("mock failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ApicClientTrait for MockApicClient {
    async fn write_apic_objects(&self, key: &str, objects: ApicSlice) -> Result<(), ApicError> {
        self.check_fail()?;
        lock(&self.calls).push(MockCall::Write(key.to_string()));
        let mut written = lock(&self.written);
        if objects.is_empty() {
            written.remove(key);
        } else {
            written.insert(key.to_string(), objects);
        }
        Ok(())
    }

    async fn clear_apic_objects(&self, key: &str) -> Result<(), ApicError> {
        self.check_fail()?;
        lock(&self.calls).push(MockCall::Clear(key.to_string()));
        lock(&self.written).remove(key);
        Ok(())
    }

    async fn query_class(&self, class: &str) -> Result<Vec<ApicObject>, ApicError> {
        self.check_fail()?;
        Ok(lock(&self.classes).get(class).cloned().unwrap_or_default())
    }

    async fn query_dn_subtree(&self, dn: &str, classes: &[String]) -> Result<Vec<ApicObject>, ApicError> {
        self.check_fail()?;
        let objects = lock(&self.subtrees).get(dn).cloned().unwrap_or_default();
        Ok(objects
            .into_iter()
            .filter(|o| classes.is_empty() || classes.contains(&o.class))
            .collect())
    }
}
