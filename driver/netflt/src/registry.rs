//! Attached filter modules, by interface name

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::module::FilterModule;
use crate::sync::SpinLock;

#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: SpinLock<BTreeMap<String, Arc<FilterModule>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `module` under its interface name
    ///
    /// ## Errors
    ///
    /// - [`Error::AlreadyAttached`] if a module with the same name exists
    pub fn insert(&self, module: Arc<FilterModule>) -> Result<()> {
        let mut modules = self.modules.lock();
        if modules.contains_key(module.name()) {
            return Err(Error::AlreadyAttached(module.name().to_owned()));
        }

        modules.insert(module.name().to_owned(), module);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<FilterModule>> {
        self.modules.lock().remove(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<FilterModule>> {
        self.modules.lock().get(name).cloned()
    }

    /// All registered modules, in name order
    pub fn snapshot(&self) -> Vec<Arc<FilterModule>> {
        self.modules.lock().values().cloned().collect()
    }

    /// Removes every module
    pub fn drain(&self) -> Vec<Arc<FilterModule>> {
        core::mem::take(&mut *self.modules.lock())
            .into_values()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.lock().is_empty()
    }
}
