//! Registry of loaded modules within a single VmContext

use crate::bytecode::Module;
use std::collections::HashMap;
use std::sync::Arc;

/// Holds every module that has been loaded into a VmContext, keyed by name
///
/// Each VmContext owns one registry; modules are never shared across
/// contexts directly (marshalling is required to pass values between them).
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<Module>>,
    /// Name of the module most recently registered, used as the default
    /// entry point module when none is specified.
    last_registered: Option<String>,
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, keyed by its metadata name
    ///
    /// Returns an error if a module with the same name is already registered.
    pub fn register(&mut self, module: Arc<Module>) -> Result<(), String> {
        let name = module.metadata.name.clone();
        if self.modules.contains_key(&name) {
            return Err(format!("module '{}' is already registered", name));
        }
        self.last_registered = Some(name.clone());
        self.modules.insert(name, module);
        Ok(())
    }

    /// Look up a module by name
    pub fn get(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.get(name).cloned()
    }

    /// The most recently registered module, if any
    pub fn last_registered(&self) -> Option<Arc<Module>> {
        self.last_registered.as_ref().and_then(|n| self.get(n))
    }

    /// Whether a module with the given name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no modules are registered
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// All registered module names
    pub fn module_names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }
}
