//! Registry of host-provided native functions callable from bytecode

use crate::value::Value;
use crate::vm::lifecycle::VmError;
use std::collections::HashMap;
use std::sync::Arc;

/// A native function exposed to bytecode
///
/// Native functions receive their arguments already popped off the operand
/// stack and return a single value (or an error that aborts the calling
/// Task).
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, VmError> + Send + Sync>;

/// A named collection of native functions, grouped the way a bytecode
/// `Import` refers to them (e.g. `"io"`, `"math"`)
#[derive(Clone)]
pub struct NativeModule {
    name: String,
    functions: HashMap<String, NativeFn>,
}

impl NativeModule {
    /// Create a new, empty native module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: HashMap::new(),
        }
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a function under this module
    pub fn add_function(&mut self, name: impl Into<String>, f: NativeFn) {
        self.functions.insert(name.into(), f);
    }

    /// Look up a function by name
    pub fn get_function(&self, name: &str) -> Option<NativeFn> {
        self.functions.get(name).cloned()
    }
}

/// Registry of all native modules available to a VmContext
#[derive(Default, Clone)]
pub struct NativeModuleRegistry {
    modules: HashMap<String, NativeModule>,
}

impl NativeModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native module
    pub fn register(&mut self, module: NativeModule) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Look up a native module by name
    pub fn get_module(&self, name: &str) -> Option<&NativeModule> {
        self.modules.get(name)
    }

    /// Resolve `module::function` to a callable, if registered
    pub fn resolve(&self, module: &str, function: &str) -> Option<NativeFn> {
        self.modules.get(module)?.get_function(function)
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no modules are registered
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
