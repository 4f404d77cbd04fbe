//! Module loading: import resolution and cross-module symbol linking

mod import;
mod linker;

pub use import::{ImportError, ImportResolver, ImportSpec};
pub use linker::{LinkError, ModuleLinker, ResolvedSymbol};
