//! Compiled bytecode format: opcodes, module structure and verification.

mod module;
mod opcode;
mod verify;

pub use module::{
    ClassDef, ConstantPool, Export, FieldDef, Function, Import, Metadata, Module, ModuleError,
    SymbolType,
};
pub use opcode::Opcode;
pub use verify::{verify_module, VerifyError};
