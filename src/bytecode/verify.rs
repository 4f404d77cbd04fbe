//! Structural bytecode verification
//!
//! Runs before a module is linked into a VmContext: checks that every
//! function's code is a well-formed sequence of opcodes with in-bounds
//! operands and jump targets, so the interpreter never has to check for
//! truncated instructions at dispatch time.

use crate::bytecode::module::Module;
use crate::bytecode::opcode::Opcode;

/// Errors found while verifying a module's bytecode
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// A byte in the instruction stream did not name a valid opcode
    #[error("function '{function}': invalid opcode byte {byte:#04x} at offset {offset}")]
    InvalidOpcode {
        /// Offending function name
        function: String,
        /// Offset of the bad byte
        offset: usize,
        /// The byte value
        byte: u8,
    },

    /// An opcode's operand bytes ran past the end of the function
    #[error("function '{function}': truncated operand at offset {offset}")]
    TruncatedOperand {
        /// Offending function name
        function: String,
        /// Offset of the opcode
        offset: usize,
    },

    /// A jump target fell outside the function's code
    #[error("function '{function}': jump at offset {offset} targets out-of-bounds {target}")]
    JumpOutOfBounds {
        /// Offending function name
        function: String,
        /// Offset of the jump opcode
        offset: usize,
        /// Computed target
        target: isize,
    },

    /// A Call/Spawn/New/etc. operand index was out of range for the module
    #[error("function '{function}': index {index} out of bounds (max {max}) at offset {offset}")]
    IndexOutOfBounds {
        /// Offending function name
        function: String,
        /// Offset of the opcode
        offset: usize,
        /// The out-of-range index
        index: usize,
        /// Valid upper bound (exclusive)
        max: usize,
    },
}

/// Verify every function in a module
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    for function in &module.functions {
        verify_function(module, function)?;
    }
    Ok(())
}

fn verify_function(
    module: &Module,
    function: &crate::bytecode::module::Function,
) -> Result<(), VerifyError> {
    let code = &function.code;
    let mut ip = 0usize;

    while ip < code.len() {
        let byte = code[ip];
        let opcode = Opcode::from_u8(byte).ok_or_else(|| VerifyError::InvalidOpcode {
            function: function.name.clone(),
            offset: ip,
            byte,
        })?;

        let operand_size = opcode.operand_size();
        let operand_start = ip + 1;
        if operand_start + operand_size > code.len() {
            return Err(VerifyError::TruncatedOperand {
                function: function.name.clone(),
                offset: ip,
            });
        }

        match opcode {
            Opcode::Jmp | Opcode::JmpIfTrue | Opcode::JmpIfFalse => {
                let offset = i16::from_le_bytes([code[operand_start], code[operand_start + 1]])
                    as isize;
                let target = operand_start as isize + 2 + offset;
                if target < 0 || target as usize > code.len() {
                    return Err(VerifyError::JumpOutOfBounds {
                        function: function.name.clone(),
                        offset: ip,
                        target,
                    });
                }
            }
            Opcode::Call => {
                let index =
                    u16::from_le_bytes([code[operand_start], code[operand_start + 1]]) as usize;
                if index >= module.functions.len() {
                    return Err(VerifyError::IndexOutOfBounds {
                        function: function.name.clone(),
                        offset: ip,
                        index,
                        max: module.functions.len(),
                    });
                }
            }
            Opcode::New => {
                let index =
                    u16::from_le_bytes([code[operand_start], code[operand_start + 1]]) as usize;
                if index >= module.classes.len() {
                    return Err(VerifyError::IndexOutOfBounds {
                        function: function.name.clone(),
                        offset: ip,
                        index,
                        max: module.classes.len(),
                    });
                }
            }
            _ => {}
        }

        ip = operand_start + operand_size;
    }

    Ok(())
}
