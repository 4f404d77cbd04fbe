//! Opcode definitions for the Raya bytecode format
//!
//! Each opcode is a single byte. Operands (if any) are encoded as fixed-width
//! little-endian integers immediately following the opcode byte, per the
//! layouts documented on each variant.

/// A single VM instruction opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // --- Stack manipulation ---
    /// Do nothing
    Nop = 0x00,
    /// Pop the top stack value
    Pop = 0x01,
    /// Duplicate the top stack value
    Dup = 0x02,
    /// Swap the top two stack values
    Swap = 0x03,

    // --- Constants ---
    /// Push `null`
    ConstNull = 0x10,
    /// Push `true`
    ConstTrue = 0x11,
    /// Push `false`
    ConstFalse = 0x12,
    /// Push an i32 operand (4 bytes, little-endian)
    ConstI32 = 0x13,
    /// Push an f64 operand (8 bytes, little-endian)
    ConstF64 = 0x14,

    // --- Locals ---
    /// Push local slot `operand` (u16) onto the stack
    LoadLocal = 0x20,
    /// Pop the stack into local slot `operand` (u16)
    StoreLocal = 0x21,
    /// Push local slot 0 onto the stack (no operand)
    LoadLocal0 = 0x22,
    /// Pop the stack into local slot 0 (no operand)
    StoreLocal0 = 0x23,

    // --- Integer arithmetic ---
    /// Integer add
    Iadd = 0x30,
    /// Integer subtract
    Isub = 0x31,
    /// Integer multiply
    Imul = 0x32,
    /// Integer divide
    Idiv = 0x33,
    /// Integer modulo
    Imod = 0x34,
    /// Integer negate
    Ineg = 0x35,

    // --- Float arithmetic ---
    /// Float add
    Fadd = 0x40,
    /// Float subtract
    Fsub = 0x41,
    /// Float multiply
    Fmul = 0x42,
    /// Float divide
    Fdiv = 0x43,
    /// Float negate
    Fneg = 0x44,
    /// Float equal
    Feq = 0x45,
    /// Float less than
    Flt = 0x46,
    /// Float greater than
    Fgt = 0x47,
    /// Add two numeric operands after widening the narrower one to match
    /// (int+float promotes to float, smaller-width ints promote to i64)
    Nadd = 0x48,
    /// Subtract two numeric operands, widening as `Nadd` does
    Nsub = 0x49,
    /// Multiply two numeric operands, widening as `Nadd` does
    Nmul = 0x4A,
    /// Divide two numeric operands, widening as `Nadd` does
    Ndiv = 0x4B,

    // --- Comparisons ---
    /// Integer equal
    Ieq = 0x50,
    /// Integer not equal
    Ine = 0x51,
    /// Integer less than
    Ilt = 0x52,
    /// Integer less or equal
    Ile = 0x53,
    /// Integer greater than
    Igt = 0x54,
    /// Integer greater or equal
    Ige = 0x55,

    // --- Logical ---
    /// Boolean AND of top two stack values
    And = 0x56,
    /// Boolean OR of top two stack values
    Or = 0x57,
    /// Boolean negation of top-of-stack
    Not = 0x58,
    /// Loose equality of top two stack values (same bit pattern)
    Eq = 0x59,
    /// Loose inequality of top two stack values
    Ne = 0x5A,
    /// Strict equality of top two stack values (same type and same bit pattern)
    StrictEq = 0x5B,

    // --- Control flow ---
    /// Unconditional jump, operand is i16 relative offset
    Jmp = 0x60,
    /// Jump if top-of-stack is truthy, operand is i16 relative offset
    JmpIfTrue = 0x61,
    /// Jump if top-of-stack is falsy, operand is i16 relative offset
    JmpIfFalse = 0x62,
    /// Call function by index (u16 operand)
    Call = 0x63,
    /// Return from the current function
    Return = 0x64,
    /// Jump if top-of-stack is `null`, operand is i16 relative offset
    JmpIfNull = 0x65,
    /// Jump if top-of-stack is not `null`, operand is i16 relative offset
    JmpIfNotNull = 0x66,

    // --- Objects ---
    /// Allocate a new object of class index (u16 operand)
    New = 0x70,
    /// Load a field by offset (u16 operand)
    LoadField = 0x71,
    /// Store a field by offset (u16 operand)
    StoreField = 0x72,
    /// Load a field by offset without bounds checking (u16 operand)
    LoadFieldFast = 0x73,
    /// Store a field by offset without bounds checking (u16 operand)
    StoreFieldFast = 0x74,
    /// Call a virtual method by vtable index (u16 operand)
    CallMethod = 0x75,
    /// Reference equality of top two stack values (same heap allocation)
    ObjEq = 0x76,
    /// Check whether top-of-stack is an instance of class index (u16 operand)
    InstanceOf = 0x77,
    /// Cast top-of-stack to class index (u16 operand), throwing on mismatch
    Cast = 0x78,

    // --- Arrays ---
    /// Allocate a new array of element type index (u16) and length (from stack)
    NewArray = 0x80,
    /// Load an array element (index from stack)
    LoadElem = 0x81,
    /// Store an array element (index and value from stack)
    StoreElem = 0x82,
    /// Push array length
    ArrayLen = 0x83,
    /// Append a value (from stack) to the array below it
    ArrayPush = 0x84,
    /// Pop and push the last element of the array on top of the stack
    ArrayPop = 0x85,

    // --- Strings ---
    /// Concatenate top two strings
    Sconcat = 0x90,
    /// Push string length
    Slen = 0x91,
    /// String equality of top two stack values
    Seq = 0x92,

    // --- Tasks / concurrency ---
    /// Spawn a new Task running function index (u16 operand); pushes TaskId
    Spawn = 0xA0,
    /// Suspend the current Task until the awaited Task (TaskId on stack) completes
    Await = 0xA1,
    /// Suspend the current Task for a duration in milliseconds (i64 on stack)
    Sleep = 0xA2,
    /// Suspend until all TaskIds in the stack-top array complete
    WaitAll = 0xA3,
    /// Suspend until any TaskId in the stack-top array completes; pushes its index
    WaitAny = 0xA4,
    /// Request cancellation of a Task (TaskId on stack)
    TaskCancel = 0xA5,
    /// Voluntarily yield the current Task back to the scheduler without
    /// waiting on anything, for cooperative fairness
    Yield = 0xA6,

    // --- Synchronization ---
    /// Allocate a new Mutex; pushes MutexId
    MutexNew = 0xB0,
    /// Lock a Mutex (MutexId on stack); may suspend the Task
    MutexLock = 0xB1,
    /// Unlock a Mutex (MutexId on stack)
    MutexUnlock = 0xB2,
    /// Allocate a new Channel with capacity (u32 operand, 0 = unbounded); pushes ChannelId
    ChannelNew = 0xB3,
    /// Send a value on a channel (ChannelId and value on stack); may suspend
    ChannelSend = 0xB4,
    /// Receive a value from a channel (ChannelId on stack); may suspend
    ChannelRecv = 0xB5,
    /// Close a channel (ChannelId on stack)
    ChannelClose = 0xB6,

    // --- Exceptions ---
    /// Throw the top-of-stack value as an exception
    Throw = 0xC0,
    /// Install an exception handler; operands are catch offset (i32) and finally offset (i32)
    PushHandler = 0xC1,
    /// Remove the most recently installed exception handler
    PopHandler = 0xC2,
    /// Re-throw the currently active exception
    Rethrow = 0xC3,

    // --- Capabilities ---
    /// Invoke a host capability by index (u16 operand) with argc args from stack
    CallCapability = 0xE0,
}

impl Opcode {
    /// Decode a byte into an Opcode, if it names a valid variant
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        let op = match byte {
            0x00 => Nop,
            0x01 => Pop,
            0x02 => Dup,
            0x03 => Swap,
            0x10 => ConstNull,
            0x11 => ConstTrue,
            0x12 => ConstFalse,
            0x13 => ConstI32,
            0x14 => ConstF64,
            0x20 => LoadLocal,
            0x21 => StoreLocal,
            0x22 => LoadLocal0,
            0x23 => StoreLocal0,
            0x30 => Iadd,
            0x31 => Isub,
            0x32 => Imul,
            0x33 => Idiv,
            0x34 => Imod,
            0x35 => Ineg,
            0x40 => Fadd,
            0x41 => Fsub,
            0x42 => Fmul,
            0x43 => Fdiv,
            0x44 => Fneg,
            0x45 => Feq,
            0x46 => Flt,
            0x47 => Fgt,
            0x48 => Nadd,
            0x49 => Nsub,
            0x4A => Nmul,
            0x4B => Ndiv,
            0x50 => Ieq,
            0x51 => Ine,
            0x52 => Ilt,
            0x53 => Ile,
            0x54 => Igt,
            0x55 => Ige,
            0x56 => And,
            0x57 => Or,
            0x58 => Not,
            0x59 => Eq,
            0x5A => Ne,
            0x5B => StrictEq,
            0x60 => Jmp,
            0x61 => JmpIfTrue,
            0x62 => JmpIfFalse,
            0x63 => Call,
            0x64 => Return,
            0x65 => JmpIfNull,
            0x66 => JmpIfNotNull,
            0x70 => New,
            0x71 => LoadField,
            0x72 => StoreField,
            0x73 => LoadFieldFast,
            0x74 => StoreFieldFast,
            0x75 => CallMethod,
            0x76 => ObjEq,
            0x77 => InstanceOf,
            0x78 => Cast,
            0x80 => NewArray,
            0x81 => LoadElem,
            0x82 => StoreElem,
            0x83 => ArrayLen,
            0x84 => ArrayPush,
            0x85 => ArrayPop,
            0x90 => Sconcat,
            0x91 => Slen,
            0x92 => Seq,
            0xA0 => Spawn,
            0xA1 => Await,
            0xA2 => Sleep,
            0xA3 => WaitAll,
            0xA4 => WaitAny,
            0xA5 => TaskCancel,
            0xA6 => Yield,
            0xB0 => MutexNew,
            0xB1 => MutexLock,
            0xB2 => MutexUnlock,
            0xB3 => ChannelNew,
            0xB4 => ChannelSend,
            0xB5 => ChannelRecv,
            0xB6 => ChannelClose,
            0xC0 => Throw,
            0xC1 => PushHandler,
            0xC2 => PopHandler,
            0xC3 => Rethrow,
            0xE0 => CallCapability,
            _ => return None,
        };
        Some(op)
    }

    /// Number of operand bytes this opcode consumes from the instruction stream
    pub fn operand_size(self) -> usize {
        use Opcode::*;
        match self {
            ConstI32 => 4,
            ConstF64 => 8,
            LoadLocal | StoreLocal => 2,
            Jmp | JmpIfTrue | JmpIfFalse | JmpIfNull | JmpIfNotNull => 2,
            Call | New | LoadField | StoreField | LoadFieldFast | StoreFieldFast
            | CallMethod | NewArray | Spawn | CallCapability | InstanceOf | Cast => 2,
            ChannelNew => 4,
            PushHandler => 8,
            _ => 0,
        }
    }
}
