//! Compiled module format: functions, classes, constants and linkage metadata.

use std::io::{self, Read, Write};

/// A symbol exported or imported across module boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SymbolType {
    /// A function
    Function = 0,
    /// A class
    Class = 1,
    /// A constant (string/int/float pool entry)
    Constant = 2,
}

impl SymbolType {
    /// Decode from a tag byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(SymbolType::Function),
            1 => Some(SymbolType::Class),
            2 => Some(SymbolType::Constant),
            _ => None,
        }
    }
}

/// Pool of literal constants referenced by bytecode
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    /// String constants
    pub strings: Vec<String>,
    /// Integer constants (for literals that don't fit inline operands)
    pub integers: Vec<i64>,
    /// Floating point constants
    pub floats: Vec<f64>,
}

impl ConstantPool {
    /// Create an empty constant pool
    pub fn new() -> Self {
        Self::default()
    }
}

/// A single compiled function
#[derive(Debug, Clone)]
pub struct Function {
    /// Function name (for diagnostics and exports)
    pub name: String,
    /// Number of parameters
    pub param_count: usize,
    /// Number of local variable slots (including parameters)
    pub local_count: usize,
    /// Bytecode for the function body
    pub code: Vec<u8>,
}

/// A field within a class definition
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Offset within the object's field array
    pub offset: usize,
}

/// A compiled class definition
#[derive(Debug, Clone)]
pub struct ClassDef {
    /// Class name
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<FieldDef>,
    /// Method function indices, in vtable-slot order
    pub methods: Vec<usize>,
}

/// Module-level metadata
#[derive(Debug, Clone)]
pub struct Metadata {
    /// Module name
    pub name: String,
    /// Originating source file, if known
    pub source_file: Option<String>,
}

/// A single exported symbol
#[derive(Debug, Clone)]
pub struct Export {
    /// Exported name
    pub name: String,
    /// What kind of symbol this is
    pub symbol_type: SymbolType,
    /// Index into the owning module's functions/classes/constants
    pub index: usize,
}

/// A single import declaration
#[derive(Debug, Clone)]
pub struct Import {
    /// Module specifier (local path, package name, or URL)
    pub module_specifier: String,
    /// Symbol name being imported
    pub symbol: String,
    /// Local alias, if renamed
    pub alias: Option<String>,
    /// Version constraint, for package imports
    pub version_constraint: Option<String>,
}

/// Errors that can occur decoding a module from its binary representation
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// Magic bytes did not match "RAYA"
    #[error("invalid module magic bytes")]
    InvalidMagic,
    /// Unexpected end of input while decoding
    #[error("unexpected end of module data")]
    UnexpectedEof,
    /// Underlying I/O error
    #[error("module I/O error: {0}")]
    Io(#[from] io::Error),
    /// A string was not valid UTF-8
    #[error("invalid UTF-8 in module data")]
    InvalidUtf8,
    /// An enum tag byte didn't name a known variant
    #[error("invalid symbol type tag: {0}")]
    InvalidSymbolType(u8),
}

/// A fully compiled module: the unit of loading, linking and execution.
#[derive(Debug, Clone)]
pub struct Module {
    /// Magic bytes, always `*b"RAYA"`
    pub magic: [u8; 4],
    /// Format version
    pub version: u32,
    /// Format flags (reserved)
    pub flags: u32,
    /// Literal constant pool
    pub constants: ConstantPool,
    /// Compiled functions
    pub functions: Vec<Function>,
    /// Compiled classes
    pub classes: Vec<ClassDef>,
    /// Module metadata
    pub metadata: Metadata,
    /// Exported symbols
    pub exports: Vec<Export>,
    /// Imported symbols
    pub imports: Vec<Import>,
    /// SHA-256 checksum over the payload (everything after the 48-byte header)
    pub checksum: [u8; 32],
}

impl Module {
    /// Create a new, empty module with the given name
    pub fn new(name: String) -> Self {
        Self {
            magic: *b"RAYA",
            version: 1,
            flags: 0,
            constants: ConstantPool::new(),
            functions: Vec::new(),
            classes: Vec::new(),
            metadata: Metadata {
                name,
                source_file: None,
            },
            exports: Vec::new(),
            imports: Vec::new(),
            checksum: [0; 32],
        }
    }

    /// Find a function index by name
    pub fn find_function(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    /// Verify every function's bytecode is well-formed
    pub fn validate(&self) -> Result<(), String> {
        super::verify_module(self).map_err(|e| e.to_string())
    }

    fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
        let bytes = s.as_bytes();
        w.write_all(&(bytes.len() as u32).to_le_bytes())?;
        w.write_all(bytes)
    }

    fn read_string<R: Read>(r: &mut R) -> Result<String, ModuleError> {
        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|_| ModuleError::InvalidUtf8)
    }

    /// Encode the module payload (everything after the 48-byte header) into bytes.
    ///
    /// This does not write the header (magic/version/flags/crc32/sha256) itself -
    /// that is the responsibility of the module loader, which computes the
    /// checksum over this payload.
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        Self::write_string(&mut buf, &self.metadata.name).unwrap();
        match &self.metadata.source_file {
            Some(s) => {
                buf.push(1);
                Self::write_string(&mut buf, s).unwrap();
            }
            None => buf.push(0),
        }

        buf.extend_from_slice(&(self.constants.strings.len() as u32).to_le_bytes());
        for s in &self.constants.strings {
            Self::write_string(&mut buf, s).unwrap();
        }
        buf.extend_from_slice(&(self.constants.integers.len() as u32).to_le_bytes());
        for i in &self.constants.integers {
            buf.extend_from_slice(&i.to_le_bytes());
        }
        buf.extend_from_slice(&(self.constants.floats.len() as u32).to_le_bytes());
        for f in &self.constants.floats {
            buf.extend_from_slice(&f.to_le_bytes());
        }

        buf.extend_from_slice(&(self.functions.len() as u32).to_le_bytes());
        for f in &self.functions {
            Self::write_string(&mut buf, &f.name).unwrap();
            buf.extend_from_slice(&(f.param_count as u32).to_le_bytes());
            buf.extend_from_slice(&(f.local_count as u32).to_le_bytes());
            buf.extend_from_slice(&(f.code.len() as u32).to_le_bytes());
            buf.extend_from_slice(&f.code);
        }

        buf.extend_from_slice(&(self.classes.len() as u32).to_le_bytes());
        for c in &self.classes {
            Self::write_string(&mut buf, &c.name).unwrap();
            buf.extend_from_slice(&(c.fields.len() as u32).to_le_bytes());
            for field in &c.fields {
                Self::write_string(&mut buf, &field.name).unwrap();
                buf.extend_from_slice(&(field.offset as u32).to_le_bytes());
            }
            buf.extend_from_slice(&(c.methods.len() as u32).to_le_bytes());
            for m in &c.methods {
                buf.extend_from_slice(&(*m as u32).to_le_bytes());
            }
        }

        buf.extend_from_slice(&(self.exports.len() as u32).to_le_bytes());
        for e in &self.exports {
            Self::write_string(&mut buf, &e.name).unwrap();
            buf.push(e.symbol_type as u8);
            buf.extend_from_slice(&(e.index as u32).to_le_bytes());
        }

        buf.extend_from_slice(&(self.imports.len() as u32).to_le_bytes());
        for i in &self.imports {
            Self::write_string(&mut buf, &i.module_specifier).unwrap();
            Self::write_string(&mut buf, &i.symbol).unwrap();
            match &i.alias {
                Some(a) => {
                    buf.push(1);
                    Self::write_string(&mut buf, a).unwrap();
                }
                None => buf.push(0),
            }
            match &i.version_constraint {
                Some(v) => {
                    buf.push(1);
                    Self::write_string(&mut buf, v).unwrap();
                }
                None => buf.push(0),
            }
        }

        buf
    }

    /// Encode the full `.rbin` image: the 48-byte header (magic, version,
    /// flags, a reserved crc32 slot, and a SHA-256 digest of the payload)
    /// followed by [`Module::encode_payload`]'s bytes. This is the inverse
    /// of [`Module::decode`].
    pub fn encode(&self) -> Vec<u8> {
        use sha2::{Digest, Sha256};

        let payload = self.encode_payload();
        let checksum = Sha256::digest(&payload);

        let mut bytes = Vec::with_capacity(48 + payload.len());
        bytes.extend_from_slice(&self.magic);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.flags.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // crc32 slot, unused by decode
        bytes.extend_from_slice(&checksum);
        bytes.extend_from_slice(&payload);
        bytes
    }

    fn decode_payload<R: Read>(reader: &mut R) -> Result<(Metadata, ConstantPool, Vec<Function>, Vec<ClassDef>, Vec<Export>, Vec<Import>), ModuleError> {
        let name = Self::read_string(reader)?;
        let mut has_source = [0u8; 1];
        reader.read_exact(&mut has_source)?;
        let source_file = if has_source[0] == 1 {
            Some(Self::read_string(reader)?)
        } else {
            None
        };
        let metadata = Metadata { name, source_file };

        let mut u32buf = [0u8; 4];

        reader.read_exact(&mut u32buf)?;
        let n_strings = u32::from_le_bytes(u32buf) as usize;
        let mut strings = Vec::with_capacity(n_strings);
        for _ in 0..n_strings {
            strings.push(Self::read_string(reader)?);
        }

        reader.read_exact(&mut u32buf)?;
        let n_ints = u32::from_le_bytes(u32buf) as usize;
        let mut integers = Vec::with_capacity(n_ints);
        for _ in 0..n_ints {
            let mut b = [0u8; 8];
            reader.read_exact(&mut b)?;
            integers.push(i64::from_le_bytes(b));
        }

        reader.read_exact(&mut u32buf)?;
        let n_floats = u32::from_le_bytes(u32buf) as usize;
        let mut floats = Vec::with_capacity(n_floats);
        for _ in 0..n_floats {
            let mut b = [0u8; 8];
            reader.read_exact(&mut b)?;
            floats.push(f64::from_le_bytes(b));
        }

        let constants = ConstantPool {
            strings,
            integers,
            floats,
        };

        reader.read_exact(&mut u32buf)?;
        let n_functions = u32::from_le_bytes(u32buf) as usize;
        let mut functions = Vec::with_capacity(n_functions);
        for _ in 0..n_functions {
            let name = Self::read_string(reader)?;
            reader.read_exact(&mut u32buf)?;
            let param_count = u32::from_le_bytes(u32buf) as usize;
            reader.read_exact(&mut u32buf)?;
            let local_count = u32::from_le_bytes(u32buf) as usize;
            reader.read_exact(&mut u32buf)?;
            let code_len = u32::from_le_bytes(u32buf) as usize;
            let mut code = vec![0u8; code_len];
            reader.read_exact(&mut code)?;
            functions.push(Function {
                name,
                param_count,
                local_count,
                code,
            });
        }

        reader.read_exact(&mut u32buf)?;
        let n_classes = u32::from_le_bytes(u32buf) as usize;
        let mut classes = Vec::with_capacity(n_classes);
        for _ in 0..n_classes {
            let name = Self::read_string(reader)?;
            reader.read_exact(&mut u32buf)?;
            let n_fields = u32::from_le_bytes(u32buf) as usize;
            let mut fields = Vec::with_capacity(n_fields);
            for _ in 0..n_fields {
                let fname = Self::read_string(reader)?;
                reader.read_exact(&mut u32buf)?;
                let offset = u32::from_le_bytes(u32buf) as usize;
                fields.push(FieldDef { name: fname, offset });
            }
            reader.read_exact(&mut u32buf)?;
            let n_methods = u32::from_le_bytes(u32buf) as usize;
            let mut methods = Vec::with_capacity(n_methods);
            for _ in 0..n_methods {
                reader.read_exact(&mut u32buf)?;
                methods.push(u32::from_le_bytes(u32buf) as usize);
            }
            classes.push(ClassDef { name, fields, methods });
        }

        reader.read_exact(&mut u32buf)?;
        let n_exports = u32::from_le_bytes(u32buf) as usize;
        let mut exports = Vec::with_capacity(n_exports);
        for _ in 0..n_exports {
            let name = Self::read_string(reader)?;
            let mut tag = [0u8; 1];
            reader.read_exact(&mut tag)?;
            let symbol_type =
                SymbolType::from_u8(tag[0]).ok_or(ModuleError::InvalidSymbolType(tag[0]))?;
            reader.read_exact(&mut u32buf)?;
            let index = u32::from_le_bytes(u32buf) as usize;
            exports.push(Export {
                name,
                symbol_type,
                index,
            });
        }

        reader.read_exact(&mut u32buf)?;
        let n_imports = u32::from_le_bytes(u32buf) as usize;
        let mut imports = Vec::with_capacity(n_imports);
        for _ in 0..n_imports {
            let module_specifier = Self::read_string(reader)?;
            let symbol = Self::read_string(reader)?;
            let mut has_alias = [0u8; 1];
            reader.read_exact(&mut has_alias)?;
            let alias = if has_alias[0] == 1 {
                Some(Self::read_string(reader)?)
            } else {
                None
            };
            let mut has_version = [0u8; 1];
            reader.read_exact(&mut has_version)?;
            let version_constraint = if has_version[0] == 1 {
                Some(Self::read_string(reader)?)
            } else {
                None
            };
            imports.push(Import {
                module_specifier,
                symbol,
                alias,
                version_constraint,
            });
        }

        Ok((metadata, constants, functions, classes, exports, imports))
    }

    /// Decode a full `.rbin` image (header + payload) into a `Module`.
    ///
    /// The caller (module loader) is responsible for verifying the checksum
    /// before trusting the decoded module; this only parses the structure.
    pub fn decode(bytes: &[u8]) -> Result<Self, ModuleError> {
        if bytes.len() < 48 {
            return Err(ModuleError::UnexpectedEof);
        }
        if &bytes[0..4] != b"RAYA" {
            return Err(ModuleError::InvalidMagic);
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let flags = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&bytes[16..48]);

        let mut cursor = io::Cursor::new(&bytes[48..]);
        let (metadata, constants, functions, classes, exports, imports) =
            Self::decode_payload(&mut cursor)?;

        Ok(Module {
            magic: *b"RAYA",
            version,
            flags,
            constants,
            functions,
            classes,
            metadata,
            exports,
            imports,
            checksum,
        })
    }
}
