pub mod body;
pub mod decode;
pub mod instance;
pub mod leb128;
pub mod module;
pub mod opcodes;
pub mod scan;
pub mod validate;

pub use body::{BodyBuilder, aligned_body, scalar_body};
pub use decode::{DecodeError, MemoryLimits, Module, decode_module};
pub use instance::{InstantiateError, ModuleInstance, TrapError};
pub use leb128::{LebError, read_sleb128, read_uleb128, write_section, write_sleb128, write_uleb128};
pub use module::{EXPORT_ENTRY, IMPORT_MEMORY, IMPORT_MODULE, encode_module};
pub use scan::{ScanAsmError, ScanOpCode, ScanProgram, ScanVmError, Segment, assemble_scan, run_scan};
pub use validate::{ControlMap, ValidationError, validate_body};
