use blt_vm::{InstantiateError, ScanAsmError, ScanVmError, TrapError};

/// A back-end emitted a malformed artifact: the scan assembler rejected
/// the generated text, or the module runtime rejected the emitted bytes
/// during decode/validation.
#[derive(Debug)]
pub enum GenerationError {
    ScanAsm(ScanAsmError),
    Module(InstantiateError),
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationError::ScanAsm(err) => write!(f, "{err}"),
            GenerationError::Module(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for GenerationError {}

#[derive(Debug)]
pub enum EngineError {
    UnknownBackEnd(String),
    Generation(GenerationError),
    Instantiation(InstantiateError),
    MemoryCapacity {
        required_bytes: usize,
        max_bytes: usize,
    },
    Trap(TrapError),
    Scan(ScanVmError),
    VerificationMismatch {
        x: u32,
        y: u32,
        expected: u32,
        actual: u32,
    },
    OutOfRange {
        what: &'static str,
    },
    Unsupported(&'static str),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::UnknownBackEnd(name) => write!(f, "unknown back-end '{name}'"),
            EngineError::Generation(err) => write!(f, "generation failure: {err}"),
            EngineError::Instantiation(err) => write!(f, "instantiation failure: {err}"),
            EngineError::MemoryCapacity {
                required_bytes,
                max_bytes,
            } => write!(
                f,
                "linear memory cannot hold both buffers: need {required_bytes} bytes, maximum {max_bytes}",
            ),
            EngineError::Trap(err) => write!(f, "module trapped: {err}"),
            EngineError::Scan(err) => write!(f, "scan routine failed: {err}"),
            EngineError::VerificationMismatch {
                x,
                y,
                expected,
                actual,
            } => write!(
                f,
                "verification mismatch at ({x}, {y}): expected {expected}, actual {actual}",
            ),
            EngineError::OutOfRange { what } => {
                write!(f, "copy rectangle out of range: {what}")
            }
            EngineError::Unsupported(what) => write!(f, "unsupported: {what}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ScanAsmError> for EngineError {
    fn from(value: ScanAsmError) -> Self {
        EngineError::Generation(GenerationError::ScanAsm(value))
    }
}

impl From<TrapError> for EngineError {
    fn from(value: TrapError) -> Self {
        EngineError::Trap(value)
    }
}

impl From<ScanVmError> for EngineError {
    fn from(value: ScanVmError) -> Self {
        EngineError::Scan(value)
    }
}
