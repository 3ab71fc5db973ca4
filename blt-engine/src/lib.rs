pub mod analyzer;
pub mod backend;
pub mod binary;
pub mod buffer;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod params;
pub mod reference;
pub mod textual;

pub use analyzer::{Analysis, analyze, simd_supported};
pub use backend::{
    Artifact, ArtifactCache, Backend, BackendKind, BackendStats, GeneratedCode, create_backend,
    create_backend_of,
};
pub use binary::BinaryBackend;
pub use buffer::{BitBuffer, get_pixel, set_pixel, stride_words};
pub use engine::{CallOptions, Engine, EngineConfig};
pub use error::{EngineError, GenerationError};
pub use fingerprint::fingerprint;
pub use params::{BlitOp, BlitShape, CompileParams, CompilerFlags};
pub use reference::reference_bitblt;
pub use textual::{TextualBackend, generate_scan_source};
