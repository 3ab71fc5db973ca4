use std::sync::{Arc, Mutex};

use blt_vm::{ModuleInstance, ScanProgram};
use serde::{Deserialize, Serialize};

use crate::analyzer::{Analysis, analyze};
use crate::binary::BinaryBackend;
use crate::error::EngineError;
use crate::params::{BlitOp, CompileParams};
use crate::textual::TextualBackend;

/// What a back-end emits before materialization, exposed for inspection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeneratedCode {
    Text(String),
    Module(Vec<u8>),
}

/// A materialized specialization.
pub enum Artifact {
    /// Compiled scan routine for the in-process interpreter.
    Scan(ScanProgram),
    /// Instantiated module owning a linear memory.
    Module(Mutex<ModuleInstance>),
}

/// Compile-once accounting, observable by tests and `log_perf`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub compiles: usize,
    pub cache_hits: usize,
}

pub trait Backend: Send + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Emits the artifact body for `params` without materializing it.
    fn generate(&self, params: &CompileParams) -> Result<GeneratedCode, EngineError>;

    /// Returns the cached artifact for the fingerprint of `params`,
    /// compiling it first on a miss. Failed compilations are not cached.
    fn compile(&self, params: &CompileParams) -> Result<Arc<Artifact>, EngineError>;

    /// Runs one transfer through a previously compiled artifact.
    fn execute(
        &self,
        artifact: &Artifact,
        src: &[u32],
        dst: &mut [u32],
        op: &BlitOp,
    ) -> Result<(), EngineError>;

    fn fingerprint(&self, params: &CompileParams) -> String {
        crate::fingerprint::fingerprint(self.name(), params)
    }

    fn analyze(&self, params: &CompileParams) -> Analysis {
        analyze(params)
    }

    fn clear_cache(&self);

    /// Whether compile/execute complete through a deferred value. Both
    /// in-process back-ends run to completion synchronously.
    fn is_async(&self) -> bool {
        false
    }

    fn stats(&self) -> BackendStats;
}

/// Shared cache used by both back-ends: fingerprint → artifact, insert-only
/// until cleared. The lock is held across a miss so concurrent first
/// callers share a single compilation per fingerprint.
pub struct ArtifactCache {
    entries: Mutex<std::collections::HashMap<String, Arc<Artifact>>>,
    stats: Mutex<BackendStats>,
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(std::collections::HashMap::new()),
            stats: Mutex::new(BackendStats::default()),
        }
    }

    pub fn get_or_compile(
        &self,
        key: &str,
        build: impl FnOnce() -> Result<Artifact, EngineError>,
    ) -> Result<Arc<Artifact>, EngineError> {
        let mut entries = self.entries.lock().expect("artifact cache poisoned");
        if let Some(artifact) = entries.get(key) {
            self.stats.lock().expect("stats poisoned").cache_hits += 1;
            return Ok(Arc::clone(artifact));
        }
        let artifact = Arc::new(build()?);
        entries.insert(key.to_string(), Arc::clone(&artifact));
        self.stats.lock().expect("stats poisoned").compiles += 1;
        Ok(artifact)
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("artifact cache poisoned")
            .clear();
    }

    pub fn stats(&self) -> BackendStats {
        *self.stats.lock().expect("stats poisoned")
    }
}

/// Back-end selector carried by the engine configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Textual,
    Binary,
    AlignedBinary,
}

impl BackendKind {
    pub fn from_name(name: &str) -> Result<Self, EngineError> {
        match name {
            "textual" | "text" => Ok(BackendKind::Textual),
            "binary" | "bytecode" => Ok(BackendKind::Binary),
            "aligned-binary" | "aligned" => Ok(BackendKind::AlignedBinary),
            other => Err(EngineError::UnknownBackEnd(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Textual => "textual",
            BackendKind::Binary => "binary",
            BackendKind::AlignedBinary => "aligned-binary",
        }
    }
}

/// Constructs a back-end by name; anything outside the recognized set
/// fails with [`EngineError::UnknownBackEnd`].
pub fn create_backend(name: &str) -> Result<Box<dyn Backend>, EngineError> {
    Ok(create_backend_of(BackendKind::from_name(name)?))
}

pub fn create_backend_of(kind: BackendKind) -> Box<dyn Backend> {
    match kind {
        BackendKind::Textual => Box::new(TextualBackend::new()),
        BackendKind::Binary => Box::new(BinaryBackend::new()),
        BackendKind::AlignedBinary => Box::new(BinaryBackend::aligned()),
    }
}
