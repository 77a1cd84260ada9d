use std::path::{Path, PathBuf};

use crate::error::RenderResult;

/// What to compile: one entry point of one HLSL file for one target profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub path: PathBuf,
    pub entry_point: String,
    /// e.g. `vs_6_6`
    pub profile: String,
}

impl ShaderSource {
    pub fn new(path: impl Into<PathBuf>, entry_point: &str, profile: &str) -> Self {
        Self {
            path: path.into(),
            entry_point: entry_point.to_owned(),
            profile: profile.to_owned(),
        }
    }
}

/// Compiled shader bytecode, opaque to everything but pipeline creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBytecode(Vec<u8>);

impl ShaderBytecode {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Turns HLSL into bytecode. Warnings count as errors.
///
/// Implementations are constructed explicitly once and passed by reference to
/// whatever builds pipelines; there is no global compiler instance.
pub trait ShaderCompiler {
    fn compile(&self, source: &ShaderSource) -> RenderResult<ShaderBytecode>;
}

/// Finds `file_name` next to the executable, falling back to the crate's
/// `shaders/` directory during development.
pub fn locate_shader(file_name: &str) -> Option<PathBuf> {
    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(file_name)));
    if let Some(path) = beside_exe.filter(|path| path.exists()) {
        return Some(path);
    }

    let fallback = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("shaders")
        .join(file_name);
    fallback.exists().then_some(fallback)
}
