use std::fmt;
use std::path::PathBuf;

/// Which programmable stage a shader belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Engine-level errors used across chroma crates.
///
/// Everything raised while building a render session is unrecoverable for that session:
/// inputs are static (embedded shader text, fixed uniform names), so retrying reproduces
/// the same failure.
#[derive(Debug)]
pub enum EngineError {
    // ---- Config / assets ----
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    InvalidConfig {
        path: PathBuf,
        msg: String,
    },

    InvalidImage(String),

    // ---- Runtime-facing (backend) ----
    ShaderCompile {
        stage: ShaderStage,
        log: String,
    },
    ProgramLink(String),
    /// Every required uniform the program does not declare.
    UniformResolution(Vec<String>),
    AttributeResolution(String),
    SurfaceUnavailable(String),
    GlCreate(String),
    /// An operation that needs a Ready pipeline was issued in another state.
    NotReady {
        op: &'static str,
        state: &'static str,
    },
}

impl EngineError {
    /// True for the error kinds that abandon rendering on the current surface.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::ShaderCompile { .. }
                | EngineError::ProgramLink(_)
                | EngineError::UniformResolution(_)
                | EngineError::AttributeResolution(_)
                | EngineError::SurfaceUnavailable(_)
                | EngineError::GlCreate(_)
        )
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Io { path, source } => {
                write!(f, "io error at {}: {}", path.display(), source)
            }
            EngineError::Json { path, source } => {
                write!(f, "json parse error at {}: {}", path.display(), source)
            }
            EngineError::InvalidConfig { path, msg } => {
                write!(f, "invalid config at {}: {}", path.display(), msg)
            }
            EngineError::InvalidImage(msg) => write!(f, "invalid image: {msg}"),

            EngineError::ShaderCompile { stage, log } => {
                write!(f, "{stage} shader compile error: {log}")
            }
            EngineError::ProgramLink(log) => write!(f, "program link error: {log}"),
            EngineError::UniformResolution(names) => match names.as_slice() {
                [name] => write!(f, "uniform '{name}' is not declared by the program"),
                names => {
                    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
                    write!(f, "uniforms {} are not declared by the program", quoted.join(", "))
                }
            },
            EngineError::AttributeResolution(name) => {
                write!(f, "vertex attribute '{name}' is not declared by the program")
            }
            EngineError::SurfaceUnavailable(msg) => {
                write!(f, "no compatible rendering surface: {msg}")
            }
            EngineError::GlCreate(msg) => write!(f, "backend object creation failed: {msg}"),
            EngineError::NotReady { op, state } => {
                write!(f, "{op} rejected: pipeline is {state}")
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io { source, .. } => Some(source),
            EngineError::Json { source, .. } => Some(source),
            _ => None,
        }
    }
}
