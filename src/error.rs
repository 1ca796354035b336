// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: error
// ─────────────────────────────────────────────────────────────────────────────

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuilderError {
    #[error("invalid FQBN '{0}': expected <package>:<platform>:<board>, each a non-empty [A-Za-z0-9_]+ token")]
    InvalidFqbn(String),

    #[error("could not locate {what} under SDK path {sdk_path}")]
    DescriptorMissing { what: &'static str, sdk_path: String },

    #[error("unknown board '{0}': no '{0}.' properties in boards.txt")]
    UnknownBoard(String),

    #[error("sketch error: {0}")]
    SketchValidation(String),

    #[error("dependency error: {0}")]
    Dependency(String),

    #[error("hook '{name}' failed (exit {code:?}):\n{output}")]
    Hook { name: String, code: Option<i32>, output: String },

    #[error("build failed (exit {code:?}):\n{output}")]
    Build { code: Option<i32>, output: String },

    #[error("{0}")]
    Size(String),

    #[error("cache I/O error: {0}")]
    CacheIo(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BuilderError>;
