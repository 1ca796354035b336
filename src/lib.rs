// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core  —  public library API
// ─────────────────────────────────────────────────────────────────────────────

pub mod analyzer;
pub mod cache;
pub mod config;
pub mod config_file;
pub mod context;
pub mod depgraph;
pub mod driver;
pub mod error;
pub mod fqbn;
pub mod fwdecl;
pub mod graph;
pub mod hooks;
pub mod macros;
pub mod property;
pub mod size;

pub use config::{resolve, ResolveRequest, ResolvedConfig};
pub use context::{Context, PathBag, ToolBag};
pub use depgraph::{Dependency, DependencyGraph, DependencyKind};
pub use driver::{compile, CompileRequest, CompileResult};
pub use error::{BuilderError, Result};
pub use fqbn::Fqbn;
pub use graph::{build_graph, BuildGraph};
