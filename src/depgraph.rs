// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: depgraph
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;

/// The role a `Dependency` plays in the build, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Sketch,
    Core,
    Variant,
    Library,
}

/// One compile unit group: the sketch itself, the core, the variant, or a
/// resolved library.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub kind: DependencyKind,
    pub name: String,
    pub root: PathBuf,
    pub sources: Vec<PathBuf>,
    /// Pre-built archives (`.a`) pulled in at link time, contributed by this
    /// dependency (e.g. a library's `src/<arch>/*.a`).
    pub prebuilt_archives: Vec<PathBuf>,
}

impl Dependency {
    /// The name of the archive this dependency's objects are grouped under.
    /// `variant` objects are never archived — they link as standalone loose
    /// objects alongside the sketch (§3 DependencyGraph order constraint 2).
    pub fn archive_name(&self) -> Option<&str> {
        match self.kind {
            DependencyKind::Sketch => None,
            DependencyKind::Variant => None,
            DependencyKind::Core => Some("core"),
            DependencyKind::Library => Some(self.name.as_str()),
        }
    }
}

/// The ordered dependency set produced by C2 and consumed by C3.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    pub sketch: Option<Dependency>,
    pub core: Option<Dependency>,
    pub variant: Option<Dependency>,
    pub libraries: Vec<Dependency>,
    /// Headers referenced but not found in the library map (§4.2.3); counted
    /// against `DependencyError` but not fatal.
    pub unresolved_headers: Vec<String>,
}

impl DependencyGraph {
    /// Iterates every non-sketch dependency, in emission order: core,
    /// variant, then libraries in resolution order.
    pub fn non_sketch_deps(&self) -> impl Iterator<Item = &Dependency> {
        self.core.iter().chain(self.variant.iter()).chain(self.libraries.iter())
    }

    pub fn all_deps(&self) -> impl Iterator<Item = &Dependency> {
        self.sketch.iter().chain(self.non_sketch_deps())
    }
}
