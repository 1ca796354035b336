// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: analyzer  —  C2 Preprocessor-Aware Analyzer
// ─────────────────────────────────────────────────────────────────────────────

pub mod cond;
pub mod directives;
pub mod sysheaders;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::ResolvedConfig;
use crate::depgraph::{Dependency, DependencyGraph, DependencyKind};
use crate::error::Result;
use crate::fqbn::Fqbn;
use crate::macros::Env;

const MAX_RECURSION_DEPTH: usize = 10;
const SOURCE_EXTS: &[&str] = &["cpp", "c", "S", "s"];
const EXCLUDED_DIR_NAMES: &[&str] = &["examples", "extras", "test", "tests", "docs"];

/// One entry in the header → library map (§4.2.3).
struct LibraryEntry {
    name: String,
    /// The directory enumeration starts from (parent of `src/` when the
    /// detected source directory is literally named `src`).
    root: PathBuf,
}

/// Maps header basenames to the library that declares them.
struct LibraryMap {
    by_header: BTreeMap<String, LibraryEntry>,
}

impl LibraryMap {
    fn build(search_roots: &[PathBuf]) -> Self {
        let mut by_header = BTreeMap::new();
        for root in search_roots {
            index_library_tree(root, &mut by_header);
        }
        LibraryMap { by_header }
    }

    fn find(&self, header: &str) -> Option<(&str, &Path)> {
        self.by_header.get(header).map(|e| (e.name.as_str(), e.root.as_path()))
    }
}

/// Walks `root` looking for library directories: a directory that contains
/// one or more source/header files directly inside it. Stops descending
/// once such a directory is found so nested `examples/` trees aren't
/// mistaken for separate libraries (§4.2.3).
fn index_library_tree(root: &Path, by_header: &mut BTreeMap<String, LibraryEntry>) {
    let Ok(entries) = std::fs::read_dir(root) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if dir_has_source_files(&path) {
            let dir_name = path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
            let (lib_name, lib_root) = if dir_name == "src" {
                let parent = path.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| path.clone());
                let name = parent.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or(dir_name);
                (name, parent)
            } else {
                (dir_name, path.clone())
            };
            index_headers(&path, &lib_name, &lib_root, by_header);
        } else {
            index_library_tree(&path, by_header);
        }
    }
}

fn dir_has_source_files(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .flatten()
        .any(|e| is_source_or_header(&e.path()))
}

fn is_source_or_header(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("cpp") | Some("c") | Some("S") | Some("s") | Some("h") | Some("hpp")
    )
}

fn index_headers(dir: &Path, lib_name: &str, lib_root: &Path, by_header: &mut BTreeMap<String, LibraryEntry>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if matches!(path.extension().and_then(|e| e.to_str()), Some("h") | Some("hpp")) {
            if let Some(name) = path.file_name().map(|s| s.to_string_lossy().into_owned()) {
                by_header.entry(name).or_insert_with(|| LibraryEntry {
                    name: lib_name.to_string(),
                    root: lib_root.to_path_buf(),
                });
            }
        }
    }
}

/// C2 entry point: walks the sketch's `#include` graph and produces the
/// ordered `DependencyGraph`.
pub fn analyze(cfg: &ResolvedConfig, sketch_cpp: &Path, seed_env: Env) -> Result<DependencyGraph> {
    let lib_map = LibraryMap::build(&cfg.context.paths.libraries_path);

    let mut graph = DependencyGraph::default();
    let mut resolved_names: HashSet<String> = HashSet::new();

    // Sketch.
    let sketch_text = std::fs::read_to_string(sketch_cpp)?;
    let sketch_analysis = directives::analyze_text(&sketch_text, &seed_env);
    graph.sketch = Some(Dependency {
        kind: DependencyKind::Sketch,
        name: sketch_cpp.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default(),
        root: sketch_cpp.parent().map(|p| p.to_path_buf()).unwrap_or_default(),
        sources: vec![sketch_cpp.to_path_buf()],
        prebuilt_archives: Vec::new(),
    });

    // Core + variant.
    let arch = cfg.fqbn.platform.as_str();
    if !cfg.context.paths.sdk_core_path.as_os_str().is_empty() {
        let core_sources = enumerate_sources(&cfg.context.paths.sdk_core_path, false, arch, true);
        graph.core = Some(Dependency {
            kind: DependencyKind::Core,
            name: "core".to_string(),
            root: cfg.context.paths.sdk_core_path.clone(),
            sources: core_sources,
            prebuilt_archives: Vec::new(),
        });
    }
    if !cfg.context.paths.sdk_variant_path.as_os_str().is_empty() && cfg.context.paths.sdk_variant_path.is_dir() {
        let variant_sources = enumerate_sources(&cfg.context.paths.sdk_variant_path, false, arch, false);
        graph.variant = Some(Dependency {
            kind: DependencyKind::Variant,
            name: "variant".to_string(),
            root: cfg.context.paths.sdk_variant_path.clone(),
            sources: variant_sources,
            prebuilt_archives: Vec::new(),
        });
    }

    // Recursively resolve headers reachable from the sketch.
    let mut pending: Vec<(String, Env, usize)> =
        sketch_analysis.includes.into_iter().map(|h| (h, sketch_analysis.env.clone(), 0)).collect();

    while let Some((header, env, depth)) = pending.pop() {
        if sysheaders::is_system_header(&header) {
            continue;
        }
        let Some((lib_name, lib_root)) = lib_map.find(&header) else {
            graph.unresolved_headers.push(header);
            continue;
        };
        if resolved_names.contains(lib_name) {
            continue;
        }
        if depth >= MAX_RECURSION_DEPTH {
            continue;
        }
        resolved_names.insert(lib_name.to_string());

        let sources = enumerate_sources(lib_root, true, arch, false);
        let headers_in_lib = headers_of(lib_root);

        graph.libraries.push(Dependency {
            kind: DependencyKind::Library,
            name: lib_name.to_string(),
            root: lib_root.to_path_buf(),
            sources: sources.clone(),
            prebuilt_archives: find_prebuilt_archives(lib_root, arch),
        });

        for src in sources.iter().chain(headers_in_lib.iter()) {
            let Ok(text) = std::fs::read_to_string(src) else { continue };
            let analysis = directives::analyze_text(&text, &env);
            // `analysis.env` is `env` extended by this file's own `#define`s;
            // handing each sibling its own clone (not the shared `env`)
            // keeps side-by-side branches independent (§9 redesign).
            for inc in analysis.includes {
                pending.push((inc, analysis.env.clone(), depth + 1));
            }
        }
    }

    if cfg.fqbn.is_stm32() {
        if let Some((_, lib_root)) = lib_map.find("SrcWrapper.h") {
            if !resolved_names.contains("SrcWrapper") {
                let sources = enumerate_sources(lib_root, true, arch, false);
                graph.libraries.push(Dependency {
                    kind: DependencyKind::Library,
                    name: "SrcWrapper".to_string(),
                    root: lib_root.to_path_buf(),
                    sources,
                    prebuilt_archives: Vec::new(),
                });
            }
        }
    }

    Ok(graph)
}

fn headers_of(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter(|e| matches!(e.path().extension().and_then(|x| x.to_str()), Some("h") | Some("hpp")))
        .map(|e| e.path().to_path_buf())
        .collect()
}

fn find_prebuilt_archives(lib_root: &Path, arch: &str) -> Vec<PathBuf> {
    WalkDir::new(lib_root)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("a"))
        .filter(|e| {
            let in_arch_subtree = e.path().components().any(|c| {
                sysheaders::KNOWN_ARCHITECTURES.contains(&c.as_os_str().to_string_lossy().as_ref())
            });
            !in_arch_subtree || e.path().components().any(|c| c.as_os_str() == arch)
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// §4.2.4: enumerates the source files belonging to one dependency.
fn enumerate_sources(root: &Path, is_library: bool, arch: &str, is_core: bool) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            if e.file_type().is_dir() {
                let name = e.file_name().to_string_lossy();
                return !EXCLUDED_DIR_NAMES.iter().any(|ex| name.eq_ignore_ascii_case(ex));
            }
            true
        })
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            SOURCE_EXTS.contains(&e.path().extension().and_then(|x| x.to_str()).unwrap_or(""))
        })
        .map(|e| e.path().to_path_buf())
        .collect();

    if is_library {
        candidates.retain(|p| architecture_filter(p, root, arch));
        candidates.retain(|p| !is_code_fragment(p, root));
        candidates = drop_transitively_included(candidates);
    }

    if is_core {
        candidates.retain(|p| p.file_name().and_then(|n| n.to_str()) != Some("variant.cpp"));
    }

    candidates
}

/// Architecture filter (§4.2.4 item 1): files under a known-architecture
/// subdirectory are kept only when that directory matches the configured
/// arch; files outside any architecture subtree are always kept.
fn architecture_filter(path: &Path, root: &Path, arch: &str) -> bool {
    let Ok(rel) = path.strip_prefix(root) else { return true };
    let mut arch_component = None;
    for comp in rel.components() {
        let name = comp.as_os_str().to_string_lossy();
        if sysheaders::KNOWN_ARCHITECTURES.contains(&name.as_ref()) {
            arch_component = Some(name.into_owned());
            break;
        }
    }
    match arch_component {
        None => true,
        Some(found) => found == arch,
    }
}

/// Code-fragment filter (§4.2.4 item 2, calibrated per DESIGN.md open
/// question 2): a file in a subdirectory (not the library root, not
/// `src/`) with zero `#include` lines and zero brace-delimited function
/// bodies is dropped, unless it itself `#include`s a `.c`/`.cpp` (a
/// wrapper, never dropped).
fn is_code_fragment(path: &Path, root: &Path) -> bool {
    let Ok(rel) = path.strip_prefix(root) else { return false };
    let mut components = rel.components();
    let Some(first) = components.next() else { return false };
    let is_top_level = components.next().is_none();
    if is_top_level || first.as_os_str() == "src" {
        return false;
    }

    let Ok(text) = std::fs::read_to_string(path) else { return false };
    if text.lines().any(|l| {
        let t = l.trim();
        t.starts_with("#include") && (t.contains(".c\"") || t.contains(".cpp\""))
    }) {
        return false;
    }

    let has_include = text.lines().any(|l| l.trim_start().starts_with("#include"));
    let has_function_body = has_function_definition(&text);
    !has_include && !has_function_body
}

fn has_function_definition(text: &str) -> bool {
    // Heuristic: `ident (...) {` at brace-depth 0, outside of a class body.
    // Good enough to distinguish a PROGMEM-data-only fragment from a real
    // translation unit without a full C++ parser.
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'(' {
            if let Some(close) = text[i..].find(')') {
                let after = text[i + close + 1..].trim_start();
                if after.starts_with('{') {
                    return true;
                }
            }
        }
        i += 1;
    }
    false
}

/// §4.2.4 item 3: drops files that are themselves `#include`d (by relative
/// name) from a sibling `.c`/`.cpp` in the same candidate set, since they're
/// meant to be textually concatenated rather than compiled standalone.
fn drop_transitively_included(candidates: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut included_names: HashSet<String> = HashSet::new();
    for path in &candidates {
        let Ok(text) = std::fs::read_to_string(path) else { continue };
        for line in text.lines() {
            let t = line.trim();
            if let Some(rest) = t.strip_prefix("#include") {
                if let Some(name) = rest.trim().strip_prefix('"') {
                    if let Some(end) = name.find('"') {
                        let inc = &name[..end];
                        if inc.ends_with(".c") || inc.ends_with(".cpp") {
                            included_names.insert(inc.rsplit('/').next().unwrap_or(inc).to_string());
                        }
                    }
                }
            }
        }
    }
    candidates
        .into_iter()
        .filter(|p| {
            p.file_name()
                .map(|n| !included_names.contains(&n.to_string_lossy().into_owned()))
                .unwrap_or(true)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_detection_requires_no_include_and_no_function() {
        let tmp = std::env::temp_dir().join(format!("anvil-analyzer-test-{}", std::process::id()));
        let sub = tmp.join("data");
        std::fs::create_dir_all(&sub).unwrap();
        let fragment = sub.join("table.cpp");
        std::fs::write(&fragment, "const int kTable[] = {1, 2, 3};\n").unwrap();

        assert!(is_code_fragment(&fragment, &tmp));

        let real = sub.join("impl.cpp");
        std::fs::write(&real, "void doThing() {\n  return;\n}\n").unwrap();
        assert!(!is_code_fragment(&real, &tmp));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn library_root_not_under_src_never_a_fragment() {
        let tmp = std::env::temp_dir().join(format!("anvil-analyzer-root-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        let root_file = tmp.join("lib.cpp");
        std::fs::write(&root_file, "const int x = 1;\n").unwrap();
        assert!(!is_code_fragment(&root_file, &tmp));
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
