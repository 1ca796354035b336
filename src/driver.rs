// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: driver  —  C5 Pipeline Driver
//
//  Grounded on `flash/compile/mod.rs`'s `compile()` orchestrator shape
//  (resolve inputs, dispatch, return a result struct) but expanded to the
//  full 11-step flow (§4.5): prepare the build tree, fan out hooks/recipe
//  assembly/analysis, restore cache hits, emit and run the build graph,
//  store fresh objects, run post-objcopy hooks, measure size.
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::cache::{ObjectCache, WorkItem};
use crate::config::{self, ResolveRequest, ResolvedConfig};
use crate::depgraph::DependencyGraph;
use crate::error::{BuilderError, Result};
use crate::fwdecl;
use crate::graph::{self, BuildGraph};
use crate::hooks;
use crate::macros::Env;
use crate::size::{self, SizeReport};

#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub fqbn: String,
    pub sdk_path: PathBuf,
    pub sketch_path: PathBuf,
    pub build_path: PathBuf,
    pub libraries_path: Vec<PathBuf>,
    pub overrides: Vec<(String, String)>,
    pub board_options: Vec<(String, String)>,
    pub tool_versions: BTreeMap<String, String>,
    pub tools_path: Option<PathBuf>,
    pub cache_root: Option<PathBuf>,
    pub jobs: usize,
    /// Path to the external build executor (a ninja-compatible binary).
    pub executor_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CompileResult {
    pub success: bool,
    pub out_file_path: Option<PathBuf>,
    pub preprocess_time: std::time::Duration,
    pub build_time: std::time::Duration,
    pub total_time: std::time::Duration,
    pub size: Option<SizeReport>,
    pub warnings: Vec<String>,
}

/// C5 entry point: runs the full compile pipeline for one sketch.
pub fn compile(req: &CompileRequest) -> Result<CompileResult> {
    let total_start = Instant::now();

    // 1. Validate the sketch.
    validate_sketch(&req.sketch_path)?;

    // 2. Resolve configuration (C1).
    let resolve_request = ResolveRequest {
        fqbn: req.fqbn.clone(),
        sdk_path: req.sdk_path.clone(),
        sketch_path: req.sketch_path.clone(),
        build_path: req.build_path.clone(),
        libraries_path: req.libraries_path.clone(),
        overrides: req.overrides.clone(),
        board_options: req.board_options.clone(),
        tool_versions: req.tool_versions.clone(),
        tools_path: req.tools_path.clone(),
        jobs: req.jobs,
    };
    let cfg = config::resolve(&resolve_request)?;
    cfg.context.export_to_env();

    for key in &cfg.unresolved {
        warn!("unresolved property after expansion: {key}");
    }

    std::fs::create_dir_all(&req.build_path)?;

    // 3. Prepare the build tree: synthesize the sketch .cpp with forward
    //    declarations and an injected Arduino.h include.
    let preprocess_start = Instant::now();
    let sketch_cpp = prepare_sketch_cpp(&cfg, &req.sketch_path, &req.build_path)?;
    let preprocess_time = preprocess_start.elapsed();

    // 4. Three-way fan-out: prebuild hooks, recipe assembly (already done
    //    by C1), and the C2 analysis pass all run without depending on one
    //    another's output.
    let seed_env = Env::seed(macro_defines_from(&cfg));
    let (hook_result, analysis_result): (Result<()>, Result<DependencyGraph>) = rayon::join(
        || hooks::run_prebuild(&cfg, &req.build_path),
        || crate::analyzer::analyze(&cfg, &sketch_cpp, seed_env.clone()),
    );
    hook_result?;
    let deps = analysis_result?;

    // `DependencyError` is logged and counted, never fatal (§7): a missing
    // library for a non-system header doesn't abort the compile, since the
    // header may be resolved some other way (e.g. a forward declaration).
    let mut dependency_warnings = Vec::new();
    for header in &deps.unresolved_headers {
        let err = BuilderError::Dependency(format!("no library provides header '{header}'"));
        warn!("{err}");
        dependency_warnings.push(err.to_string());
    }

    // 5/6/7. Emit the build graph, restore cache hits, then run the
    //        external executor.
    let build_graph = graph::build_graph(&cfg, &deps, &req.build_path)?;

    let cache = req.cache_root.clone().map(ObjectCache::new);
    if let Some(cache) = &cache {
        restore_cache_hits(&cfg, &build_graph, cache);
    }

    let graph_path = req.build_path.join("build.ninja");
    std::fs::write(&graph_path, build_graph.emit())?;

    let build_start = Instant::now();
    run_executor(&req.executor_path, &graph_path, &req.build_path, cfg.context.tools.build_jobs)?;
    let build_time = build_start.elapsed();

    // 8. Store freshly-built, cacheable objects (never the sketch object).
    if let Some(cache) = &cache {
        store_cache_entries(&cfg, &build_graph, cache);
        if let Err(e) = cache.maintain() {
            warn!("cache maintenance failed: {e}");
        }
    }

    // 9. Post-objcopy hooks.
    hooks::run_postobjcopy(&cfg, &req.build_path)?;
    hooks::run_postbuild(&cfg, &req.build_path)?;

    // 10. Size diagnostics.
    let elf_path = req.build_path.join(format!("{}.elf", cfg.context.paths.sketch_name));
    let size_report = match size::measure(&cfg, &elf_path) {
        Ok(r) => Some(r),
        Err(e) => {
            warn!("size measurement skipped: {e}");
            None
        }
    };

    let mut warnings = Vec::new();
    warnings.extend(cfg.skipped_overrides.iter().map(|k| format!("override skipped (pure reference): {k}")));
    warnings.extend(dependency_warnings);
    if let Some(report) = &size_report {
        warnings.extend(report.warnings.clone());
    }

    let out_file_path = first_objcopy_output(&req.build_path, &cfg.context.paths.sketch_name);

    Ok(CompileResult {
        success: true,
        out_file_path,
        preprocess_time,
        build_time,
        total_time: total_start.elapsed(),
        size: size_report,
        warnings,
    })
}

fn validate_sketch(sketch_path: &Path) -> Result<()> {
    if !sketch_path.exists() {
        return Err(BuilderError::SketchValidation(format!("sketch not found: {}", sketch_path.display())));
    }
    match sketch_path.extension().and_then(|e| e.to_str()) {
        Some("ino") => Ok(()),
        _ => Err(BuilderError::SketchValidation(format!(
            "expected a .ino sketch, got {}",
            sketch_path.display()
        ))),
    }
}

/// Copies the sketch into `<build>/sketch/<name>.cpp`, injecting
/// `#include <Arduino.h>` and any forward declarations synthesized for
/// functions called before their textual definition (§4.5.1).
fn prepare_sketch_cpp(_cfg: &ResolvedConfig, sketch_path: &Path, build_path: &Path) -> Result<PathBuf> {
    let source = std::fs::read_to_string(sketch_path)?;
    let (decls, _) = fwdecl::synthesize(&source);

    let sketch_dir = build_path.join("sketch");
    std::fs::create_dir_all(&sketch_dir)?;

    let name = sketch_path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let cpp_path = sketch_dir.join(format!("{name}.cpp"));

    let mut with_decls = fwdecl::apply(&source, &decls);
    if !with_decls.trim_start().starts_with("#include <Arduino.h>") {
        with_decls = format!("#include <Arduino.h>\n{with_decls}");
    }

    let mut f = std::fs::File::create(&cpp_path)?;
    f.write_all(with_decls.as_bytes())?;
    Ok(cpp_path)
}

/// Seeds the macro environment from `build.extra_flags`-style `-D` tokens
/// already expanded into the resolved config (§3 seed set).
fn macro_defines_from(cfg: &ResolvedConfig) -> Vec<(String, Option<String>)> {
    let Some(flags) = cfg.get_expanded("build.extra_flags") else { return Vec::new() };
    flags
        .split_whitespace()
        .filter_map(|tok| tok.strip_prefix("-D"))
        .map(|def| match def.split_once('=') {
            Some((k, v)) => (k.to_string(), Some(v.to_string())),
            None => (def.to_string(), None),
        })
        .collect()
}

fn restore_cache_hits(cfg: &ResolvedConfig, graph: &BuildGraph, cache: &ObjectCache) {
    let compiler_path = cfg.context.tools.compiler_gpp_path.clone();
    graph.cacheable_objects.par_iter().for_each(|(src, obj, args)| {
        let item = WorkItem { compiler_path: compiler_path.clone(), args: args.clone(), source_path: src.clone() };
        let key = item.cache_key();
        match cache.restore(&key, src, obj) {
            Ok(true) => debug!("cache hit: {}", src.display()),
            Ok(false) => debug!("cache miss: {}", src.display()),
            Err(e) => warn!("cache restore failed for {}: {e}", src.display()),
        }
    });
}

fn store_cache_entries(cfg: &ResolvedConfig, graph: &BuildGraph, cache: &ObjectCache) {
    let compiler_path = cfg.context.tools.compiler_gpp_path.clone();
    graph.cacheable_objects.par_iter().for_each(|(src, obj, args)| {
        if !obj.exists() {
            return;
        }
        let item = WorkItem { compiler_path: compiler_path.clone(), args: args.clone(), source_path: src.clone() };
        let key = item.cache_key();
        if let Err(e) = cache.store(&item, &key, obj) {
            warn!("cache store failed for {}: {e}", src.display());
        }
    });
}

/// Runs the external build executor (a ninja-compatible binary) against
/// the emitted graph, parsing its line-oriented progress output into log
/// events instead of only waiting for the subprocess to exit (§9
/// redesign: subprocess-as-promise replaced by a parsed progress stream).
fn run_executor(executor_path: &Path, graph_path: &Path, cwd: &Path, jobs: usize) -> Result<()> {
    let mut child = Command::new(executor_path)
        .arg("-f")
        .arg(graph_path)
        .arg("-j")
        .arg(jobs.to_string())
        .current_dir(cwd)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| BuilderError::Build { code: None, output: e.to_string() })?;

    if let Some(stdout) = child.stdout.take() {
        for line in std::io::BufRead::lines(std::io::BufReader::new(stdout)).flatten() {
            if let Some(progress) = parse_progress_line(&line) {
                info!("{progress}");
            } else {
                debug!("{line}");
            }
        }
    }

    let status = child.wait().map_err(|e| BuilderError::Build { code: None, output: e.to_string() })?;
    if status.success() {
        Ok(())
    } else {
        let stderr = child
            .stderr
            .take()
            .map(|mut s| {
                let mut buf = String::new();
                let _ = std::io::Read::read_to_string(&mut s, &mut buf);
                buf
            })
            .unwrap_or_default();
        Err(BuilderError::Build { code: status.code(), output: stderr })
    }
}

/// Recognizes ninja's `[N/M] <description>` progress lines.
fn parse_progress_line(line: &str) -> Option<String> {
    let rest = line.trim_start().strip_prefix('[')?;
    let (counts, desc) = rest.split_once(']')?;
    counts.split_once('/')?;
    Some(format!("[{counts}] {}", desc.trim()))
}

fn first_objcopy_output(build_path: &Path, sketch_name: &str) -> Option<PathBuf> {
    for ext in ["hex", "bin", "eep"] {
        let candidate = build_path.join(format!("{sketch_name}.{ext}"));
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_line_recognized() {
        assert_eq!(parse_progress_line("[3/10] CXX sketch.cpp"), Some("[3/10] CXX sketch.cpp".to_string()));
        assert_eq!(parse_progress_line("plain compiler output"), None);
    }

    #[test]
    fn validate_sketch_rejects_non_ino() {
        let tmp = std::env::temp_dir().join(format!("anvil-driver-test-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        let bad = tmp.join("notasketch.txt");
        std::fs::write(&bad, "x").unwrap();
        assert!(validate_sketch(&bad).is_err());
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
