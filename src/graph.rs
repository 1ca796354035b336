// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: graph  —  C3 Build-Graph Emitter
//
//  Grounded on `flash/compile/mod.rs`'s pipeline-orchestrator shape, but
//  the actual emission target is changed per §4.3: instead of invoking a
//  toolchain directly, emit a ninja-style build graph text that an
//  external executor consumes (§9 redesign — sub-process-as-promise is
//  replaced by an emitted graph plus a later parsed progress stream).
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};

use crate::config::ResolvedConfig;
use crate::depgraph::DependencyGraph;
use crate::error::{BuilderError, Result};

const SKETCH_POOL: &str = "sketch_pool";
const COMPILE_POOL: &str = "compile_pool";

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub command: String,
}

#[derive(Debug, Clone)]
pub struct BuildStatement {
    pub rule: String,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub pool: Option<String>,
}

#[derive(Debug, Default)]
pub struct BuildGraph {
    pub pools: Vec<(String, usize)>,
    pub rules: Vec<Rule>,
    pub statements: Vec<BuildStatement>,
    /// Object files produced for sources other than the sketch, in the
    /// order the graph was built, paired with the compiler flags the
    /// object was built with — the driver uses this to decide what's
    /// eligible for cache storage (§4.4: sketch objects are never cached)
    /// and to build the cache key's `args` component (§3 WorkItem identity:
    /// the key must be a function of `(compilerPath, sortedArgs, source)`,
    /// not of the source path alone).
    pub cacheable_objects: Vec<(PathBuf, PathBuf, Vec<String>)>,
    pub final_object: Option<PathBuf>,
}

impl BuildGraph {
    /// Renders the graph as ninja build-file text.
    pub fn emit(&self) -> String {
        let mut out = String::new();
        for (name, depth) in &self.pools {
            out.push_str(&format!("pool {name}\n  depth = {depth}\n\n"));
        }
        for rule in &self.rules {
            out.push_str(&format!("rule {}\n  command = {}\n\n", rule.name, rule.command));
        }
        for stmt in &self.statements {
            let outputs = join_paths(&stmt.outputs);
            let inputs = join_paths(&stmt.inputs);
            out.push_str(&format!("build {outputs}: {} {inputs}\n", stmt.rule));
            if let Some(pool) = &stmt.pool {
                out.push_str(&format!("  pool = {pool}\n"));
            }
            out.push('\n');
        }
        out
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths.iter().map(|p| quote_if_needed(&p.to_string_lossy())).collect::<Vec<_>>().join(" ")
}

fn quote_if_needed(s: &str) -> String {
    if s.contains(' ') {
        format!("\"{s}\"")
    } else {
        s.to_string()
    }
}

/// Substitutes the runtime-placeholder tokens a recipe pattern can still
/// carry after C1 (§3, §4.3 — these are left as `{NAME}` by
/// `PropertyMap::expand`, same brace syntax as every other property) into
/// ninja's `$in`/`$out` variables plus literal values resolved from `cfg`.
fn substitute_placeholders(pattern: &str, include_paths: &str, ld_flags: &str) -> String {
    pattern
        .replace("{INCLUDE_PATHS}", include_paths)
        .replace("{SOURCE_FILE_PATH}", "$in")
        .replace("{OBJECT_FILE_PATH}", "$out")
        .replace("{OBJECT_FILE_PATHS}", "$in")
        .replace("{LD_FLAGS}", ld_flags)
}

fn include_paths_for(cfg: &ResolvedConfig, extra: &[&Path]) -> String {
    let mut parts = vec![format!("-I{}", cfg.context.paths.sdk_core_path.display())];
    if !cfg.context.paths.sdk_variant_path.as_os_str().is_empty() {
        parts.push(format!("-I{}", cfg.context.paths.sdk_variant_path.display()));
    }
    for lib in &cfg.context.paths.libraries_path {
        parts.push(format!("-I{}", lib.display()));
    }
    for extra_path in extra {
        parts.push(format!("-I{}", extra_path.display()));
    }
    parts.join(" ")
}

fn required_recipe(cfg: &ResolvedConfig, name: &str) -> Result<String> {
    cfg.recipe(name)
        .map(str::to_string)
        .ok_or_else(|| BuilderError::Build { code: None, output: format!("missing recipe.{name}") })
}

fn object_path_for(build_path: &Path, src: &Path) -> PathBuf {
    let stem = src.to_string_lossy().replace(['/', '\\', ':'], "_");
    build_path.join(format!("{stem}.o"))
}

fn compile_rule_for(src: &Path) -> &'static str {
    match src.extension().and_then(|e| e.to_str()) {
        Some("c") => "compile_c",
        Some("S") | Some("s") => "compile_s",
        _ => "compile_cpp",
    }
}

/// Extracts the flag tokens from a rule's already-substituted command
/// string, dropping ninja's `$in`/`$out` variables — what's left is the
/// per-language compiler flags (includes, defines, optimization level)
/// that feed the cache key's `args` component.
fn rule_args(command: &str) -> Vec<String> {
    command.split_whitespace().filter(|tok| *tok != "$in" && *tok != "$out").map(str::to_string).collect()
}

/// Builds the full graph for one compile run: compile rules for every
/// dependency's sources, archive the core, link, and objcopy to the
/// configured output formats.
pub fn build_graph(cfg: &ResolvedConfig, deps: &DependencyGraph, build_path: &Path) -> Result<BuildGraph> {
    let ld_flags = cfg.get_expanded("compiler.c.elf.extra_flags").unwrap_or_default();
    let include_paths = include_paths_for(cfg, &[]);

    let cpp_recipe = required_recipe(cfg, "cpp.o.pattern")?;
    let c_recipe = required_recipe(cfg, "c.o.pattern")?;
    let s_recipe = cfg.recipe("S.o.pattern").map(str::to_string).unwrap_or_else(|| cpp_recipe.clone());
    let ar_recipe = required_recipe(cfg, "ar.pattern")?;
    let link_recipe = required_recipe(cfg, "c.combine.pattern")?;

    let cpp_command = substitute_placeholders(&cpp_recipe, &include_paths, &ld_flags);
    let c_command = substitute_placeholders(&c_recipe, &include_paths, &ld_flags);
    let s_command = substitute_placeholders(&s_recipe, &include_paths, &ld_flags);
    let cpp_args = rule_args(&cpp_command);
    let c_args = rule_args(&c_command);
    let s_args = rule_args(&s_command);

    let mut graph = BuildGraph {
        pools: vec![(SKETCH_POOL.to_string(), 1), (COMPILE_POOL.to_string(), cfg.context.tools.build_jobs.max(1))],
        rules: vec![
            Rule { name: "compile_cpp".to_string(), command: cpp_command },
            Rule { name: "compile_c".to_string(), command: c_command },
            Rule { name: "compile_s".to_string(), command: s_command },
            Rule { name: "archive".to_string(), command: substitute_placeholders(&ar_recipe, &include_paths, &ld_flags) },
            Rule { name: "link".to_string(), command: substitute_placeholders(&link_recipe, &include_paths, &ld_flags) },
        ],
        statements: Vec::new(),
        cacheable_objects: Vec::new(),
        final_object: None,
    };

    let mut all_objects = Vec::new();
    let mut core_objects = Vec::new();

    for dep in deps.all_deps() {
        let is_sketch = matches!(dep.kind, crate::depgraph::DependencyKind::Sketch);
        let pool = if is_sketch { SKETCH_POOL } else { COMPILE_POOL };
        for src in &dep.sources {
            let obj = object_path_for(build_path, src);
            let rule = compile_rule_for(src);
            graph.statements.push(BuildStatement {
                rule: rule.to_string(),
                inputs: vec![src.clone()],
                outputs: vec![obj.clone()],
                pool: Some(pool.to_string()),
            });
            if is_sketch {
                graph.final_object = Some(obj.clone());
            } else {
                let args = match rule {
                    "compile_c" => c_args.clone(),
                    "compile_s" => s_args.clone(),
                    _ => cpp_args.clone(),
                };
                graph.cacheable_objects.push((src.clone(), obj.clone(), args));
            }
            if matches!(dep.kind, crate::depgraph::DependencyKind::Core) {
                core_objects.push(obj.clone());
            } else {
                // Variant objects link as standalone loose objects alongside
                // the sketch, never archived into `core.a` (§3 order
                // constraint 2).
                all_objects.push(obj.clone());
            }
        }
    }

    if let Some(sketch) = &deps.sketch {
        if let Some(obj) = sketch.sources.first().map(|s| object_path_for(build_path, s)) {
            all_objects.push(obj);
        }
    }

    for dep in deps.all_deps() {
        all_objects.extend(dep.prebuilt_archives.iter().cloned());
    }

    let core_archive = build_path.join("core.a");
    if !core_objects.is_empty() {
        graph.statements.push(BuildStatement {
            rule: "archive".to_string(),
            inputs: core_objects,
            outputs: vec![core_archive.clone()],
            pool: None,
        });
    }

    let sketch_name = &cfg.context.paths.sketch_name;
    let elf_path = build_path.join(format!("{sketch_name}.elf"));
    let mut link_inputs = all_objects;
    link_inputs.push(core_archive);
    graph.statements.push(BuildStatement {
        rule: "link".to_string(),
        inputs: link_inputs,
        outputs: vec![elf_path.clone()],
        pool: None,
    });

    let objcopy_keys: Vec<String> = cfg
        .properties
        .keys()
        .filter(|k| k.starts_with("recipe.objcopy.") && k.ends_with(".pattern"))
        .cloned()
        .collect();
    for key in objcopy_keys {
        let suffix = key
            .strip_prefix("recipe.objcopy.")
            .and_then(|s| s.strip_suffix(".pattern"))
            .unwrap_or_default();
        let recipe = match cfg.recipe(&format!("objcopy.{suffix}.pattern")) {
            Some(r) => r.to_string(),
            None => continue,
        };
        let ext = output_extension(suffix);
        let out_path = build_path.join(format!("{sketch_name}.{ext}"));
        let rule_name = format!("objcopy_{suffix}");
        graph.rules.push(Rule { name: rule_name.clone(), command: substitute_placeholders(&recipe, &include_paths, &ld_flags) });
        graph.statements.push(BuildStatement {
            rule: rule_name,
            inputs: vec![elf_path.clone()],
            outputs: vec![out_path],
            pool: None,
        });
    }

    if graph.final_object.is_none() {
        return Err(BuilderError::Build { code: None, output: "no sketch object produced".to_string() });
    }

    Ok(graph)
}

fn output_extension(suffix: &str) -> &str {
    if suffix.contains("hex") {
        "hex"
    } else if suffix.contains("bin") {
        "bin"
    } else if suffix.contains("eep") {
        "eep"
    } else {
        "out"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_paths_with_spaces() {
        assert_eq!(quote_if_needed("no_spaces"), "no_spaces");
        assert_eq!(quote_if_needed("has spaces"), "\"has spaces\"");
    }

    #[test]
    fn substitutes_io_placeholders() {
        let out = substitute_placeholders("g++ -c {SOURCE_FILE_PATH} -o {OBJECT_FILE_PATH}", "-Iinc", "");
        assert_eq!(out, "g++ -c $in -o $out");
    }

    #[test]
    fn output_extension_matches_recipe_key() {
        assert_eq!(output_extension("hex"), "hex");
        assert_eq!(output_extension("bin"), "bin");
        assert_eq!(output_extension("eep"), "eep");
    }
}
