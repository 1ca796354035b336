// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: config  —  C1 Configuration Resolver
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::context::{Context, PathBag, ToolBag};
use crate::error::{BuilderError, Result};
use crate::fqbn::Fqbn;
use crate::property::{Property, PropertyMap};

/// Caller-supplied inputs to C1 (§4.1).
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    pub fqbn: String,
    pub sdk_path: PathBuf,
    pub sketch_path: PathBuf,
    pub build_path: PathBuf,
    pub libraries_path: Vec<PathBuf>,
    pub overrides: Vec<(String, String)>,
    pub board_options: Vec<(String, String)>,
    pub tool_versions: BTreeMap<String, String>,
    /// Root directory holding installed tool versions (`<tools_path>/<tool>/<version>`),
    /// when the caller doesn't want tool paths resolved from under `sdk_path` alone.
    pub tools_path: Option<PathBuf>,
    pub jobs: usize,
}

/// The fully-expanded property map plus the `Context` later stages consume.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub fqbn: Fqbn,
    pub properties: BTreeMap<String, Property>,
    pub context: Context,
    /// Keys whose override was skipped because the current value was a pure
    /// `{x}` reference (§4.1 step 3).
    pub skipped_overrides: Vec<String>,
    /// Keys still unresolved after expansion, excluding documented runtime
    /// placeholders (a warning per invariant 1, not an error).
    pub unresolved: Vec<String>,
}

impl ResolvedConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|p| p.as_str())
    }

    pub fn get_expanded(&self, key: &str) -> Option<&str> {
        match self.properties.get(key) {
            Some(Property::Expanded(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn compiler_tool(&self, name: &str) -> Option<&str> {
        self.get_expanded(&format!("compiler.{name}.cmd")).or_else(|| self.get_expanded(&format!("compiler.{name}")))
    }

    pub fn recipe(&self, name: &str) -> Option<&str> {
        self.get(&format!("recipe.{name}"))
    }

    pub fn upload_maximum_size(&self) -> Option<u64> {
        self.get_expanded("upload.maximum_size").and_then(|v| v.parse().ok())
    }

    pub fn upload_maximum_data_size(&self) -> Option<u64> {
        self.get_expanded("upload.maximum_data_size").and_then(|v| v.parse().ok())
    }
}

/// C1 entry point: resolve an FQBN + overrides into a `ResolvedConfig`.
pub fn resolve(req: &ResolveRequest) -> Result<ResolvedConfig> {
    let fqbn = Fqbn::parse(&req.fqbn)?;

    // 1. Locate descriptors.
    let platform_txt = find_descriptor(&req.sdk_path, "platform.txt")?;
    let boards_txt = find_descriptor(&req.sdk_path, "boards.txt")?;

    let boards_text = std::fs::read_to_string(&boards_txt)?;
    let platform_text = std::fs::read_to_string(&platform_txt)?;

    // 2. Load the board slice.
    let full_boards = PropertyMap::parse_properties(&boards_text);
    let mut board_map = full_boards.slice_prefixed(&format!("{}.", fqbn.board_id));
    if board_map.keys().next().is_none() {
        return Err(BuilderError::UnknownBoard(fqbn.board_id.clone()));
    }

    // Board-options flow in as additional overrides before the main override
    // pass, since they're documented as "merged into build properties" (§6).
    let mut all_overrides = req.board_options.clone();
    all_overrides.extend(req.overrides.iter().cloned());

    // 3. Apply overrides (skip pure `{x}` references).
    let skipped = board_map.apply_overrides(&all_overrides);

    // 4. Partition-scheme secondary effects.
    if let Some((_, partitions_value)) = all_overrides.iter().find(|(k, _)| k == "build.partitions") {
        apply_partition_scheme_effects(&mut board_map, &full_boards, &fqbn.board_id, partitions_value);
    }

    // 5. Load platform lines.
    let mut platform_map = PropertyMap::parse_properties(&platform_text);

    // 6. Windows (host-suffix) override promotion.
    platform_map.promote_host_suffix();
    board_map.promote_host_suffix();

    // 7. Merge board + extras into platform (board/extras win only for
    //    unset platform keys).
    let extras = build_extras(req, &platform_txt);
    platform_map.merge_under(&board_map, &extras);

    // 8. Iteratively expand `{token}` references.
    let unresolved = platform_map.expand();

    let properties = platform_map.into_properties();

    // 9. Publish the typed Context.
    let sdk_core_path = platform_txt.parent().map(|p| p.to_path_buf()).unwrap_or_default();
    let context = Context {
        paths: PathBag {
            sketch_name: req
                .sketch_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            sketch_path: req.sketch_path.clone(),
            sketch_dir_path: req.sketch_path.parent().map(|p| p.to_path_buf()).unwrap_or_default(),
            build_path: req.build_path.clone(),
            sdk_path: req.sdk_path.clone(),
            sdk_core_path: sdk_core_path.clone(),
            sdk_variant_path: properties
                .get("build.variant")
                .map(|p| sdk_core_path.join("variants").join(p.as_str()))
                .unwrap_or_default(),
            sdk_core_libraries_path: sdk_core_path.join("libraries"),
            libraries_path: req.libraries_path.clone(),
        },
        tools: ToolBag {
            compiler_path: properties.get("compiler.path").map(|p| PathBuf::from(p.as_str())).unwrap_or_default(),
            compiler_gpp_path: properties
                .get("compiler.cpp.cmd")
                .map(|p| PathBuf::from(p.as_str()))
                .unwrap_or_default(),
            compiler_ar_path: properties.get("compiler.ar.cmd").map(|p| PathBuf::from(p.as_str())).unwrap_or_default(),
            compiler_objcopy_path: properties
                .get("compiler.objcopy.cmd")
                .map(|p| PathBuf::from(p.as_str()))
                .unwrap_or_default(),
            build_mcu: properties.get("build.mcu").map(|p| p.as_str().to_string()).unwrap_or_default(),
            package: fqbn.package.clone(),
            platform: fqbn.platform.clone(),
            build_jobs: if req.jobs == 0 { num_cpus_fallback() } else { req.jobs },
            esptool_py_path: if fqbn.platform.starts_with("esp") {
                Some(PathBuf::from("esptool.py"))
            } else {
                None
            },
            esp32_arduino_libs_path: None,
        },
    };

    Ok(ResolvedConfig { fqbn, properties, context, skipped_overrides: skipped, unresolved })
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn find_descriptor(sdk_path: &Path, filename: &'static str) -> Result<PathBuf> {
    WalkDir::new(sdk_path)
        .into_iter()
        .flatten()
        .find(|e| e.file_type().is_file() && e.file_name().to_str() == Some(filename))
        .map(|e| e.path().to_path_buf())
        .ok_or_else(|| BuilderError::DescriptorMissing {
            what: filename,
            sdk_path: sdk_path.display().to_string(),
        })
}

/// §4.1 step 4: when `build.partitions` is overridden, mirror the matching
/// `menu.PartitionScheme.<S>.upload.{maximum_size,extra_flags}` onto the
/// board map.
fn apply_partition_scheme_effects(board_map: &mut PropertyMap, full_boards: &PropertyMap, board_id: &str, value: &str) {
    let prefix = format!("{board_id}.menu.PartitionScheme.");
    let matches: Vec<String> = full_boards
        .iter()
        .filter(|(k, v)| k.starts_with(&prefix) && k.ends_with(".build.partitions") && *v == value)
        .map(|(k, _)| k.to_string())
        .collect();

    for key in matches {
        // key = "<board>.menu.PartitionScheme.<S>.build.partitions"
        let Some(scheme_part) = key.strip_prefix(&prefix) else { continue };
        let Some(scheme) = scheme_part.strip_suffix(".build.partitions") else { continue };

        let max_size_key = format!("{prefix}{scheme}.upload.maximum_size");
        if let Some(v) = full_boards.get(&max_size_key) {
            board_map.set("upload.maximum_size", v);
        }
        let extra_flags_key = format!("{prefix}{scheme}.upload.extra_flags");
        if let Some(v) = full_boards.get(&extra_flags_key) {
            board_map.set("upload.extra_flags", v);
        }
    }
}

fn build_extras(req: &ResolveRequest, platform_txt: &Path) -> PropertyMap {
    let mut extras = PropertyMap::new();
    let sdk_core_path = platform_txt.parent().map(|p| p.to_path_buf()).unwrap_or_default();
    extras.set("runtime.platform.path", sdk_core_path.display().to_string());
    extras.set("build.source.path", req.sketch_path.parent().unwrap_or(Path::new(".")).display().to_string());
    extras.set("build.path", req.build_path.display().to_string());
    extras.set("includes", "{INCLUDE_PATHS}");
    for (tool, version) in &req.tool_versions {
        let path_value = match &req.tools_path {
            Some(root) => root.join(tool).join(version).display().to_string(),
            None => version.clone(),
        };
        extras.set(format!("runtime.tools.{tool}.path"), path_value);
    }
    extras
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        let mut platform = std::fs::File::create(dir.join("platform.txt")).unwrap();
        writeln!(
            platform,
            "compiler.path={{runtime.platform.path}}/bin/\ncompiler.cpp.cmd=avr-g++\ncompiler.cpp.cmd.windows=avr-g++.exe\nbuild.mcu={{build.mcu}}\nupload.maximum_size=32256\n"
        )
        .unwrap();
        let mut boards = std::fs::File::create(dir.join("boards.txt")).unwrap();
        writeln!(boards, "uno.build.mcu=atmega328p\nuno.name=Arduino Uno\n").unwrap();
    }

    #[test]
    fn resolves_trivial_fqbn() {
        let tmp = std::env::temp_dir().join(format!("anvil-cfg-test-{}", std::process::id()));
        write_fixture(&tmp);

        let req = ResolveRequest {
            fqbn: "arduino:avr:uno".to_string(),
            sdk_path: tmp.clone(),
            sketch_path: tmp.join("Blink.ino"),
            build_path: tmp.join("build"),
            ..Default::default()
        };

        let cfg = resolve(&req).unwrap();
        assert_eq!(cfg.fqbn.board_id, "uno");
        assert_eq!(cfg.get_expanded("upload.maximum_size"), Some("32256"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn unknown_board_errors() {
        let tmp = std::env::temp_dir().join(format!("anvil-cfg-test-unknown-{}", std::process::id()));
        write_fixture(&tmp);

        let req = ResolveRequest {
            fqbn: "arduino:avr:doesnotexist".to_string(),
            sdk_path: tmp.clone(),
            ..Default::default()
        };

        assert!(matches!(resolve(&req), Err(BuilderError::UnknownBoard(_))));
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
