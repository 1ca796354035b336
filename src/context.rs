// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: context
//
//  Replaces the ambient `process.env`-as-message-bus pattern (see DESIGN.md
//  redesign notes): every later stage receives the paths and tool locations
//  it needs as an explicit value instead of reading them back out of the
//  environment.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;

/// Filesystem locations resolved by the Configuration Resolver (C1) and
/// consumed by the Analyzer (C2), Emitter (C3), and Driver (C5).
#[derive(Debug, Clone, Default)]
pub struct PathBag {
    pub sketch_name: String,
    pub sketch_path: PathBuf,
    pub sketch_dir_path: PathBuf,
    pub build_path: PathBuf,
    pub sdk_path: PathBuf,
    pub sdk_core_path: PathBuf,
    pub sdk_variant_path: PathBuf,
    pub sdk_core_libraries_path: PathBuf,
    pub libraries_path: Vec<PathBuf>,
}

/// Tool binaries and target identity resolved by C1.
#[derive(Debug, Clone, Default)]
pub struct ToolBag {
    pub compiler_path: PathBuf,
    pub compiler_gpp_path: PathBuf,
    pub compiler_ar_path: PathBuf,
    pub compiler_objcopy_path: PathBuf,
    pub build_mcu: String,
    pub package: String,
    pub platform: String,
    pub build_jobs: usize,
    /// Present only for architectures that need it (ESP32/ESP8266).
    pub esptool_py_path: Option<PathBuf>,
    pub esp32_arduino_libs_path: Option<PathBuf>,
}

/// The value threaded through C1 → C2 → C3 → C5 → C6 in place of ambient
/// process-global state.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub paths: PathBag,
    pub tools: ToolBag,
}

impl Context {
    /// `LIBRARIES_PATH` joined with the host path-list separator.
    pub fn libraries_path_joined(&self) -> String {
        let sep = if cfg!(windows) { ';' } else { ':' };
        self.paths
            .libraries_path
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(&sep.to_string())
    }

    /// Materializes the subset of the `Context` that downstream subprocesses
    /// (hooks, the external build executor) expect as real environment
    /// variables, per §6 of the spec. This is the one place ambient process
    /// environment is touched — everything inside this crate reads `Context`
    /// directly instead.
    pub fn export_to_env(&self) {
        std::env::set_var("SKETCH_NAME", &self.paths.sketch_name);
        std::env::set_var("SKETCH_PATH", &self.paths.sketch_path);
        std::env::set_var("SKETCH_DIR_PATH", &self.paths.sketch_dir_path);
        std::env::set_var("BUILD_PATH", &self.paths.build_path);
        std::env::set_var("BUILD_JOBS", self.tools.build_jobs.to_string());
        std::env::set_var("SDK_PATH", &self.paths.sdk_path);
        std::env::set_var("SDK_CORE_PATH", &self.paths.sdk_core_path);
        std::env::set_var("SDK_VARIANT_PATH", &self.paths.sdk_variant_path);
        std::env::set_var("SDK_CORE_LIBRARIES_PATH", &self.paths.sdk_core_libraries_path);
        std::env::set_var("LIBRARIES_PATH", self.libraries_path_joined());
        std::env::set_var("COMPILER_PATH", &self.tools.compiler_path);
        std::env::set_var("COMPILER_GPP_PATH", &self.tools.compiler_gpp_path);
        std::env::set_var("BUILD_MCU", &self.tools.build_mcu);
        std::env::set_var("package", &self.tools.package);
        std::env::set_var("platform", &self.tools.platform);
        if let Some(p) = &self.tools.esptool_py_path {
            std::env::set_var("ESPTOOL_PY_PATH", p);
        }
        if let Some(p) = &self.tools.esp32_arduino_libs_path {
            std::env::set_var("ESP32_ARDUINO_LIBS_PATH", p);
        }
    }
}
