// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: config_file  —  §12 optional project configuration
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;

/// Optional `builder.toml` sitting next to a sketch. Any field left unset
/// falls back to the CLI defaults; CLI flags always take precedence over
/// values loaded from here (§12).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfig {
    pub fqbn: Option<String>,
    pub sdk_path: Option<PathBuf>,
    pub build_path: Option<PathBuf>,
    #[serde(default)]
    pub libraries: Vec<PathBuf>,
    #[serde(default)]
    pub overrides: Vec<KeyValue>,
    #[serde(default)]
    pub board_options: Vec<KeyValue>,
    pub jobs: Option<usize>,
    pub cache_root: Option<PathBuf>,
    pub executor_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl ProjectConfig {
    /// Loads `builder.toml` from `dir` if present; returns the default
    /// (all-`None`) config otherwise — it's optional, not an error to omit.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join("builder.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        let cfg: ProjectConfig = toml::from_str(&text)
            .map_err(|e| crate::error::BuilderError::Other(format!("invalid builder.toml: {e}")))?;
        Ok(cfg)
    }

    pub fn overrides_as_pairs(&self) -> Vec<(String, String)> {
        self.overrides.iter().map(|kv| (kv.key.clone(), kv.value.clone())).collect()
    }

    pub fn board_options_as_pairs(&self) -> Vec<(String, String)> {
        self.board_options.iter().map(|kv| (kv.key.clone(), kv.value.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = std::env::temp_dir().join(format!("anvil-cfgfile-missing-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        let cfg = ProjectConfig::load(&tmp).unwrap();
        assert!(cfg.fqbn.is_none());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parses_present_file() {
        let tmp = std::env::temp_dir().join(format!("anvil-cfgfile-present-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        std::fs::write(
            tmp.join("builder.toml"),
            "fqbn = \"arduino:avr:uno\"\njobs = 4\n\n[[overrides]]\nkey = \"build.extra_flags\"\nvalue = \"-DDEBUG\"\n",
        )
        .unwrap();
        let cfg = ProjectConfig::load(&tmp).unwrap();
        assert_eq!(cfg.fqbn.as_deref(), Some("arduino:avr:uno"));
        assert_eq!(cfg.jobs, Some(4));
        assert_eq!(cfg.overrides_as_pairs(), vec![("build.extra_flags".to_string(), "-DDEBUG".to_string())]);
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
