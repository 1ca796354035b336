// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: size  —  firmware size diagnostics
// ─────────────────────────────────────────────────────────────────────────────

use std::path::Path;
use std::process::Command;

use log::info;
use regex::RegexBuilder;

use crate::config::ResolvedConfig;
use crate::error::{BuilderError, Result};

const DATA_SECTION_WARN_RATIO: f64 = 0.75;

#[derive(Debug, Clone, Default)]
pub struct SizeReport {
    pub program_bytes: u64,
    pub data_bytes: u64,
    pub program_max: Option<u64>,
    pub data_max: Option<u64>,
    pub warnings: Vec<String>,
}

/// Runs `recipe.size.pattern` against `elf_path` and applies
/// `recipe.size.regex`/`recipe.size.regex.data` to the output (each
/// matched line's capture group is summed, matching how avr-size's
/// per-section rows are totaled).
pub fn measure(cfg: &ResolvedConfig, elf_path: &Path) -> Result<SizeReport> {
    let pattern = cfg.get("recipe.size.pattern").ok_or_else(|| {
        BuilderError::Size("no recipe.size.pattern in resolved configuration".to_string())
    })?;

    if !elf_path.exists() {
        return Err(BuilderError::Size(format!("elf not found at {}", elf_path.display())));
    }
    let cmd_line = pattern
        .replace("{build.path}", &cfg.context.paths.build_path.display().to_string())
        .replace("{build.project_name}", &cfg.context.paths.sketch_name);
    let mut parts = cmd_line.split_whitespace();
    let program = parts.next().ok_or_else(|| BuilderError::Size("empty size recipe".to_string()))?;
    let args: Vec<&str> = parts.collect();

    let output = Command::new(program)
        .args(&args)
        .output()
        .map_err(|e| BuilderError::Size(format!("failed to run size tool: {e}")))?;
    let text = String::from_utf8_lossy(&output.stdout).into_owned();

    let program_regex = cfg.get("recipe.size.regex");
    let data_regex = cfg.get("recipe.size.regex.data");

    let program_bytes = program_regex.map(|r| sum_matches(&text, r)).unwrap_or(0);
    let data_bytes = data_regex.map(|r| sum_matches(&text, r)).unwrap_or(0);

    let program_max = cfg.upload_maximum_size();
    let data_max = cfg.upload_maximum_data_size();

    let mut warnings = Vec::new();
    if let Some(max) = program_max {
        if program_bytes > max {
            warnings.push(format!(
                "program size ({program_bytes} bytes) exceeds the maximum for this board ({max} bytes)"
            ));
        }
    }
    if let Some(max) = data_max {
        let ratio = data_bytes as f64 / max as f64;
        if data_bytes > max {
            warnings.push(format!(
                "dynamic memory usage ({data_bytes} bytes) exceeds the maximum for this board ({max} bytes); stability problems are likely"
            ));
        } else if ratio >= DATA_SECTION_WARN_RATIO {
            warnings.push(format!(
                "low memory available, stability problems may occur ({data_bytes} of {max} bytes used)"
            ));
        }
    }

    for w in &warnings {
        info!("size: {w}");
    }

    Ok(SizeReport { program_bytes, data_bytes, program_max, data_max, warnings })
}

/// Applies `pattern` (multiline) to `text` and sums every numeric capture
/// group across all matches — this is how avr-size's per-section rows
/// (`.text`/`.data`/`.bss`/`.rodata`) are totaled into one figure.
fn sum_matches(text: &str, pattern: &str) -> u64 {
    let Ok(re) = RegexBuilder::new(pattern).multi_line(true).build() else { return 0 };
    re.captures_iter(text).filter_map(|caps| caps.get(1)?.as_str().parse::<u64>().ok()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_section_sizes() {
        let text = ".text          1000   0   0\n.data            20   4   0\n.bss             10   0   0\n";
        let text_bytes = sum_matches(text, r"^(?:\.text|\.data|\.rodata)\s+(\d+)");
        assert_eq!(text_bytes, 1020);
    }

    #[test]
    fn data_section_only_matches_data_and_bss() {
        let text = ".text          1000   0   0\n.data            20   4   0\n.bss             10   0   0\n";
        let data_bytes = sum_matches(text, r"^(?:\.data|\.bss)\s+(\d+)");
        assert_eq!(data_bytes, 30);
    }
}
