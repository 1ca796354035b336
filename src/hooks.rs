// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: hooks  —  C6 Hook Runner
//
//  Grounded on the subprocess-dispatch idiom in `flash/flash/avrdude.rs`
//  (building an argv vector, running it, capturing status/output) but
//  applied to the platform.txt hook recipes instead of a fixed tool, and
//  dispatched through a shell per §4.6 rather than exec'd directly.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::Path;
use std::process::Command;

use log::{debug, warn};

use crate::config::ResolvedConfig;
use crate::error::{BuilderError, Result};

/// Hook recipe keys run in order at each pipeline stage (§4.6).
const PREBUILD_STAGES: &[&str] = &["recipe.hooks.prebuild"];
const POSTBUILD_STAGES: &[&str] = &["recipe.hooks.postbuild"];
const POSTOBJCOPY_STAGES: &[&str] = &["recipe.hooks.objcopy.postobjcopy"];

/// Patterns whose non-zero exit is tolerated rather than aborting the
/// pipeline — e.g. optional `partitions.csv` copy hooks some ESP32 cores
/// ship that fail harmlessly when the file is absent (§4.6).
const NON_FATAL_SUBSTRINGS: &[&str] = &["partitions.csv", "*.bin"];

/// Shell metacharacters that force an unquoted `-DNAME=VALUE` token to be
/// wrapped in double quotes (§4.6 pass 2).
const SHELL_METACHARS: &[char] =
    &['(', ')', '$', '`', '\\', '!', '"', '\'', '<', '>', '|', '&', ';', '*', '?', '#', '~', '[', ']', '{', '}'];

/// Expands the `{name}` tokens a hook command line may carry, where `name`
/// is an environment variable name looked up uppercased (§4.6 pass 1 — e.g.
/// `{build.path}` is not a token here; those are already expanded by C1).
/// A token whose variable isn't set is warned rather than silently dropped.
fn expand_env_tokens(cmd: &str) -> String {
    let mut out = String::new();
    let mut rest = cmd;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after_brace = &rest[start + 1..];
        match after_brace.find('}') {
            Some(end) => {
                let name = &after_brace[..end];
                let var = name.to_uppercase().replace('.', "_");
                match std::env::var(&var) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => warn!("unresolved hook token {{{name}}}: env var {var} not set"),
                }
                rest = &after_brace[end + 1..];
            }
            None => {
                out.push('{');
                rest = after_brace;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Splits a shell-style command line into argv, honoring double-quoted
/// segments so embedded spaces (filenames, `-DNAME="a b"` values) stay in
/// one token. Quote characters are preserved, since they carry meaning for
/// the shell the final command line is dispatched through (§4.6).
fn split_argv(cmd: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in cmd.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

/// Rewrites a `-DNAME="VALUE"` token (or its single-quote-wrapped form,
/// `'-DNAME="VALUE"'`, stripping the outer single quotes first) to
/// `"-DNAME=\"VALUE\""`. An unquoted `-DNAME=VALUE` whose value contains a
/// shell metacharacter is wrapped whole in double quotes (§4.6 pass 2).
fn escape_define_token(token: &str) -> String {
    let unwrapped = if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') {
        &token[1..token.len() - 1]
    } else {
        token
    };

    let Some(rest) = unwrapped.strip_prefix("-D") else { return token.to_string() };
    let Some((name, value)) = rest.split_once('=') else { return token.to_string() };

    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        let inner = &value[1..value.len() - 1];
        return format!("\"-D{name}=\\\"{inner}\\\"\"");
    }

    if value.chars().any(|c| SHELL_METACHARS.contains(&c)) {
        return format!("\"-D{name}={value}\"");
    }

    token.to_string()
}

/// True for an argument that's empty or a quote pair with nothing inside
/// (`""`, `''`) — hooks may expand to nothing, e.g. an unset optional flag
/// (§4.6 pass 3).
fn is_elidable(token: &str) -> bool {
    token.is_empty() || token == "\"\"" || token == "''"
}

/// Detects a degenerate `COPY /y "X" "X"` (or `cp X X`) self-copy produced
/// when a hook's source and destination tokens expand to the same path —
/// some toolchains' `copy` fail loudly on this; skip it instead (§4.6 pass 4).
fn is_self_copy(argv: &[String]) -> bool {
    if argv.len() < 3 {
        return false;
    }
    let last_two: Vec<&str> = argv[argv.len() - 2..].iter().map(|s| s.trim_matches('"')).collect();
    last_two[0] == last_two[1]
}

fn is_non_fatal(cmd: &str) -> bool {
    NON_FATAL_SUBSTRINGS.iter().any(|p| cmd.contains(p))
}

/// Runs every hook recipe registered under `stage_prefix`es
/// (`recipe.hooks.*.N.pattern`, sorted numerically), in order, from `cwd`,
/// through the four dispatch passes of §4.6 before handing the assembled
/// command line to a shell.
fn run_stage(cfg: &ResolvedConfig, stage_keys: &[&str], cwd: &Path) -> Result<()> {
    for prefix in stage_keys {
        let mut indices: Vec<u32> = cfg
            .properties
            .keys()
            .filter_map(|k| {
                let rest = k.strip_prefix(&format!("{prefix}."))?;
                let n = rest.strip_suffix(".pattern")?;
                n.parse().ok()
            })
            .collect();
        indices.sort_unstable();

        for n in indices {
            let key = format!("{prefix}.{n}.pattern");
            let Some(pattern) = cfg.get(&key) else { continue };

            let expanded = expand_env_tokens(pattern);
            let argv: Vec<String> =
                split_argv(&expanded).iter().map(|t| escape_define_token(t)).filter(|t| !is_elidable(t)).collect();
            if argv.is_empty() {
                continue;
            }
            if is_self_copy(&argv) {
                debug!("hook {key}: skipping degenerate self-copy");
                continue;
            }

            let final_cmd = argv.join(" ");
            debug!("running hook {key}: {final_cmd}");
            let status = Command::new("sh").arg("-c").arg(&final_cmd).current_dir(cwd).output();

            match status {
                Ok(output) if output.status.success() => {}
                Ok(output) => {
                    let code = output.status.code();
                    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                    if is_non_fatal(&expanded) {
                        warn!("hook {key} failed (code {code:?}), ignoring as non-fatal: {stderr}");
                    } else {
                        return Err(BuilderError::Hook { name: key, code, output: stderr });
                    }
                }
                Err(e) => {
                    if is_non_fatal(&expanded) {
                        warn!("hook {key} could not run, ignoring as non-fatal: {e}");
                    } else {
                        return Err(BuilderError::Hook { name: key, code: None, output: e.to_string() });
                    }
                }
            }
        }
    }
    Ok(())
}

pub fn run_prebuild(cfg: &ResolvedConfig, cwd: &Path) -> Result<()> {
    run_stage(cfg, PREBUILD_STAGES, cwd)
}

pub fn run_postbuild(cfg: &ResolvedConfig, cwd: &Path) -> Result<()> {
    run_stage(cfg, POSTBUILD_STAGES, cwd)
}

pub fn run_postobjcopy(cfg: &ResolvedConfig, cwd: &Path) -> Result<()> {
    run_stage(cfg, POSTOBJCOPY_STAGES, cwd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_quoted_args_and_drops_empties() {
        let argv: Vec<String> =
            split_argv(r#"cp "a b.txt"  "dest.txt""#).into_iter().filter(|t| !is_elidable(t)).collect();
        assert_eq!(argv, vec!["\"a b.txt\"".to_string(), "\"dest.txt\"".to_string()]);
    }

    #[test]
    fn detects_self_copy() {
        let argv = vec!["cp".to_string(), "\"x.txt\"".to_string(), "\"x.txt\"".to_string()];
        assert!(is_self_copy(&argv));
        let argv2 = vec!["cp".to_string(), "\"x.txt\"".to_string(), "\"y.txt\"".to_string()];
        assert!(!is_self_copy(&argv2));
    }

    #[test]
    fn non_fatal_pattern_matches_partitions_csv() {
        assert!(is_non_fatal("copy partitions.csv build/"));
        assert!(!is_non_fatal("copy firmware.elf build/"));
    }

    #[test]
    fn expands_env_token() {
        std::env::set_var("BUILD_PATH", "/tmp/build");
        let out = expand_env_tokens("echo {build.path}");
        assert_eq!(out, "echo /tmp/build");
    }

    #[test]
    fn unresolved_token_is_dropped_and_warned() {
        std::env::remove_var("NOT_A_REAL_HOOK_VAR");
        let out = expand_env_tokens("echo {not.a.real.hook.var}");
        assert_eq!(out, "echo ");
    }

    #[test]
    fn escapes_quoted_define() {
        assert_eq!(escape_define_token(r#"-DNAME="VALUE""#), "\"-DNAME=\\\"VALUE\\\"\"");
        assert_eq!(escape_define_token(r#"'-DNAME="VALUE"'"#), "\"-DNAME=\\\"VALUE\\\"\"");
    }

    #[test]
    fn wraps_unquoted_define_with_metachars() {
        assert_eq!(escape_define_token("-DFLAGS=a&b"), "\"-DFLAGS=a&b\"");
        assert_eq!(escape_define_token("-DFLAGS=plain"), "-DFLAGS=plain");
    }
}
