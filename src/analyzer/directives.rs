// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: analyzer :: directives  —  §4.2.1 / §4.2.2
// ─────────────────────────────────────────────────────────────────────────────

use crate::analyzer::cond;
use crate::macros::Env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    If,
    Ifdef,
    Ifndef,
}

struct Frame {
    active: bool,
    parent_active: bool,
    had_true_branch: bool,
}

/// Result of analyzing one file's preprocessor directives (§4.2.1).
pub struct FileAnalysis {
    pub includes: Vec<String>,
    pub env: Env,
}

/// Collapses `\`-terminated line continuations into single logical lines.
fn collapse_continuations(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut pending = String::new();
    for line in text.lines() {
        if let Some(stripped) = line.strip_suffix('\\') {
            pending.push_str(stripped);
        } else {
            pending.push_str(line);
            out.push(std::mem::take(&mut pending));
        }
    }
    if !pending.is_empty() {
        out.push(pending);
    }
    out
}

/// Walks `text`'s preprocessor directives, returning the headers included
/// under active branches and the macro environment extended by any
/// `#define`s that executed.
pub fn analyze_text(text: &str, seed: &Env) -> FileAnalysis {
    let lines = collapse_continuations(text);
    let mut stack: Vec<(FrameKind, Frame)> = Vec::new();
    let mut includes = Vec::new();
    let mut env = seed.clone();

    let current_active = |stack: &[(FrameKind, Frame)]| stack.last().map(|(_, f)| f.active).unwrap_or(true);

    for raw in lines {
        let line = raw.trim();
        if !line.starts_with('#') {
            continue;
        }
        let body = line[1..].trim_start();

        if let Some(rest) = body.strip_prefix("ifdef") {
            let parent_active = current_active(&stack);
            let name = rest.trim();
            let met = env.is_defined(name);
            stack.push((FrameKind::Ifdef, Frame { active: parent_active && met, parent_active, had_true_branch: met }));
        } else if let Some(rest) = body.strip_prefix("ifndef") {
            let parent_active = current_active(&stack);
            let name = rest.trim();
            let met = !env.is_defined(name);
            stack.push((FrameKind::Ifndef, Frame { active: parent_active && met, parent_active, had_true_branch: met }));
        } else if let Some(rest) = body.strip_prefix("if") {
            let parent_active = current_active(&stack);
            let met = cond::eval(rest.trim(), &env);
            stack.push((FrameKind::If, Frame { active: parent_active && met, parent_active, had_true_branch: met }));
        } else if let Some(rest) = body.strip_prefix("elif") {
            if let Some((_, frame)) = stack.last_mut() {
                if frame.had_true_branch {
                    frame.active = false;
                } else {
                    let met = cond::eval(rest.trim(), &env);
                    frame.active = frame.parent_active && met;
                    if met {
                        frame.had_true_branch = true;
                    }
                }
            }
        } else if body.starts_with("else") {
            if let Some((_, frame)) = stack.last_mut() {
                if frame.had_true_branch {
                    frame.active = false;
                } else {
                    frame.active = frame.parent_active;
                    frame.had_true_branch = true;
                }
            }
        } else if body.starts_with("endif") {
            stack.pop();
        } else if let Some(rest) = body.strip_prefix("define") {
            if current_active(&stack) {
                let rest = rest.trim();
                let (name, value) = match rest.split_once(char::is_whitespace) {
                    Some((n, v)) => (n.trim(), Some(v.trim().to_string())),
                    None => (rest, None),
                };
                if !name.is_empty() {
                    env = env.extend([(name.to_string(), value)]);
                }
            }
        } else if let Some(rest) = body.strip_prefix("include") {
            if current_active(&stack) {
                if let Some(name) = extract_include_name(rest.trim()) {
                    includes.push(name);
                }
            }
        }
    }

    FileAnalysis { includes, env }
}

fn extract_include_name(rest: &str) -> Option<String> {
    let rest = rest.trim();
    if let Some(stripped) = rest.strip_prefix('"') {
        let end = stripped.find('"')?;
        Some(stripped[..end].to_string())
    } else if let Some(stripped) = rest.strip_prefix('<') {
        let end = stripped.find('>')?;
        Some(stripped[..end].to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_active_include() {
        let env = Env::default();
        let result = analyze_text("#include <Arduino.h>\n", &env);
        assert_eq!(result.includes, vec!["Arduino.h".to_string()]);
    }

    #[test]
    fn conditional_fan_out_picks_else_branch() {
        let text = "#if defined(ESP32)\n#include \"A.h\"\n#elif defined(AVR)\n#include \"B.h\"\n#else\n#include \"C.h\"\n#endif\n";
        let env = Env::default();
        let result = analyze_text(text, &env);
        assert_eq!(result.includes, vec!["C.h".to_string()]);
    }

    #[test]
    fn conditional_fan_out_picks_elif_branch() {
        let text = "#if defined(ESP32)\n#include \"A.h\"\n#elif defined(AVR)\n#include \"B.h\"\n#else\n#include \"C.h\"\n#endif\n";
        let env = Env::seed([("AVR".to_string(), None)]);
        let result = analyze_text(text, &env);
        assert_eq!(result.includes, vec!["B.h".to_string()]);
    }

    #[test]
    fn nested_conditional_respects_parent() {
        let text = "#if defined(OUTER)\n#if defined(ESP32)\n#include \"A.h\"\n#elif defined(AVR)\n#include \"B.h\"\n#else\n#include \"C.h\"\n#endif\n#endif\n";
        let env = Env::seed([("AVR".to_string(), None)]);
        let result = analyze_text(text, &env);
        // OUTER is not defined, so the whole inner chain is inactive.
        assert!(result.includes.is_empty());
    }

    #[test]
    fn define_only_on_active_branch() {
        let text = "#ifdef NEVER\n#define SHOULD_NOT_BE_SET 1\n#endif\n#define ALWAYS_SET 1\n";
        let env = Env::default();
        let result = analyze_text(text, &env);
        assert!(!result.env.is_defined("SHOULD_NOT_BE_SET"));
        assert!(result.env.is_defined("ALWAYS_SET"));
    }

    #[test]
    fn line_continuation_collapses() {
        let text = "#define FOO \\\n  1\n";
        let env = Env::default();
        let result = analyze_text(text, &env);
        assert!(result.env.is_defined("FOO"));
        assert_eq!(result.env.value_of("FOO"), Some("1"));
    }
}
