// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: fwdecl  —  §4.5.1 forward-declaration synthesis
//
//  Arduino sketches call functions before their textual definition, relying
//  on the IDE to inject forward declarations. This module reproduces that
//  step: strip comments/literals, find top-level function definitions, find
//  each one's first call site, and insert a declaration for any function
//  called before it is defined.
// ─────────────────────────────────────────────────────────────────────────────

const C_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "return", "sizeof", "do", "else", "case", "default", "goto",
];

/// Replaces the body of every `"..."` / `'...'` literal and `//`/`/* */`
/// comment with spaces, preserving byte offsets so later indices still
/// point into the original text.
fn blank_literals_and_comments(src: &str) -> String {
    let bytes = src.as_bytes();
    let mut out: Vec<u8> = bytes.to_vec();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    out[i] = b' ';
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                out[i] = b' ';
                out[i + 1] = b' ';
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    if bytes[i] != b'\n' {
                        out[i] = b' ';
                    }
                    i += 1;
                }
                if i + 1 < bytes.len() {
                    out[i] = b' ';
                    out[i + 1] = b' ';
                    i += 2;
                }
            }
            b'"' | b'\'' => {
                let quote = bytes[i];
                out[i] = b' ';
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' && i + 1 < bytes.len() {
                        out[i] = b' ';
                        i += 1;
                    }
                    if bytes[i] != b'\n' {
                        out[i] = b' ';
                    }
                    i += 1;
                }
                if i < bytes.len() {
                    out[i] = b' ';
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    String::from_utf8(out).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub signature: String,
    pub def_start: usize,
}

/// Finds top-level `type name(args) {` definitions, excluding `setup`/`loop`
/// and C/C++ control-flow keywords that can precede a paren.
fn find_function_defs(clean: &str) -> Vec<FunctionDef> {
    let bytes = clean.as_bytes();
    let mut defs = Vec::new();
    let mut brace_depth: i32 = 0;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == '{' {
            brace_depth += 1;
            i += 1;
            continue;
        }
        if c == '}' {
            brace_depth -= 1;
            i += 1;
            continue;
        }
        if brace_depth != 0 {
            i += 1;
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let ident_start = i;
            while i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let ident = &clean[ident_start..i];
            let mut j = i;
            while j < bytes.len() && (bytes[j] as char).is_whitespace() {
                j += 1;
            }
            if bytes.get(j) == Some(&b'(') {
                if let Some((params_end, body_start)) = match_signature(clean, j) {
                    if !is_control_keyword(ident) && ident != "setup" && ident != "loop" {
                        if let Some(sig) = extract_signature(clean, ident_start, body_start) {
                            defs.push(FunctionDef { name: ident.to_string(), signature: sig, def_start: ident_start });
                        }
                    }
                    let _ = params_end;
                    i = body_start.max(j + 1);
                    continue;
                }
            }
            continue;
        }
        i += 1;
    }
    defs
}

fn is_control_keyword(ident: &str) -> bool {
    C_KEYWORDS.contains(&ident)
}

/// Given the index of `(` after an identifier, returns `(end_of_params,
/// index_of_opening_brace)` if what follows is a function *definition*
/// (ends in `{`, not `;`).
fn match_signature(clean: &str, paren_open: usize) -> Option<(usize, usize)> {
    let bytes = clean.as_bytes();
    let mut depth = 0;
    let mut i = paren_open;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    i += 1;
                    break;
                }
            }
            _ => {}
        }
        i += 1;
    }
    let params_end = i;
    let mut j = params_end;
    while j < bytes.len() && (bytes[j] as char).is_whitespace() {
        j += 1;
    }
    // Skip a trailing `const`/`noexcept` before the brace.
    while j < bytes.len() && (bytes[j] as char).is_ascii_alphabetic() {
        let start = j;
        while j < bytes.len() && (bytes[j] as char).is_ascii_alphanumeric() {
            j += 1;
        }
        let _ = &clean[start..j];
        while j < bytes.len() && (bytes[j] as char).is_whitespace() {
            j += 1;
        }
    }
    if bytes.get(j) == Some(&b'{') {
        Some((params_end, j))
    } else {
        None
    }
}

fn extract_signature(clean: &str, ident_start: usize, body_start: usize) -> Option<String> {
    // Walk backwards from `ident_start` over the return type to the start
    // of the statement (previous `;`, `}`, or start of text).
    let before = &clean[..ident_start];
    let stmt_start = before
        .rfind(|c: char| c == ';' || c == '}' || c == '{')
        .map(|p| p + 1)
        .unwrap_or(0);
    let sig = clean[stmt_start..body_start].trim();
    if sig.is_empty() {
        None
    } else {
        Some(format!("{sig};"))
    }
}

/// Returns `name`'s first call-site offset in `clean`, i.e. the first
/// occurrence of the identifier not immediately inside its own definition.
fn first_reference(clean: &str, name: &str, skip_from: usize) -> Option<usize> {
    let bytes = clean.as_bytes();
    let mut i = 0;
    while let Some(rel) = clean[i..].find(name) {
        let pos = i + rel;
        if pos == skip_from {
            i = pos + name.len();
            continue;
        }
        let before_ok = pos == 0 || !(bytes[pos - 1] as char).is_ascii_alphanumeric() && bytes[pos - 1] != b'_';
        let after = pos + name.len();
        let after_ok = after >= bytes.len() || !(bytes[after] as char).is_ascii_alphanumeric() && bytes[after] != b'_';
        if before_ok && after_ok {
            return Some(pos);
        }
        i = pos + name.len();
    }
    None
}

/// Computes the forward declarations that must be inserted for `source`,
/// and the byte offset right after the last top-level `#include` where
/// they should be injected (§4.5.1).
pub fn synthesize(source: &str) -> (Vec<String>, usize) {
    let clean = blank_literals_and_comments(source);
    let defs = find_function_defs(&clean);

    let mut needed = Vec::new();
    for def in &defs {
        if let Some(first_use) = first_reference(&clean, &def.name, def.def_start) {
            if first_use < def.def_start {
                needed.push(def.signature.clone());
            }
        }
    }

    let insert_at = last_include_end(source);
    (needed, insert_at)
}

fn last_include_end(source: &str) -> usize {
    let mut offset = 0;
    let mut last_end = 0;
    for line in source.split_inclusive('\n') {
        if line.trim_start().starts_with("#include") {
            last_end = offset + line.len();
        }
        offset += line.len();
    }
    last_end
}

/// Inserts `declarations` into `source` right after the last `#include`
/// (or at the top if there is none), each on its own line.
pub fn apply(source: &str, declarations: &[String]) -> String {
    if declarations.is_empty() {
        return source.to_string();
    }
    let (_, insert_at) = synthesize(source);
    let mut out = String::with_capacity(source.len() + declarations.len() * 32);
    out.push_str(&source[..insert_at]);
    for decl in declarations {
        out.push_str(decl);
        out.push('\n');
    }
    out.push_str(&source[insert_at..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declares_function_called_before_definition() {
        let src = "void setup() {\n  blink();\n}\n\nvoid blink() {\n}\n";
        let (decls, _) = synthesize(src);
        assert_eq!(decls, vec!["void blink();".to_string()]);
    }

    #[test]
    fn no_declaration_needed_when_defined_first() {
        let src = "void blink() {\n}\n\nvoid setup() {\n  blink();\n}\n";
        let (decls, _) = synthesize(src);
        assert!(decls.is_empty());
    }

    #[test]
    fn ignores_control_flow_keywords() {
        let src = "void setup() {\n  if (true) {\n  }\n}\n";
        let (decls, _) = synthesize(src);
        assert!(decls.is_empty());
    }

    #[test]
    fn apply_inserts_after_last_include() {
        let src = "#include <Arduino.h>\n\nvoid setup() {\n  blink();\n}\n\nvoid blink() {}\n";
        let (decls, _) = synthesize(src);
        let out = apply(src, &decls);
        assert!(out.starts_with("#include <Arduino.h>\nvoid blink();\n"));
    }
}
