// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: property
//
//  Replaces the duck-typed `arduinoConfig: any` of the original with a typed
//  sum type plus a flat map and an iterative `{token}` expansion pass.
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::BTreeMap;

/// Maximum number of `{token}` expansion passes (§4.1 step 8).
const MAX_EXPAND_ITERATIONS: usize = 10;

/// A threshold on the output length of a single value past which repeated
/// expansion is treated as a cycle rather than legitimate growth.
const EXPLOSION_THRESHOLD: usize = 1 << 16;

/// A resolver property: either still carrying an unresolved `{token}`
/// reference, or fully expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    Raw(String),
    Expanded(String),
}

impl Property {
    pub fn as_str(&self) -> &str {
        match self {
            Property::Raw(s) | Property::Expanded(s) => s,
        }
    }

    pub fn is_expanded(&self) -> bool {
        matches!(self, Property::Expanded(_))
    }
}

/// A subset of runtime placeholders that are never expected to resolve
/// during C1's expansion pass — they're filled in later by C3 per source
/// file (§3 ResolvedConfig invariant).
pub const RUNTIME_PLACEHOLDERS: &[&str] = &[
    "SOURCE_FILE_PATH",
    "OBJECT_FILE_PATH",
    "OBJECT_FILE_PATHS",
    "INCLUDE_PATHS",
    "LD_FLAGS",
];

/// A flat, ordered `key -> value` property map with `{token}` expansion.
#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    entries: BTreeMap<String, String>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self { entries: BTreeMap::new() }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parses a `platform.txt`/`boards.txt`-style line-oriented `key=value`
    /// file: blank lines and lines starting with `#` are ignored (§6).
    pub fn parse_properties(text: &str) -> Self {
        let mut map = Self::new();
        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                map.set(key.trim(), value.trim());
            }
        }
        map
    }

    /// Returns the slice of entries whose key starts with `prefix`, with the
    /// prefix stripped from the returned keys (§4.1 step 2).
    pub fn slice_prefixed(&self, prefix: &str) -> PropertyMap {
        let mut out = PropertyMap::new();
        for (k, v) in &self.entries {
            if let Some(stripped) = k.strip_prefix(prefix) {
                out.set(stripped, v.clone());
            }
        }
        out
    }

    /// Overlays `board` and `extras` into `self`, with `self` (platform)
    /// winning for keys already set (§4.1 step 7).
    pub fn merge_under(&mut self, board: &PropertyMap, extras: &PropertyMap) {
        for (k, v) in extras.iter() {
            self.entries.entry(k.to_string()).or_insert_with(|| v.to_string());
        }
        for (k, v) in board.iter() {
            self.entries.entry(k.to_string()).or_insert_with(|| v.to_string());
        }
    }

    /// Applies caller-supplied overrides in place, skipping any key whose
    /// current value is a pure `{x}` reference (§4.1 step 3). Returns the
    /// list of skipped keys.
    pub fn apply_overrides(&mut self, overrides: &[(String, String)]) -> Vec<String> {
        let mut skipped = Vec::new();
        for (k, v) in overrides {
            match self.entries.get(k) {
                Some(current) if is_pure_reference(current) => {
                    skipped.push(k.clone());
                }
                _ => {
                    self.entries.insert(k.clone(), v.clone());
                }
            }
        }
        skipped
    }

    /// Host-suffix override promotion (§4.1 step 6, §9 open question: this
    /// implementation promotes `.linux`/`.macosx` on those hosts too, not
    /// only `.windows`).
    pub fn promote_host_suffix(&mut self) {
        let suffix = if cfg!(windows) {
            ".windows"
        } else if cfg!(target_os = "macos") {
            ".macosx"
        } else {
            ".linux"
        };
        let promotions: Vec<(String, String)> = self
            .entries
            .iter()
            .filter_map(|(k, v)| {
                k.strip_suffix(suffix).map(|base| (base.to_string(), v.clone()))
            })
            .filter(|(base, _)| self.entries.contains_key(base))
            .collect();
        for (base, value) in promotions {
            self.entries.insert(base, value);
        }
    }

    /// Iteratively expands every `{name}` reference to `self[name]`,
    /// bounded to `MAX_EXPAND_ITERATIONS` passes (§4.1 step 8, invariant 1).
    /// Returns the set of keys whose final value still contains an
    /// unresolved token that is not a documented runtime placeholder.
    pub fn expand(&mut self) -> Vec<String> {
        for _ in 0..MAX_EXPAND_ITERATIONS {
            let mut changed = false;
            let snapshot = self.entries.clone();
            for (key, value) in self.entries.iter_mut() {
                if let Some(expanded) = expand_once(value, &snapshot, key) {
                    if expanded.len() > EXPLOSION_THRESHOLD {
                        // Treat as a cycle: stop expanding this value further.
                        continue;
                    }
                    if &expanded != value {
                        *value = expanded;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        self.entries
            .iter()
            .filter(|(_, v)| has_unresolved_token(v))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Builds the final typed view: `Raw` for entries that still contain an
    /// unresolved token after expansion, `Expanded` otherwise.
    pub fn into_properties(self) -> BTreeMap<String, Property> {
        self.entries
            .into_iter()
            .map(|(k, v)| {
                let prop = if has_unresolved_token(&v) {
                    Property::Raw(v)
                } else {
                    Property::Expanded(v)
                };
                (k, prop)
            })
            .collect()
    }
}

fn is_pure_reference(value: &str) -> bool {
    let v = value.trim();
    v.starts_with('{') && v.ends_with('}') && v[1..v.len() - 1].chars().all(|c| c != '{' && c != '}')
}

/// Rewrites the innermost `{name}` occurrences in `value` using `map`.
/// Skips self-reference (`key` expanding to a token named `key`) to avoid
/// an immediate infinite loop; the iteration-count + explosion-length
/// bounds catch indirect cycles (§9).
fn expand_once(value: &str, map: &BTreeMap<String, String>, key: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    let mut changed = false;

    while let Some(open) = rest.find('{') {
        let Some(close_rel) = rest[open..].find('}') else {
            out.push_str(rest);
            rest = "";
            break;
        };
        let close = open + close_rel;
        let name = &rest[open + 1..close];

        out.push_str(&rest[..open]);
        if name == key {
            out.push('{');
            out.push_str(name);
            out.push('}');
        } else if is_known_name(name) {
            match map.get(name) {
                Some(v) => {
                    out.push_str(v);
                    changed = true;
                }
                None => {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
            }
        } else {
            out.push('{');
            out.push_str(name);
            out.push('}');
        }
        rest = &rest[close + 1..];
    }
    out.push_str(rest);

    if changed {
        Some(out)
    } else {
        None
    }
}

fn is_known_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

fn has_unresolved_token(value: &str) -> bool {
    let mut rest = value;
    while let Some(open) = rest.find('{') {
        if let Some(close_rel) = rest[open..].find('}') {
            let name = &rest[open + 1..open + close_rel];
            if !RUNTIME_PLACEHOLDERS.contains(&name) {
                return true;
            }
            rest = &rest[open + close_rel + 1..];
        } else {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ignoring_comments_and_blanks() {
        let text = "# comment\n\nfoo=bar\nbaz = qux \n";
        let map = PropertyMap::parse_properties(text);
        assert_eq!(map.get("foo"), Some("bar"));
        assert_eq!(map.get("baz"), Some("qux"));
    }

    #[test]
    fn expands_nested_references() {
        let mut map = PropertyMap::new();
        map.set("a", "{b}/{c}");
        map.set("b", "X");
        map.set("c", "{d}");
        map.set("d", "Y");
        let unresolved = map.expand();
        assert!(unresolved.is_empty());
        assert_eq!(map.get("a"), Some("X/Y"));
    }

    #[test]
    fn leaves_runtime_placeholders_raw() {
        let mut map = PropertyMap::new();
        map.set("recipe.cpp.o.pattern", "{compiler.path} -c {SOURCE_FILE_PATH} -o {OBJECT_FILE_PATH}");
        map.expand();
        let props = map.into_properties();
        assert!(matches!(props.get("recipe.cpp.o.pattern"), Some(Property::Raw(_))));
    }

    #[test]
    fn override_skipped_for_pure_reference() {
        let mut map = PropertyMap::new();
        map.set("build.mcu", "{build.variant.mcu}");
        let skipped = map.apply_overrides(&[("build.mcu".to_string(), "atmega328p".to_string())]);
        assert_eq!(skipped, vec!["build.mcu".to_string()]);
        assert_eq!(map.get("build.mcu"), Some("{build.variant.mcu}"));
    }
}
