// ─────────────────────────────────────────────────────────────────────────────
//  anvil_core :: macros
//
//  Immutable macro environment. Replaces the recursive-C2-with-shared-
//  mutable-macro-map pattern: `extend` returns a new `Env` sharing the
//  parent's entries via `Arc`, so sibling branches recursing into
//  different libraries never observe each other's `#define`s (§9
//  redesign). `Arc` rather than `Rc` so an `Env` can cross the thread
//  boundary into the C2/hook fan-out (§4.5 step 4).
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::BTreeMap;
use std::sync::Arc;

/// One macro's state: its value (if any) and whether it's `#define`d at all
/// (a macro can be defined with no value, e.g. `#define DEBUG`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroState {
    pub value: Option<String>,
    pub defined: bool,
}

/// An immutable, structurally-shared macro environment.
#[derive(Debug, Clone)]
pub struct Env {
    entries: Arc<BTreeMap<String, MacroState>>,
}

impl Env {
    /// Seed environment per §3: `ARDUINO=100` plus every `-D<name>[=<value>]`
    /// pulled from the compile recipe and from `build.macros`.
    pub fn seed(defines: impl IntoIterator<Item = (String, Option<String>)>) -> Self {
        let mut map = BTreeMap::new();
        map.insert("ARDUINO".to_string(), MacroState { value: Some("100".to_string()), defined: true });
        for (name, value) in defines {
            map.insert(name, MacroState { value, defined: true });
        }
        Env { entries: Arc::new(map) }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.entries.get(name).map(|m| m.defined).unwrap_or(false)
    }

    pub fn value_of(&self, name: &str) -> Option<&str> {
        self.entries.get(name).and_then(|m| m.value.as_deref())
    }

    /// Returns a new `Env` with `defines` applied on top of `self`, without
    /// mutating `self`. Cheap: only copy-on-write when the defines set is
    /// non-empty.
    pub fn extend(&self, defines: impl IntoIterator<Item = (String, Option<String>)>) -> Self {
        let mut next = (*self.entries).clone();
        let mut changed = false;
        for (name, value) in defines {
            next.insert(name, MacroState { value, defined: true });
            changed = true;
        }
        if changed {
            Env { entries: Arc::new(next) }
        } else {
            self.clone()
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Env::seed(std::iter::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_extends_are_independent() {
        let base = Env::seed(std::iter::empty());
        let a = base.extend([("FOO".to_string(), Some("1".to_string()))]);
        let b = base.extend([("BAR".to_string(), Some("2".to_string()))]);
        assert!(a.is_defined("FOO"));
        assert!(!a.is_defined("BAR"));
        assert!(b.is_defined("BAR"));
        assert!(!b.is_defined("FOO"));
        assert!(!base.is_defined("FOO"));
    }

    #[test]
    fn seed_includes_arduino() {
        let env = Env::seed(std::iter::empty());
        assert_eq!(env.value_of("ARDUINO"), Some("100"));
    }
}
