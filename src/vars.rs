//! Variable stores.
//!
//! `{{getvar}}`/`{{setvar}}` macros and lore timed effects persist through
//! this interface. The key space is flat and values are strings; the host
//! decides where the data actually lives. Two stores exist per build:
//! chat-local and global.

use std::collections::BTreeMap;

/// Flat string key/value store. Implementations provide their own
/// isolation if builds run concurrently against the same store; the core
/// assumes serializable semantics per build.
pub trait VariableStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
    fn delete(&mut self, key: &str);
    fn each(&self, f: &mut dyn FnMut(&str, &str));
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn clear(&mut self);
}

/// The provided in-memory implementation. `BTreeMap` keeps iteration
/// order stable so builds against it stay reproducible.
#[derive(Debug, Clone, Default)]
pub struct MemoryVariableStore {
    values: BTreeMap<String, String>,
}

impl MemoryVariableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VariableStore for MemoryVariableStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }

    fn delete(&mut self, key: &str) {
        self.values.remove(key);
    }

    fn each(&self, f: &mut dyn FnMut(&str, &str)) {
        for (k, v) in &self.values {
            f(k, v);
        }
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn clear(&mut self) {
        self.values.clear();
    }
}

/// Numeric add with string fallback: `addvar` adds when both sides parse
/// as numbers, concatenates otherwise.
pub(crate) fn add_values(current: &str, delta: &str) -> String {
    match (current.trim().parse::<f64>(), delta.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => format_number(a + b),
        _ => format!("{current}{delta}"),
    }
}

/// Increment/decrement always treat the value as a number; unparseable
/// values count as zero.
pub(crate) fn step_value(current: Option<&str>, step: f64) -> String {
    let base = current
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(0.0);
    format_number(base + step)
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_crud() {
        let mut store = MemoryVariableStore::new();
        assert!(store.is_empty());
        store.set("mood", "cheerful".into());
        store.set("hp", "10".into());
        assert_eq!(store.get("mood").as_deref(), Some("cheerful"));
        assert_eq!(store.len(), 2);

        store.delete("mood");
        assert!(store.get("mood").is_none());

        let mut seen = Vec::new();
        store.each(&mut |k, v| seen.push(format!("{k}={v}")));
        assert_eq!(seen, vec!["hp=10"]);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn add_values_numeric_and_string() {
        assert_eq!(add_values("10", "5"), "15");
        assert_eq!(add_values("1.5", "1"), "2.5");
        assert_eq!(add_values("north", "east"), "northeast");
    }

    #[test]
    fn step_value_counts_from_zero() {
        assert_eq!(step_value(None, 1.0), "1");
        assert_eq!(step_value(Some("41"), 1.0), "42");
        assert_eq!(step_value(Some("oops"), -1.0), "-1");
    }
}
