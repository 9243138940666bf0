use std::collections::HashMap;

use super::engine::Invocation;
use crate::types::{Character, GenerationType, GroupContext, History, Preset, User};
use crate::vars::VariableStore;

/// The build state a custom macro procedure may inspect.
pub struct MacroCall<'a> {
    pub invocation: &'a Invocation,
    pub character: &'a Character,
    pub user: &'a User,
    pub group: Option<&'a GroupContext>,
    pub preset: &'a Preset,
    pub generation_type: GenerationType,
    pub input: &'a str,
    pub history: &'a dyn History,
    pub local_vars: &'a dyn VariableStore,
    pub global_vars: &'a dyn VariableStore,
}

pub type MacroFn = Box<dyn Fn(&MacroCall<'_>) -> String + Send + Sync>;

/// Host-registered macro procedures, keyed by lowercased name.
///
/// Built-in vocabulary and host overrides win over this registry, so a
/// procedure cannot shadow `{{char}}`. Must not be mutated during a build.
#[derive(Default)]
pub struct MacroRegistry {
    procs: HashMap<String, MacroFn>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, proc_fn: MacroFn) {
        self.procs.insert(name.into().to_ascii_lowercase(), proc_fn);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.procs.remove(&name.to_ascii_lowercase()).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&MacroFn> {
        self.procs.get(name)
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }
}

impl std::fmt::Debug for MacroRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.procs.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("MacroRegistry").field("procs", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        let mut registry = MacroRegistry::new();
        registry.register("WeatherNow", Box::new(|_call| "sunny".to_string()));
        assert!(registry.get("weathernow").is_some());
        assert!(registry.unregister("WEATHERNOW"));
        assert!(registry.is_empty());
    }
}
