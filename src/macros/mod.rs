//! Macro expansion.
//!
//! Templates carry `{{token}}` macros resolved against the build state.
//! Expansion is pass-based: up to four left-to-right substitution passes,
//! so nested macros resolve by re-scanning rather than recursive descent,
//! and unknown macros survive verbatim for providers that learn about
//! them later.

mod builtins;
mod engine;
mod registry;

pub use engine::{expand, Invocation, MacroEnv};
pub use registry::{MacroCall, MacroFn, MacroRegistry};
