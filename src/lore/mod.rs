//! Lore (world-info) activation.
//!
//! Evaluates lorebook entries against a scan buffer built from recent
//! chat, scan-flagged injections and opted-in character fields; handles
//! recursion, timed effects, probability, inclusion groups and the token
//! budget; and hands placement-grouped blocks to the assembler.

mod engine;
mod matcher;
mod timed;

pub use engine::{evaluate, LoreInput, LoreOutcome, LorePlacements, ScanFields};
pub use matcher::{KeyMatcher, MatchOptions, ScanText};
pub use timed::{TimedEffect, TimedEffects, TIMED_EFFECTS_KEY};

#[cfg(test)]
mod tests;
