//! TavernKit — deterministic prompt assembly for character-card chat
//! frontends.
//!
//! Given a character definition, a user persona, a preset, chat history,
//! and optional lorebooks and programmatic injections, [`PromptBuilder`]
//! produces a budget-respecting sequence of role-tagged blocks ready to
//! project into a provider wire format.
//!
//! ```no_run
//! use tavernkit::{Character, Preset, PromptBuilder, User, VecHistory};
//!
//! let character = Character::named("Alice");
//! let user = User::named("Bob");
//! let history = VecHistory::default();
//! let preset = Preset::default();
//!
//! let plan = PromptBuilder::new(&character, &user, &history, &preset)
//!     .user_message("Hi")
//!     .build()
//!     .unwrap();
//! for message in &plan.messages {
//!     println!("{}: {}", message.role, message.content);
//! }
//! ```
//!
//! The pipeline is synchronous and single-threaded; given identical
//! inputs (seeds and timestamp overrides included) the produced plan is
//! bit-identical across runs.

pub mod dialect;
mod errors;
pub mod examples;
pub mod hooks;
pub mod inject;
pub mod lore;
pub mod macros;
pub mod pipeline;
pub mod tokens;
pub mod types;
pub mod vars;

pub use dialect::{Dialect, DialectOptions, WireMessage, WireOutput};
pub use errors::BuildError;
pub use hooks::HookRegistry;
pub use inject::{InjectPosition, Injection, InjectionRegistry};
pub use macros::MacroRegistry;
pub use pipeline::{Plan, PlanMessage, PromptBuilder, TrimEntry, TrimReason};
pub use tokens::{BpeEstimator, HeuristicEstimator, TokenEstimator};
pub use types::{
    Character, CharacterCard, GenerationType, GroupContext, History, LoreBook, LoreEntry, Message,
    Preset, PromptEntry, Role, User, VecHistory,
};
pub use vars::{MemoryVariableStore, VariableStore};
