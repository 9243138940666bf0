//! Data model for prompt construction.
//!
//! Inputs (`Character`, `User`, `Preset`, `Lorebook`, chat history) are
//! immutable for the duration of a build. `Block` is the unit of assembled
//! prompt and the only type the pipeline mutates.

mod block;
mod card;
mod character;
mod history;
mod lorebook;
mod preset;

pub use block::{slots, Block, BudgetGroup, InsertionPoint};
pub use card::{CardBook, CardBookEntry, CardData, CharacterCard};
pub use character::{Character, DepthPrompt, GroupContext, User};
pub use history::{History, Message, Role, VecHistory};
pub use lorebook::{
    EntryKey, LoreBook, LoreEntry, LorePosition, LoreSource, SelectiveLogic,
};
pub use preset::{
    pinned, AuthorsNote, AuthorsNotePosition, EntryCondition, EntryPosition, ExamplesBehavior,
    GenerationType, InstructFormat, LoreInsertionStrategy, Preset, PromptEntry, TurnPredicate,
};
