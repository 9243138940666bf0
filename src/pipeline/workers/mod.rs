//! One worker per pipeline stage.

mod assemble;
mod compile;
mod entries;
mod injections;
mod lore;
mod macros;
mod trim;

pub use assemble::AssembleWorker;
pub use compile::CompileWorker;
pub use entries::EntriesWorker;
pub use injections::InjectionsWorker;
pub use lore::LoreWorker;
pub use macros::MacroWorker;
pub use trim::TrimWorker;
