//! The build pipeline.
//!
//! A build is a fixed chain of workers over one mutable [`BuildContext`]:
//! lore → entries → injections → compile → macros → plan → trim, wrapped
//! by the host's before/after hooks. Synchronous end to end; identical
//! inputs (seeds included) produce bit-identical plans.

mod builder;
mod context;
pub(crate) mod plan;
mod worker;
mod workers;

pub use builder::PromptBuilder;
pub use context::{BuildContext, PinnedResolver};
pub use plan::{Plan, PlanMessage, TrimEntry, TrimReason};
pub use worker::{BuildWorker, WorkerError, WorkerPipeline};
pub use workers::{
    AssembleWorker, CompileWorker, EntriesWorker, InjectionsWorker, LoreWorker, MacroWorker,
    TrimWorker,
};

#[cfg(test)]
mod tests;
