use crate::inject::{FilterInput, InjectPosition};
use crate::pipeline::context::BuildContext;
use crate::pipeline::worker::{BuildWorker, WorkerError};
use crate::types::{Block, BudgetGroup, InsertionPoint};

/// Turns registered injections into blocks.
///
/// `before` → start of the prompt, `after` → end of the main region,
/// `chat` → interleaved at `(depth, role)`. `none` emits nothing here;
/// its scan participation already happened in the lore worker.
pub struct InjectionsWorker;

impl BuildWorker for InjectionsWorker {
    fn name(&self) -> &str {
        "injections"
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), WorkerError> {
        if ctx.injections.is_empty() {
            return Err(WorkerError::skipped(self.name(), "no injections registered"));
        }

        let injections: Vec<(String, crate::inject::Injection)> = ctx
            .injections
            .iter()
            .map(|(id, injection)| (id.to_string(), injection.clone()))
            .collect();

        for (id, injection) in injections {
            if let Some(filter) = &injection.filter {
                let passes = filter(&FilterInput {
                    generation_type: ctx.generation_type,
                    chat_length: ctx.history.len(),
                    character_name: &ctx.character.name,
                    user_name: &ctx.user.name,
                });
                if !passes {
                    tracing::debug!(injection = %id, "injection suppressed by filter");
                    continue;
                }
            }

            let slot = format!("injection:{id}");
            match injection.position {
                InjectPosition::Before => {
                    let block = Block::new(injection.role, injection.content)
                        .with_slot(slot)
                        .in_group(BudgetGroup::Custom)
                        .at(InsertionPoint::BeforePrompt);
                    ctx.push_block(block);
                }
                InjectPosition::After => {
                    let block = Block::new(injection.role, injection.content)
                        .with_slot(slot)
                        .in_group(BudgetGroup::Custom)
                        .at(InsertionPoint::InPrompt);
                    ctx.push_block(block);
                }
                InjectPosition::Chat => {
                    let block = Block::new(injection.role, injection.content)
                        .with_slot(slot)
                        .in_group(BudgetGroup::Custom)
                        .at_depth(injection.depth, 0);
                    ctx.push_in_chat(block);
                }
                InjectPosition::None => {}
            }
        }
        Ok(())
    }
}
