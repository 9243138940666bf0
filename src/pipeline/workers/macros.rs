use crate::pipeline::context::BuildContext;
use crate::pipeline::worker::{BuildWorker, WorkerError};

/// Expands macros in every block with the build's macro context.
///
/// This is the only pass where `{{outlet::…}}` resolves: outlet content
/// collected by the lore engine is joined by insertion order and made
/// available to the expansion environment.
pub struct MacroWorker;

impl BuildWorker for MacroWorker {
    fn name(&self) -> &str {
        "macros"
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), WorkerError> {
        let collected = std::mem::take(&mut ctx.lore.outlets);
        for (name, mut pieces) in collected {
            pieces.sort_by_key(|(order, _)| *order);
            let joined = pieces
                .into_iter()
                .map(|(_, content)| content)
                .collect::<Vec<_>>()
                .join("\n");
            ctx.outlets.insert(name, joined);
        }

        let mut blocks = std::mem::take(&mut ctx.blocks);
        for block in &mut blocks {
            if block.content.contains("{{") {
                block.content = ctx.expand_macros(&block.content, true);
            }
        }
        ctx.blocks = blocks;

        let mut in_chat = std::mem::take(&mut ctx.in_chat_blocks);
        for block in &mut in_chat {
            if block.content.contains("{{") {
                block.content = ctx.expand_macros(&block.content, true);
            }
        }
        ctx.in_chat_blocks = in_chat;

        Ok(())
    }
}
