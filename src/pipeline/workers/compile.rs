use crate::pipeline::context::BuildContext;
use crate::pipeline::worker::{BuildWorker, WorkerError};
use crate::types::{Block, InsertionPoint, Role};

/// Resolves positions into one linear main stream and merges in-chat
/// blocks.
///
/// Final main-stream shape: before-prompt blocks, the relative region in
/// emission order, in-prompt blocks, the chat-history sentinel, any
/// relative blocks emitted after the sentinel, and PHI last. In-chat
/// blocks merge on equal `(depth, order, role)` and are ordered
/// assistant → user → system within a `(depth, order)` bucket.
pub struct CompileWorker;

impl BuildWorker for CompileWorker {
    fn name(&self) -> &str {
        "compile"
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), WorkerError> {
        // Any lore still parked here had no world-info slot to land in.
        let leftover = ctx.lore.before_char_defs.len()
            + ctx.lore.after_char_defs.len()
            + ctx.lore.before_examples.len()
            + ctx.lore.after_examples.len();
        if leftover > 0 {
            ctx.warn(format!(
                "{leftover} activated lore entries had no world-info slot in the prompt \
                 entry list and were dropped"
            ));
        }
        let lore_in_chat = std::mem::take(&mut ctx.lore.in_chat);
        for block in lore_in_chat {
            ctx.push_in_chat(block);
        }

        let stream = std::mem::take(&mut ctx.blocks);
        let mut before = Vec::new();
        let mut relative = Vec::new();
        let mut in_prompt = Vec::new();
        let mut post = Vec::new();
        for block in stream {
            match block.insertion_point {
                InsertionPoint::BeforePrompt => before.push(block),
                InsertionPoint::InPrompt => in_prompt.push(block),
                InsertionPoint::PostHistory => post.push(block),
                InsertionPoint::InChat => ctx.in_chat_blocks.push(block),
                InsertionPoint::Relative | InsertionPoint::ChatHistory => relative.push(block),
            }
        }

        let sentinel_at = relative.iter().position(Block::is_history_sentinel);
        let sentinel_at = match sentinel_at {
            Some(at) => at,
            None => {
                let sentinel = Block::new(Role::System, "").at(InsertionPoint::ChatHistory);
                let at = relative.len();
                relative.push(sentinel);
                at
            }
        };

        let mut compiled = Vec::with_capacity(
            before.len() + relative.len() + in_prompt.len() + post.len(),
        );
        compiled.extend(before);
        let tail = relative.split_off(sentinel_at);
        compiled.extend(relative);
        compiled.extend(in_prompt);
        compiled.extend(tail);
        compiled.extend(post);
        ctx.blocks = compiled;

        ctx.in_chat_blocks = merge_in_chat(std::mem::take(&mut ctx.in_chat_blocks));
        Ok(())
    }
}

/// Merge policy: blocks sharing `(depth, order, role)` become one block
/// joined by newline; within a `(depth, order)` bucket roles emit in the
/// fixed order assistant, user, system.
fn merge_in_chat(blocks: Vec<Block>) -> Vec<Block> {
    let mut merged: Vec<Block> = Vec::new();
    for block in blocks {
        match merged.iter_mut().find(|existing| {
            existing.depth == block.depth
                && existing.order == block.order
                && existing.role == block.role
        }) {
            Some(existing) => {
                if !existing.content.is_empty() && !block.content.is_empty() {
                    existing.content.push('\n');
                }
                existing.content.push_str(&block.content);
            }
            None => merged.push(block),
        }
    }

    merged.sort_by_key(|b| (b.depth, b.order, b.role.merge_rank()));
    merged
}
