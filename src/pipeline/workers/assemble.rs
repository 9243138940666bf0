use crate::pipeline::context::BuildContext;
use crate::pipeline::worker::{BuildWorker, WorkerError};
use crate::types::{Block, BudgetGroup, GenerationType, Role, slots};

/// Replaces the chat-history sentinel with real chat, interleaves
/// in-chat blocks by depth, and applies the generation-type variations.
///
/// Depth 0 means "after the last history message"; depth k means
/// "before the k-th most recent". Depths clamp to the history length.
pub struct AssembleWorker;

impl BuildWorker for AssembleWorker {
    fn name(&self) -> &str {
        "plan"
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), WorkerError> {
        let mut chat = history_blocks(ctx);
        let has_history = !chat.is_empty();

        let appends_user = ctx.generation_type != GenerationType::Continue;
        if appends_user {
            let mut text = ctx.user_message.clone().unwrap_or_default();
            if text.is_empty() && !ctx.preset.replace_empty_message.is_empty() {
                text = ctx.preset.replace_empty_message.clone();
            }
            if !text.is_empty() {
                let mut block = Block::new(Role::User, text)
                    .with_slot(slots::USER_MESSAGE)
                    .in_group(BudgetGroup::History);
                block.id = ctx.next_id();
                chat.push(block);
            }
        } else if ctx.preset.continue_prefill {
            if let Some(last_assistant) = chat.iter_mut().rev().find(|b| b.role == Role::Assistant)
            {
                last_assistant.content.push_str(&ctx.preset.continue_postfix);
                last_assistant.metadata.insert("prefill".into(), "true".into());
            }
        }

        let mut chat = interleave(ctx, chat);

        // Chat separator at the very front of the chat region. A pending
        // user message alone is not yet a chat.
        if has_history {
            let template = if ctx.group.is_some() {
                &ctx.preset.new_group_chat_prompt
            } else {
                &ctx.preset.new_chat_prompt
            };
            if !template.is_empty() {
                let content = ctx.expand_macros(template, false);
                if !content.is_empty() {
                    let mut block = Block::new(Role::System, content)
                        .with_slot(slots::NEW_CHAT_PROMPT)
                        .in_group(BudgetGroup::Default);
                    block.id = ctx.next_id();
                    chat.insert(0, block);
                }
            }
        }

        append_tail_prompts(ctx, &mut chat);

        // Splice the chat region where the sentinel sits.
        let at = ctx
            .blocks
            .iter()
            .position(Block::is_history_sentinel)
            .unwrap_or(ctx.blocks.len());
        let mut rest = ctx.blocks.split_off(at);
        if !rest.is_empty() {
            rest.remove(0);
        }
        ctx.blocks.extend(chat);
        ctx.blocks.extend(rest);

        resolve_greeting(ctx);
        Ok(())
    }
}

fn history_blocks(ctx: &mut BuildContext<'_>) -> Vec<Block> {
    let messages: Vec<(usize, Role, String, Option<String>)> = ctx
        .history
        .messages()
        .iter()
        .enumerate()
        .filter(|(_, m)| m.visible)
        .map(|(i, m)| (i, m.role, m.active_content().to_string(), m.name.clone()))
        .collect();

    let mut blocks = Vec::with_capacity(messages.len());
    for (index, role, content, name) in messages {
        let mut block = Block::new(role, content)
            .with_slot(slots::HISTORY_MESSAGE)
            .in_group(BudgetGroup::History)
            .with_meta("history_index", index.to_string());
        if let Some(name) = name {
            block = block.with_name(name);
        }
        block.id = ctx.next_id();
        blocks.push(block);
    }
    blocks
}

/// Insert in-chat blocks into the chat sequence by clamped depth.
fn interleave(ctx: &mut BuildContext<'_>, chat: Vec<Block>) -> Vec<Block> {
    let in_chat = std::mem::take(&mut ctx.in_chat_blocks);
    if in_chat.is_empty() {
        return chat;
    }

    let anchor_len = chat.len();
    let mut placed: Vec<(usize, Block)> = in_chat
        .into_iter()
        .map(|block| {
            let depth = (block.depth as usize).min(anchor_len);
            (anchor_len - depth, block)
        })
        .collect();
    // Same landing index: deeper blocks first, then order, then the
    // fixed role order.
    placed.sort_by_key(|(index, block)| {
        (
            *index,
            std::cmp::Reverse(block.depth),
            block.order,
            block.role.merge_rank(),
        )
    });

    let mut out = Vec::with_capacity(anchor_len + placed.len());
    let mut placed_iter = placed.into_iter().peekable();
    for (index, message) in chat.into_iter().enumerate() {
        while placed_iter.peek().is_some_and(|(at, _)| *at == index) {
            out.push(placed_iter.next().expect("peeked").1);
        }
        out.push(message);
    }
    for (_, block) in placed_iter {
        out.push(block);
    }
    out
}

fn append_tail_prompts(ctx: &mut BuildContext<'_>, chat: &mut Vec<Block>) {
    match ctx.generation_type {
        GenerationType::Continue => {
            if !ctx.preset.continue_prefill
                && !chat.is_empty()
                && !ctx.preset.continue_nudge_prompt.is_empty()
            {
                let content = ctx.expand_macros(&ctx.preset.continue_nudge_prompt.clone(), false);
                if !content.is_empty() {
                    let mut block = Block::new(Role::System, content)
                        .with_slot(slots::CONTINUE_NUDGE)
                        .in_group(BudgetGroup::System);
                    block.id = ctx.next_id();
                    chat.push(block);
                }
            }
        }
        GenerationType::Impersonate => {
            if !ctx.preset.impersonation_prompt.is_empty() {
                let content = ctx.expand_macros(&ctx.preset.impersonation_prompt.clone(), false);
                if !content.is_empty() {
                    let mut block = Block::new(Role::System, content)
                        .with_slot(slots::IMPERSONATION_PROMPT)
                        .in_group(BudgetGroup::System);
                    block.id = ctx.next_id();
                    chat.push(block);
                }
            }
        }
        GenerationType::Normal | GenerationType::Swipe | GenerationType::Regenerate => {
            if ctx.group.is_some() && !ctx.preset.group_nudge_prompt.is_empty() {
                let content = ctx.expand_macros(&ctx.preset.group_nudge_prompt.clone(), false);
                if !content.is_empty() {
                    let mut block = Block::new(Role::System, content)
                        .with_slot(slots::GROUP_NUDGE)
                        .in_group(BudgetGroup::System);
                    block.id = ctx.next_id();
                    chat.push(block);
                }
            }
        }
        GenerationType::Quiet => {}
    }
}

fn resolve_greeting(ctx: &mut BuildContext<'_>) {
    let Some(index) = ctx.greeting_index else {
        return;
    };
    let text = if index == 0 {
        Some(ctx.character.first_message.clone())
    } else {
        ctx.character.alternate_greetings.get(index - 1).cloned()
    };
    match text {
        Some(text) if !text.is_empty() => {
            ctx.greeting = Some(ctx.expand_macros(&text, false));
        }
        Some(_) => {}
        None => ctx.warn(format!("greeting index {index} is out of range")),
    }
}
