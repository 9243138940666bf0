use crate::examples::parse_examples;
use crate::errors::BuildError;
use crate::lore::{KeyMatcher, MatchOptions, ScanText};
use crate::pipeline::context::BuildContext;
use crate::pipeline::worker::{BuildWorker, WorkerError};
use crate::types::{
    pinned, slots, AuthorsNotePosition, Block, BudgetGroup, EntryCondition, EntryPosition,
    ExamplesBehavior, GenerationType, InsertionPoint, PromptEntry, Role,
};

/// Expands the preset's ordered prompt-entry list into blocks.
///
/// Pinned ids resolve to built-in slots filled from preset/character
/// data; custom entries carry their own content. Two normalizations are
/// unconditional: `chat_history`/`chat_examples` are always relative,
/// and `post_history_instructions` always lands last.
pub struct EntriesWorker;

impl BuildWorker for EntriesWorker {
    fn name(&self) -> &str {
        "entries"
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), WorkerError> {
        // {{mesExamples}} reflects the parsed examples even when the
        // example blocks themselves are disabled.
        ctx.examples_text = formatted_examples(ctx);

        let entries = ctx.preset.prompt_entries.clone();
        let mut deferred_last: Vec<PromptEntry> = Vec::new();
        let mut saw_history = false;

        for mut entry in entries {
            if !entry.enabled || !entry.triggers_on(ctx.generation_type) {
                continue;
            }
            if let Some(conditions) = entry.conditions.clone() {
                if !conditions_hold(ctx, &conditions) {
                    tracing::debug!(entry = %entry.id, "prompt entry conditions not met");
                    continue;
                }
            }

            // Multi-block groups cannot live inside chat.
            if entry.id == pinned::CHAT_HISTORY || entry.id == pinned::CHAT_EXAMPLES {
                entry.position = EntryPosition::Relative;
            }
            if entry.id == pinned::POST_HISTORY_INSTRUCTIONS {
                deferred_last.push(entry);
                continue;
            }
            if entry.id == pinned::CHAT_HISTORY {
                saw_history = true;
            }

            if entry.pinned {
                emit_pinned(ctx, &entry)?;
            } else {
                emit_custom(ctx, &entry);
            }
        }

        if !saw_history {
            ctx.warn("prompt entries define no chat_history slot; history is appended at the end");
        }

        // Character depth prompt rides along as an in-chat system line.
        let depth_prompt = &ctx.character.depth_prompt;
        if !depth_prompt.text.is_empty() {
            let block = Block::new(depth_prompt.role, depth_prompt.text.clone())
                .with_slot(slots::CHARACTER_DEPTH_PROMPT)
                .in_group(BudgetGroup::System)
                .at_depth(depth_prompt.depth, 0);
            ctx.push_in_chat(block);
        }

        for entry in deferred_last {
            if entry.pinned {
                emit_pinned(ctx, &entry)?;
            } else {
                emit_custom(ctx, &entry);
            }
        }

        Ok(())
    }
}

fn emit_pinned(ctx: &mut BuildContext<'_>, entry: &PromptEntry) -> Result<(), WorkerError> {
    match entry.id.as_str() {
        pinned::MAIN_PROMPT => {
            let character_text = &ctx.character.system_prompt;
            let content = if ctx.preset.prefer_char_prompt
                && !character_text.is_empty()
                && !entry.forbid_overrides
            {
                compose_override(character_text, &ctx.preset.main_prompt)
            } else {
                ctx.preset.main_prompt.clone()
            };
            push_relative(ctx, entry, content, slots::MAIN_PROMPT, BudgetGroup::System);
        }
        pinned::POST_HISTORY_INSTRUCTIONS => {
            // PHI instructs the character; impersonation speaks as the
            // user, so it is suppressed there.
            if ctx.generation_type == GenerationType::Impersonate {
                return Ok(());
            }
            let character_text = &ctx.character.post_history_instructions;
            let content = if ctx.preset.prefer_char_instructions
                && !character_text.is_empty()
                && !entry.forbid_overrides
            {
                compose_override(character_text, &ctx.preset.post_history_instructions)
            } else {
                ctx.preset.post_history_instructions.clone()
            };
            if !content.is_empty() {
                let block = Block::new(entry.role, content)
                    .with_slot(slots::POST_HISTORY_INSTRUCTIONS)
                    .in_group(BudgetGroup::System)
                    .at(InsertionPoint::PostHistory);
                ctx.push_block(block);
            }
        }
        pinned::PERSONA_DESCRIPTION => {
            let content = ctx.user.persona_text.clone();
            push_relative(ctx, entry, content, slots::PERSONA_DESCRIPTION, BudgetGroup::System);
        }
        pinned::CHARACTER_DESCRIPTION => {
            let content = ctx.character.description.clone();
            push_relative(
                ctx,
                entry,
                content,
                slots::CHARACTER_DESCRIPTION,
                BudgetGroup::System,
            );
        }
        pinned::CHARACTER_PERSONALITY => {
            let content = wrap_format(&ctx.preset.personality_format, &ctx.character.personality);
            push_relative(
                ctx,
                entry,
                content,
                slots::CHARACTER_PERSONALITY,
                BudgetGroup::System,
            );
        }
        pinned::SCENARIO => {
            let content = wrap_format(&ctx.preset.scenario_format, &ctx.character.scenario);
            push_relative(ctx, entry, content, slots::SCENARIO, BudgetGroup::System);
        }
        pinned::CHAT_EXAMPLES => emit_examples(ctx),
        pinned::CHAT_HISTORY => {
            let block = Block::new(Role::System, "")
                .with_slot(slots::CHAT_HISTORY)
                .at(InsertionPoint::ChatHistory);
            ctx.push_block(block);
        }
        pinned::WORLD_INFO_BEFORE_CHAR_DEFS => {
            let blocks = std::mem::take(&mut ctx.lore.before_char_defs);
            drain_lore(ctx, blocks, slots::WORLD_INFO_BEFORE_CHAR_DEFS);
        }
        pinned::WORLD_INFO_AFTER_CHAR_DEFS => {
            let blocks = std::mem::take(&mut ctx.lore.after_char_defs);
            drain_lore(ctx, blocks, slots::WORLD_INFO_AFTER_CHAR_DEFS);
        }
        pinned::WORLD_INFO_BEFORE_EXAMPLE_MESSAGES => {
            let blocks = std::mem::take(&mut ctx.lore.before_examples);
            drain_lore(ctx, blocks, slots::WORLD_INFO_BEFORE_EXAMPLE_MESSAGES);
        }
        pinned::WORLD_INFO_AFTER_EXAMPLE_MESSAGES => {
            let blocks = std::mem::take(&mut ctx.lore.after_examples);
            drain_lore(ctx, blocks, slots::WORLD_INFO_AFTER_EXAMPLE_MESSAGES);
        }
        pinned::AUTHORS_NOTE => emit_authors_note(ctx),
        pinned::ENHANCE_DEFINITIONS | pinned::AUXILIARY_PROMPT => {
            let slot = if entry.id == pinned::ENHANCE_DEFINITIONS {
                slots::ENHANCE_DEFINITIONS
            } else {
                slots::AUXILIARY_PROMPT
            };
            let content = entry.content.clone().unwrap_or_default();
            push_relative(ctx, entry, content, slot, BudgetGroup::System);
        }
        unknown => {
            if let Some(resolver) = ctx.pinned_resolver {
                if let Some(blocks) = resolver(entry) {
                    for block in blocks {
                        ctx.push_block(block);
                    }
                    return Ok(());
                }
            }
            if entry.content.as_deref().is_some_and(|c| !c.is_empty()) {
                // Content-carrying unknown pinned entries quietly act as
                // custom blocks.
                emit_custom(ctx, entry);
            } else if ctx.strict {
                return Err(WorkerError::Fatal(BuildError::StrictModeViolation(format!(
                    "unknown pinned prompt entry: {unknown}"
                ))));
            } else {
                ctx.warn(format!("unknown pinned prompt entry ignored: {unknown}"));
            }
        }
    }
    Ok(())
}

fn emit_custom(ctx: &mut BuildContext<'_>, entry: &PromptEntry) {
    let content = entry.content.clone().unwrap_or_default();
    if content.is_empty() {
        return;
    }
    match entry.position {
        EntryPosition::Relative => {
            let block = Block::new(entry.role, content)
                .with_slot(entry.id.clone())
                .in_group(BudgetGroup::Custom);
            ctx.push_block(block);
        }
        EntryPosition::InChat => {
            let block = Block::new(entry.role, content)
                .with_slot(entry.id.clone())
                .in_group(BudgetGroup::Custom)
                .at_depth(entry.depth, entry.order);
            ctx.push_in_chat(block);
        }
    }
}

fn emit_examples(ctx: &mut BuildContext<'_>) {
    if ctx.preset.examples_behavior == ExamplesBehavior::Disabled {
        return;
    }
    let chunks = parse_examples(
        &ctx.character.example_dialogue,
        &ctx.user.name,
        &ctx.character.name,
    );
    for chunk in chunks {
        if !ctx.preset.new_example_chat.is_empty() {
            let separator = Block::new(Role::System, ctx.preset.new_example_chat.clone())
                .with_slot(slots::NEW_EXAMPLE_CHAT)
                .in_group(BudgetGroup::Examples);
            ctx.push_block(separator);
        }
        for turn in chunk.turns {
            let block = Block::new(turn.role, turn.content)
                .with_name(turn.speaker)
                .with_slot(slots::MES_EXAMPLE)
                .in_group(BudgetGroup::Examples);
            ctx.push_block(block);
        }
    }
}

fn emit_authors_note(ctx: &mut BuildContext<'_>) {
    let note = ctx.preset.authors_note.clone();
    let frequency = note.frequency.max(0) as u32;
    if frequency == 0 {
        return;
    }
    let n = ctx.user_turns() + 1;
    if n % frequency != 0 {
        tracing::debug!(turn = n, frequency, "authors note skipped by frequency gate");
        return;
    }

    let mut parts: Vec<String> = Vec::new();
    parts.extend(std::mem::take(&mut ctx.lore.top_of_an));
    if !note.text.is_empty() {
        parts.push(note.text.clone());
    }
    parts.extend(std::mem::take(&mut ctx.lore.bottom_of_an));
    let content = parts.join("\n");
    if content.is_empty() {
        return;
    }

    match note.position {
        AuthorsNotePosition::InPrompt => {
            let block = Block::new(note.role, content)
                .with_slot(slots::AUTHORS_NOTE)
                .in_group(BudgetGroup::System);
            ctx.push_block(block);
        }
        AuthorsNotePosition::BeforePrompt => {
            let block = Block::new(note.role, content)
                .with_slot(slots::AUTHORS_NOTE)
                .in_group(BudgetGroup::System)
                .at(InsertionPoint::BeforePrompt);
            ctx.push_block(block);
        }
        AuthorsNotePosition::InChat => {
            let block = Block::new(note.role, content)
                .with_slot(slots::AUTHORS_NOTE)
                .in_group(BudgetGroup::System)
                .at_depth(note.depth, 0);
            ctx.push_in_chat(block);
        }
    }
}

fn push_relative(
    ctx: &mut BuildContext<'_>,
    entry: &PromptEntry,
    content: String,
    slot: &str,
    group: BudgetGroup,
) {
    if content.is_empty() {
        return;
    }
    match entry.position {
        EntryPosition::Relative => {
            let block = Block::new(entry.role, content).with_slot(slot).in_group(group);
            ctx.push_block(block);
        }
        EntryPosition::InChat => {
            let block = Block::new(entry.role, content)
                .with_slot(slot)
                .in_group(group)
                .at_depth(entry.depth, entry.order);
            ctx.push_in_chat(block);
        }
    }
}

fn drain_lore(ctx: &mut BuildContext<'_>, blocks: Vec<Block>, region: &str) {
    for mut block in blocks {
        block.metadata.insert("region".into(), region.into());
        ctx.push_block(block);
    }
}

/// `{{original}}` composition for character overrides: the first marker
/// expands to the preset text, later markers vanish. Without a marker
/// the character text fully replaces the preset's.
fn compose_override(override_text: &str, original: &str) -> String {
    const MARKER: &str = "{{original}}";
    let Some(first) = find_marker(override_text, MARKER) else {
        return override_text.to_string();
    };
    let mut out = String::with_capacity(override_text.len() + original.len());
    out.push_str(&override_text[..first]);
    out.push_str(original);
    let mut rest = &override_text[first + MARKER.len()..];
    while let Some(at) = find_marker(rest, MARKER) {
        out.push_str(&rest[..at]);
        rest = &rest[at + MARKER.len()..];
    }
    out.push_str(rest);
    out
}

/// ASCII-case-insensitive search; the marker is ASCII, so a byte-window
/// hit always lands on char boundaries.
fn find_marker(text: &str, marker: &str) -> Option<usize> {
    if text.len() < marker.len() {
        return None;
    }
    text.as_bytes()
        .windows(marker.len())
        .position(|window| window.eq_ignore_ascii_case(marker.as_bytes()))
}

fn wrap_format(format: &str, content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }
    if format.is_empty() || !format.contains("{0}") {
        return content.to_string();
    }
    format.replace("{0}", content)
}

fn conditions_hold(ctx: &mut BuildContext<'_>, conditions: &EntryCondition) -> bool {
    if let Some(turns) = &conditions.turns {
        if !turns.holds(ctx.user_turns()) {
            return false;
        }
    }

    if !conditions.tags_any.is_empty()
        && !conditions
            .tags_any
            .iter()
            .any(|tag| has_tag(ctx, tag))
    {
        return false;
    }
    if !conditions
        .tags_all
        .iter()
        .all(|tag| has_tag(ctx, tag))
    {
        return false;
    }

    if let Some(needle) = &conditions.persona_contains {
        if !ctx
            .user
            .persona_text
            .to_lowercase()
            .contains(&needle.to_lowercase())
        {
            return false;
        }
    }

    if let Some(keyword) = &conditions.keyword {
        let depth = conditions
            .keyword_depth
            .unwrap_or(ctx.preset.world_info_depth) as usize;
        let mut window = String::new();
        if let Some(pending) = ctx.user_message.as_deref() {
            window.push_str(pending);
            window.push('\n');
        }
        for message in ctx.history.messages().iter().rev().filter(|m| m.visible).take(depth) {
            window.push_str(message.active_content());
            window.push('\n');
        }
        let scan = ScanText::new(window);
        let mut matcher = KeyMatcher::new();
        let hit = matcher.key_matches(
            keyword,
            &scan,
            MatchOptions {
                case_sensitive: false,
                whole_words: false,
            },
        );
        for warning in matcher.warnings {
            ctx.warn(warning);
        }
        if !hit {
            return false;
        }
    }

    true
}

fn has_tag(ctx: &BuildContext<'_>, tag: &str) -> bool {
    ctx.character
        .tags
        .iter()
        .any(|t| t.eq_ignore_ascii_case(tag))
}

fn formatted_examples(ctx: &BuildContext<'_>) -> String {
    let chunks = parse_examples(
        &ctx.character.example_dialogue,
        &ctx.user.name,
        &ctx.character.name,
    );
    if chunks.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    for chunk in chunks {
        if !ctx.preset.new_example_chat.is_empty() {
            out.push_str(&ctx.preset.new_example_chat);
            out.push('\n');
        }
        for turn in chunk.turns {
            out.push_str(&turn.speaker);
            out.push_str(": ");
            out.push_str(&turn.content);
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}
