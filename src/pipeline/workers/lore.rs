use crate::inject::FilterInput;
use crate::lore::{self, LoreInput, ScanFields};
use crate::pipeline::context::BuildContext;
use crate::pipeline::worker::{BuildWorker, WorkerError};
use crate::types::{LoreSource, Role};

/// Evaluates lorebooks against the scan state and parks the activated
/// placements on the context for the assembler.
pub struct LoreWorker;

impl BuildWorker for LoreWorker {
    fn name(&self) -> &str {
        "lore"
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), WorkerError> {
        let mut books = Vec::new();
        if let Some(book) = &ctx.character.embedded_lorebook {
            books.push((LoreSource::Character, book));
        }
        for book in &ctx.global_lorebooks {
            books.push((LoreSource::Global, *book));
        }
        if books.is_empty() {
            return Err(WorkerError::skipped(self.name(), "no lorebooks"));
        }

        let chat_messages = scan_messages(ctx);
        let extra_scan = extra_scan_text(ctx);

        let input = LoreInput {
            books,
            chat_messages,
            extra_scan,
            scan_fields: ScanFields {
                character_description: &ctx.character.description,
                character_personality: &ctx.character.personality,
                scenario: &ctx.character.scenario,
                creator_notes: &ctx.character.creator_notes,
                persona: &ctx.user.persona_text,
                depth_prompt: &ctx.character.depth_prompt.text,
            },
            preset: ctx.preset,
            generation_type: ctx.generation_type,
            message_count: ctx.history.len() as u32,
            dry_run: ctx.dry_run,
        };

        let outcome = lore::evaluate(&input, &mut ctx.rng, ctx.estimator, &mut *ctx.local_vars);

        tracing::debug!(
            before = outcome.placements.before_char_defs.len(),
            after = outcome.placements.after_char_defs.len(),
            in_chat = outcome.placements.in_chat.len(),
            outlets = outcome.placements.outlets.len(),
            "lore evaluation done"
        );

        ctx.warnings.extend(outcome.warnings);
        ctx.report.extend(outcome.report);
        ctx.lore = outcome.placements;
        Ok(())
    }
}

/// Visible chat text, newest first, pending user message included.
fn scan_messages(ctx: &BuildContext<'_>) -> Vec<String> {
    let include_names = ctx.preset.world_info_include_names;
    let mut lines: Vec<String> = Vec::new();

    if let Some(pending) = ctx.user_message.as_deref() {
        if !pending.is_empty() {
            lines.push(if include_names {
                format!("{}: {}", ctx.user.name, pending)
            } else {
                pending.to_string()
            });
        }
    }

    for message in ctx.history.messages().iter().rev() {
        if !message.visible {
            continue;
        }
        let content = message.active_content();
        if include_names {
            let name = message.name.clone().unwrap_or_else(|| match message.role {
                Role::User => ctx.user.name.clone(),
                Role::Assistant => ctx.character.name.clone(),
                Role::System => "System".to_string(),
            });
            lines.push(format!("{name}: {content}"));
        } else {
            lines.push(content.to_string());
        }
    }
    lines
}

/// Scan-participating injections plus the authors note when allowed.
fn extra_scan_text(ctx: &BuildContext<'_>) -> Vec<String> {
    let mut extra = Vec::new();
    for (_, injection) in ctx.injections.iter() {
        if !injection.scan {
            continue;
        }
        if let Some(filter) = &injection.filter {
            let passes = filter(&FilterInput {
                generation_type: ctx.generation_type,
                chat_length: ctx.history.len(),
                character_name: &ctx.character.name,
                user_name: &ctx.user.name,
            });
            if !passes {
                continue;
            }
        }
        extra.push(injection.content.clone());
    }

    let note = &ctx.preset.authors_note;
    if note.allow_wi_scan && !note.text.is_empty() {
        extra.push(note.text.clone());
    }
    extra
}
