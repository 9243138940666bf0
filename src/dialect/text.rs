use super::{DialectOptions, Rendered, WireOutput};
use crate::types::{InstructFormat, Role};

/// `{ prompt, stop_sequences }`.
///
/// Plain mode renders `"{label}: {content}"` lines and ends with the
/// assistant label, ready for completion. Instruct mode wraps each block
/// with the configured prefix/suffix pairs instead, choosing the
/// `first_*` / `last_*` variants at the boundaries.
pub(crate) fn render(rendered: Vec<Rendered>, options: &DialectOptions) -> WireOutput {
    match options.instruct.as_ref().filter(|i| i.enabled) {
        Some(instruct) => render_instruct(rendered, options, instruct),
        None => render_plain(rendered, options),
    }
}

fn render_plain(rendered: Vec<Rendered>, options: &DialectOptions) -> WireOutput {
    let mut lines: Vec<String> = Vec::with_capacity(rendered.len() + 1);
    let mut stop_sequences = vec![
        format!("\n{}:", options.user_label),
        format!("\n{}:", options.assistant_label),
    ];

    for block in rendered {
        let label = block
            .name
            .as_deref()
            .filter(|_| options.include_names)
            .unwrap_or_else(|| options.label(block.role));
        let stop = format!("\n{label}:");
        if !stop_sequences.contains(&stop) {
            stop_sequences.push(stop);
        }
        lines.push(format!("{label}: {}", block.content));
    }

    lines.push(format!("{}:", options.assistant_label));
    WireOutput::Text {
        prompt: lines.join("\n"),
        stop_sequences,
    }
}

fn render_instruct(
    rendered: Vec<Rendered>,
    options: &DialectOptions,
    instruct: &InstructFormat,
) -> WireOutput {
    let mut stop_sequences: Vec<String> = Vec::new();
    for stop in [
        instruct.stop_sequence.as_str(),
        instruct.input_prefix.trim(),
        instruct.output_prefix.trim(),
        instruct.system_prefix.trim(),
    ] {
        if !stop.is_empty() && !stop_sequences.iter().any(|s| s == stop) {
            stop_sequences.push(stop.to_string());
        }
    }

    let first_assistant = rendered.iter().position(|b| b.role == Role::Assistant);
    let separator = if instruct.wrap_newline { "\n" } else { "" };

    let mut prompt = String::new();
    for (index, block) in rendered.iter().enumerate() {
        let (prefix, suffix) = match block.role {
            Role::User => (instruct.input_prefix.as_str(), instruct.input_suffix.as_str()),
            Role::System => (
                instruct.system_prefix.as_str(),
                instruct.system_suffix.as_str(),
            ),
            Role::Assistant => {
                let prefix = if Some(index) == first_assistant {
                    instruct
                        .first_output_prefix
                        .as_deref()
                        .unwrap_or(&instruct.output_prefix)
                } else {
                    &instruct.output_prefix
                };
                (prefix, instruct.output_suffix.as_str())
            }
        };
        prompt.push_str(prefix);
        if options.include_names {
            if let Some(name) = &block.name {
                prompt.push_str(name);
                prompt.push_str(": ");
            }
        }
        prompt.push_str(&block.content);
        prompt.push_str(suffix);
        prompt.push_str(separator);
    }

    // Trailing generation starter.
    let starter = instruct
        .last_output_prefix
        .as_deref()
        .unwrap_or(&instruct.output_prefix);
    prompt.push_str(starter);

    WireOutput::Text {
        prompt,
        stop_sequences,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Block;

    fn rendered(blocks: Vec<Block>) -> Vec<Rendered> {
        super::super::prepare(&blocks)
    }

    fn labels() -> DialectOptions {
        DialectOptions {
            user_label: "Bob".into(),
            assistant_label: "Alice".into(),
            ..Default::default()
        }
    }

    #[test]
    fn plain_mode_labels_and_trailing_starter() {
        let out = render(
            rendered(vec![
                Block::new(Role::System, "Scene: a tavern."),
                Block::new(Role::User, "hello"),
            ]),
            &labels(),
        );
        let WireOutput::Text { prompt, stop_sequences } = out else {
            panic!("expected text output")
        };
        assert!(prompt.starts_with("System: Scene: a tavern.\nBob: hello"));
        assert!(prompt.ends_with("\nAlice:"));
        assert!(stop_sequences.contains(&"\nBob:".to_string()));
        assert!(stop_sequences.contains(&"\nAlice:".to_string()));
    }

    #[test]
    fn plain_mode_prefers_block_names() {
        let out = render(
            rendered(vec![Block::new(Role::User, "hi").with_name("Eve")]),
            &labels(),
        );
        let WireOutput::Text { prompt, stop_sequences } = out else {
            panic!("expected text output")
        };
        assert!(prompt.starts_with("Eve: hi"));
        assert!(stop_sequences.contains(&"\nEve:".to_string()));
    }

    #[test]
    fn instruct_mode_wraps_roles() {
        let instruct = InstructFormat {
            enabled: true,
            input_prefix: "[INST] ".into(),
            input_suffix: " [/INST]".into(),
            output_prefix: "".into(),
            output_suffix: "</s>".into(),
            system_prefix: "<<SYS>> ".into(),
            system_suffix: " <</SYS>>".into(),
            stop_sequence: "</s>".into(),
            wrap_newline: true,
            ..Default::default()
        };
        let options = DialectOptions {
            instruct: Some(instruct),
            ..labels()
        };
        let out = render(
            rendered(vec![
                Block::new(Role::System, "rules"),
                Block::new(Role::User, "hi"),
                Block::new(Role::Assistant, "hello"),
            ]),
            &options,
        );
        let WireOutput::Text { prompt, stop_sequences } = out else {
            panic!("expected text output")
        };
        assert!(prompt.contains("<<SYS>> rules <</SYS>>"));
        assert!(prompt.contains("[INST] hi [/INST]"));
        assert!(prompt.contains("hello</s>"));
        assert!(stop_sequences.contains(&"</s>".to_string()));
        assert!(stop_sequences.contains(&"[INST]".to_string()));
    }
}
