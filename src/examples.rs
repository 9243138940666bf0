//! Example-dialogue parsing.
//!
//! Character cards carry example dialogue as one raw string: chunks
//! separated by a literal `<START>` line, speaker turns introduced by
//! `{{user}}:` / `{{char}}:` prefixes (or the resolved names).

use crate::types::Role;

/// One parsed speaker turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleTurn {
    pub role: Role,
    pub speaker: String,
    pub content: String,
}

/// One `<START>`-delimited example conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExampleChunk {
    pub turns: Vec<ExampleTurn>,
}

/// Split raw example dialogue into role-tagged chunks.
///
/// Lines without a speaker prefix continue the current turn. Text before
/// any speaker prefix inside a chunk is attributed to the character, which
/// is how card authors conventionally write narration.
pub fn parse_examples(raw: &str, user_name: &str, char_name: &str) -> Vec<ExampleChunk> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    // Macros are pre-expanded to names so prefix detection only deals
    // with literal `Name:` forms.
    let resolved = replace_case_insensitive(raw, "{{user}}", user_name);
    let resolved = replace_case_insensitive(&resolved, "{{char}}", char_name);

    let mut chunks = Vec::new();
    for piece in split_case_insensitive(&resolved, "<START>") {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let chunk = parse_chunk(piece, user_name, char_name);
        if !chunk.turns.is_empty() {
            chunks.push(chunk);
        }
    }
    chunks
}

fn parse_chunk(text: &str, user_name: &str, char_name: &str) -> ExampleChunk {
    let mut turns: Vec<ExampleTurn> = Vec::new();

    for line in text.lines() {
        if let Some(rest) = strip_speaker_prefix(line, user_name) {
            turns.push(ExampleTurn {
                role: Role::User,
                speaker: user_name.to_string(),
                content: rest.trim_start().to_string(),
            });
        } else if let Some(rest) = strip_speaker_prefix(line, char_name) {
            turns.push(ExampleTurn {
                role: Role::Assistant,
                speaker: char_name.to_string(),
                content: rest.trim_start().to_string(),
            });
        } else if let Some(current) = turns.last_mut() {
            current.content.push('\n');
            current.content.push_str(line);
        } else if !line.trim().is_empty() {
            // Leading narration with no speaker yet.
            turns.push(ExampleTurn {
                role: Role::Assistant,
                speaker: char_name.to_string(),
                content: line.to_string(),
            });
        }
    }

    for turn in &mut turns {
        turn.content = turn.content.trim().to_string();
    }
    turns.retain(|t| !t.content.is_empty());
    ExampleChunk { turns }
}

fn strip_speaker_prefix<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    if name.is_empty() || line.len() <= name.len() {
        return None;
    }
    let (head, tail) = line.split_at_checked(name.len())?;
    if head.eq_ignore_ascii_case(name) && tail.starts_with(':') {
        Some(&tail[1..])
    } else {
        None
    }
}

fn split_case_insensitive<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    let lower = text.to_lowercase();
    let sep_lower = sep.to_lowercase();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut search = 0;
    while let Some(found) = lower[search..].find(&sep_lower) {
        let at = search + found;
        // Lowercasing can change byte lengths for some scripts; only
        // split when the offset maps onto a char boundary of the source.
        if text.is_char_boundary(at) && text.is_char_boundary(at + sep.len()) {
            parts.push(&text[start..at]);
            start = at + sep.len();
        }
        search = at + sep_lower.len();
    }
    parts.push(&text[start..]);
    parts
}

fn replace_case_insensitive(text: &str, needle: &str, replacement: &str) -> String {
    let parts = split_case_insensitive(text, needle);
    parts.join(replacement)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_nothing() {
        assert!(parse_examples("", "Bob", "Alice").is_empty());
        assert!(parse_examples("   \n\t", "Bob", "Alice").is_empty());
    }

    #[test]
    fn splits_on_start_and_speakers() {
        let raw = "<START>\n{{user}}: Hi there\n{{char}}: Hello!\n<START>\n{{user}}: Again?";
        let chunks = parse_examples(raw, "Bob", "Alice");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].turns.len(), 2);
        assert_eq!(chunks[0].turns[0].role, Role::User);
        assert_eq!(chunks[0].turns[0].content, "Hi there");
        assert_eq!(chunks[0].turns[1].role, Role::Assistant);
        assert_eq!(chunks[0].turns[1].speaker, "Alice");
        assert_eq!(chunks[1].turns[0].content, "Again?");
    }

    #[test]
    fn continuation_lines_join_current_turn() {
        let raw = "<START>\nAlice: First line\nsecond line\nBob: reply";
        let chunks = parse_examples(raw, "Bob", "Alice");
        assert_eq!(chunks[0].turns[0].content, "First line\nsecond line");
        assert_eq!(chunks[0].turns[1].role, Role::User);
    }

    #[test]
    fn speaker_prefix_is_case_insensitive() {
        let raw = "<start>\nbob: hey\nALICE: hi";
        let chunks = parse_examples(raw, "Bob", "Alice");
        assert_eq!(chunks[0].turns[0].role, Role::User);
        assert_eq!(chunks[0].turns[1].role, Role::Assistant);
    }

    #[test]
    fn text_without_separator_is_one_chunk() {
        let raw = "{{char}}: just one line";
        let chunks = parse_examples(raw, "Bob", "Alice");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].turns[0].content, "just one line");
    }

    #[test]
    fn leading_narration_goes_to_character() {
        let raw = "<START>\n*The tavern is dim.*\nBob: Who's there?";
        let chunks = parse_examples(raw, "Bob", "Alice");
        assert_eq!(chunks[0].turns[0].role, Role::Assistant);
        assert_eq!(chunks[0].turns[0].content, "*The tavern is dim.*");
    }
}
