//! The fixed macro vocabulary.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use xxhash_rust::xxh3::xxh3_64;

use super::engine::{sanitize_value, Invocation, MacroEnv};

/// Outcome of resolving one macro occurrence.
pub enum Resolution {
    Replaced(String),
    /// Not handled here; the occurrence stays verbatim this pass.
    Keep,
}

/// Bytes of pass input hashed around a `{{pick}}` occurrence so its seed
/// survives edits elsewhere in the template.
const PICK_CONTEXT_BYTES: usize = 32;

pub(super) fn resolve(
    env: &mut MacroEnv<'_>,
    inv: &Invocation,
    pass_input: &str,
    offset: usize,
) -> Option<Resolution> {
    let replaced = |s: String| Some(Resolution::Replaced(s));

    match inv.name.as_str() {
        "char" => replaced(env.character.name.clone()),
        "user" => replaced(env.user.name.clone()),
        "persona" => replaced(env.user.persona_text.clone()),
        "description" => replaced(env.character.description.clone()),
        "personality" => replaced(env.character.personality.clone()),
        "scenario" => replaced(env.character.scenario.clone()),
        "system" => replaced(env.preset.main_prompt.clone()),
        "charprompt" => replaced(env.character.system_prompt.clone()),
        "charjailbreak" | "charinstruction" => {
            replaced(env.character.post_history_instructions.clone())
        }
        "mesexamples" => replaced(env.examples_text.clone()),
        "mesexamplesraw" => replaced(env.character.example_dialogue.clone()),
        "charversion" => replaced(env.character.character_version.clone()),
        "chardepthprompt" => replaced(env.character.depth_prompt.text.clone()),
        "creatornotes" => replaced(env.character.creator_notes.clone()),
        "input" => replaced(env.input.clone()),
        "maxprompt" => replaced(
            env.preset
                .max_input_tokens()
                .map(|t| t.to_string())
                .unwrap_or_default(),
        ),

        "charifnotgroup" => replaced(match env.group {
            Some(group) => group.joined_members(),
            None => env.character.name.clone(),
        }),
        "group" => replaced(match env.group {
            Some(group) => group.joined_members(),
            None => env.character.name.clone(),
        }),
        "groupnotmuted" => replaced(match env.group {
            Some(group) => group.joined_not_muted(),
            None => env.character.name.clone(),
        }),
        "notchar" => replaced(match env.group {
            Some(group) => group.joined_not_current(),
            None => String::new(),
        }),

        "original" => replaced(env.original.take().unwrap_or_default()),
        "newline" => replaced("\n".into()),
        "noop" => replaced(String::new()),
        "banned" => replaced(String::new()),
        "reverse" => replaced(inv.arg(0).chars().rev().collect()),
        // Left in place; the engine strips trim markers after the final pass.
        "trim" => Some(Resolution::Keep),

        "lastmessage" => replaced(last_content(env, |_| true)),
        "lastusermessage" => replaced(last_content(env, |m| m.role == crate::types::Role::User)),
        "lastcharmessage" => {
            replaced(last_content(env, |m| m.role == crate::types::Role::Assistant))
        }
        "lastmessageid" => replaced(if env.history.is_empty() {
            String::new()
        } else {
            (env.history.len() - 1).to_string()
        }),
        "firstincludedmessageid" | "firstdisplayedmessageid" => replaced(String::new()),
        "idle_duration" => replaced(idle_duration(env)),

        "date" => replaced(env.now.format("%B %d, %Y").to_string()),
        "time" => replaced(env.now.format("%I:%M %p").to_string()),
        "weekday" => replaced(env.now.format("%A").to_string()),
        "isodate" => replaced(env.now.format("%Y-%m-%d").to_string()),
        "isotime" => replaced(env.now.format("%H:%M").to_string()),
        "datetimeformat" => replaced(
            env.now
                .format(&translate_moment_format(inv.arg(0)))
                .to_string(),
        ),
        "timediff" => replaced(time_diff(inv.arg(0), inv.arg(1))),
        name if name.starts_with("time_utc") => replaced(time_in_offset(env, name)),

        "random" => replaced(random_choice(env, &inv.list_args())),
        "pick" => replaced(pick_choice(env, &inv.list_args(), pass_input, offset)),
        "roll" => replaced(roll_dice(env, inv.arg(0))),

        "setvar" => {
            env.local_vars.set(inv.arg(0), inv.arg(1).to_string());
            replaced(String::new())
        }
        "getvar" => replaced(env.local_vars.get(inv.arg(0)).unwrap_or_default()),
        "addvar" => {
            let current = env.local_vars.get(inv.arg(0)).unwrap_or_default();
            let next = crate::vars::add_values(&current, inv.arg(1));
            env.local_vars.set(inv.arg(0), next);
            replaced(String::new())
        }
        "incvar" => {
            let next = crate::vars::step_value(env.local_vars.get(inv.arg(0)).as_deref(), 1.0);
            env.local_vars.set(inv.arg(0), next.clone());
            replaced(next)
        }
        "decvar" => {
            let next = crate::vars::step_value(env.local_vars.get(inv.arg(0)).as_deref(), -1.0);
            env.local_vars.set(inv.arg(0), next.clone());
            replaced(next)
        }
        "setglobalvar" => {
            env.global_vars.set(inv.arg(0), inv.arg(1).to_string());
            replaced(String::new())
        }
        "getglobalvar" => replaced(env.global_vars.get(inv.arg(0)).unwrap_or_default()),
        "addglobalvar" => {
            let current = env.global_vars.get(inv.arg(0)).unwrap_or_default();
            let next = crate::vars::add_values(&current, inv.arg(1));
            env.global_vars.set(inv.arg(0), next);
            replaced(String::new())
        }
        "incglobalvar" => {
            let next = crate::vars::step_value(env.global_vars.get(inv.arg(0)).as_deref(), 1.0);
            env.global_vars.set(inv.arg(0), next.clone());
            replaced(next)
        }
        "decglobalvar" => {
            let next = crate::vars::step_value(env.global_vars.get(inv.arg(0)).as_deref(), -1.0);
            env.global_vars.set(inv.arg(0), next.clone());
            replaced(next)
        }

        "outlet" => {
            if env.allow_outlets {
                replaced(env.outlets.get(inv.arg(0)).cloned().unwrap_or_default())
            } else {
                // Left for the expansion pass that owns the outlets.
                Some(Resolution::Keep)
            }
        }

        _ => None,
    }
}

fn last_content(env: &MacroEnv<'_>, pred: impl Fn(&crate::types::Message) -> bool) -> String {
    env.history
        .messages()
        .iter()
        .rev()
        .find(|m| m.visible && pred(m))
        .map(|m| m.active_content().to_string())
        .unwrap_or_default()
}

fn idle_duration(env: &MacroEnv<'_>) -> String {
    let seconds = env
        .overrides
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("idle_duration_seconds"))
        .and_then(|(_, v)| v.as_i64());
    match seconds {
        Some(secs) => humanize_seconds(secs),
        None => env
            .overrides
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("idle_duration"))
            .map(|(_, v)| sanitize_value(v))
            .unwrap_or_default(),
    }
}

fn time_in_offset(env: &MacroEnv<'_>, name: &str) -> String {
    let suffix = &name["time_utc".len()..];
    let hours: i32 = suffix.parse().unwrap_or(0);
    match FixedOffset::east_opt(hours * 3600) {
        Some(offset) => env.now.with_timezone(&offset).format("%I:%M %p").to_string(),
        None => env.now.format("%I:%M %p").to_string(),
    }
}

fn random_choice(env: &mut MacroEnv<'_>, options: &[String]) -> String {
    if options.is_empty() {
        return String::new();
    }
    let idx = env.rng.random_range(0..options.len());
    options[idx].clone()
}

/// Deterministic across builds: the seed hashes the pick seed, the bytes
/// around the occurrence, and its byte offset, so unrelated template
/// edits do not reshuffle every pick.
fn pick_choice(env: &MacroEnv<'_>, options: &[String], pass_input: &str, offset: usize) -> String {
    if options.is_empty() {
        return String::new();
    }
    let bytes = pass_input.as_bytes();
    let lo = offset.saturating_sub(PICK_CONTEXT_BYTES);
    let hi = (offset + PICK_CONTEXT_BYTES).min(bytes.len());

    let mut seed_input = Vec::with_capacity(16 + (hi - lo));
    seed_input.extend_from_slice(&env.pick_seed.to_le_bytes());
    seed_input.extend_from_slice(&bytes[lo..hi]);
    seed_input.extend_from_slice(&(offset as u64).to_le_bytes());

    let mut rng = StdRng::seed_from_u64(xxh3_64(&seed_input));
    let idx = rng.random_range(0..options.len());
    options[idx].clone()
}

/// `dN` or `MdN`, summed.
fn roll_dice(env: &mut MacroEnv<'_>, spec: &str) -> String {
    let spec = spec.trim().to_ascii_lowercase();
    let (count_str, sides_str) = match spec.split_once('d') {
        Some(parts) => parts,
        None => return String::new(),
    };
    let count: u32 = if count_str.is_empty() {
        1
    } else {
        count_str.parse().unwrap_or(0)
    };
    let sides: u32 = sides_str.parse().unwrap_or(0);
    if count == 0 || sides == 0 {
        return "0".into();
    }
    let mut total: u64 = 0;
    for _ in 0..count {
        total += env.rng.random_range(1..=sides) as u64;
    }
    total.to_string()
}

fn time_diff(a: &str, b: &str) -> String {
    match (parse_datetime(a), parse_datetime(b)) {
        (Some(a), Some(b)) => {
            let diff: Duration = a - b;
            humanize_seconds(diff.num_seconds().abs())
        }
        _ => String::new(),
    }
}

fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

pub(crate) fn humanize_seconds(total: i64) -> String {
    let total = total.max(0);
    let (value, unit) = if total >= 7 * 86_400 {
        (total / (7 * 86_400), "week")
    } else if total >= 86_400 {
        (total / 86_400, "day")
    } else if total >= 3_600 {
        (total / 3_600, "hour")
    } else if total >= 60 {
        (total / 60, "minute")
    } else {
        (total, "second")
    };
    if value == 1 {
        format!("1 {unit}")
    } else {
        format!("{value} {unit}s")
    }
}

/// Translate the common moment.js tokens to chrono; unknown characters
/// pass through verbatim.
fn translate_moment_format(fmt: &str) -> String {
    const TOKENS: &[(&str, &str)] = &[
        ("dddd", "%A"),
        ("ddd", "%a"),
        ("YYYY", "%Y"),
        ("YY", "%y"),
        ("MM", "%m"),
        ("DD", "%d"),
        ("HH", "%H"),
        ("hh", "%I"),
        ("mm", "%M"),
        ("ss", "%S"),
        ("A", "%p"),
    ];

    let mut out = String::with_capacity(fmt.len() + 8);
    let mut rest = fmt;
    'outer: while !rest.is_empty() {
        for (token, chrono) in TOKENS {
            if rest.starts_with(token) {
                out.push_str(chrono);
                rest = &rest[token.len()..];
                continue 'outer;
            }
        }
        let ch = rest.chars().next().expect("non-empty rest");
        if ch == '%' {
            out.push_str("%%");
        } else {
            out.push(ch);
        }
        rest = &rest[ch.len_utf8()..];
    }
    out
}
