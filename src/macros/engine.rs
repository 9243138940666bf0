use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::builtins::{self, Resolution};
use super::registry::{MacroCall, MacroRegistry};
use crate::types::{Character, GenerationType, GroupContext, History, Preset, User};
use crate::vars::VariableStore;

/// Substitution passes. The last pass only verifies nothing changes.
const MAX_PASSES: usize = 4;

/// Everything a macro may read or mutate during expansion.
pub struct MacroEnv<'a> {
    pub character: &'a Character,
    pub user: &'a User,
    pub group: Option<&'a GroupContext>,
    pub history: &'a dyn History,
    pub preset: &'a Preset,
    pub generation_type: GenerationType,
    /// The current user message.
    pub input: String,
    /// Formatted example dialogue for `{{mesExamples}}`.
    pub examples_text: String,
    pub local_vars: &'a mut dyn VariableStore,
    pub global_vars: &'a mut dyn VariableStore,
    pub registry: Option<&'a MacroRegistry>,
    /// Host-supplied override bag; wins over built-in resolution.
    pub overrides: &'a BTreeMap<String, Value>,
    pub rng: &'a mut StdRng,
    pub pick_seed: u64,
    pub now: DateTime<Utc>,
    /// Outlet name → pre-joined content, drained by `{{outlet::…}}`.
    pub outlets: BTreeMap<String, String>,
    pub allow_outlets: bool,
    /// One-shot replacement for `{{original}}`.
    pub original: Option<String>,
}

/// A parsed `{{…}}` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Lowercased macro name.
    pub name: String,
    /// `::`-separated arguments; a single `:`- or space-separated
    /// argument is normalized into the front of this list.
    pub args: Vec<String>,
    /// The raw inner text, untrimmed.
    pub raw: String,
}

impl Invocation {
    pub fn arg(&self, index: usize) -> &str {
        self.args.get(index).map(String::as_str).unwrap_or("")
    }

    /// Arguments as a comma list: `{{random::a,b,c}}` and
    /// `{{random::a::b::c}}` are both accepted.
    pub fn list_args(&self) -> Vec<String> {
        if self.args.len() > 1 {
            self.args.clone()
        } else {
            self.arg(0)
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }
    }
}

fn parse_invocation(inner: &str) -> Invocation {
    let raw = inner.to_string();
    let trimmed = inner.trim();

    if trimmed.starts_with("//") {
        return Invocation {
            name: "//".into(),
            args: Vec::new(),
            raw,
        };
    }

    let (head, mut args) = match trimmed.split_once("::") {
        Some((head, rest)) => (
            head,
            rest.split("::").map(str::to_string).collect::<Vec<_>>(),
        ),
        None => (trimmed, Vec::new()),
    };

    // A single `:` or the first whitespace also separates name from
    // argument; whichever comes first wins, so `datetimeformat HH:mm`
    // keeps its colons.
    let mut name = head.to_string();
    let colon = head.find(':');
    let space = head.find(char::is_whitespace);
    match (colon, space) {
        (Some(c), s) if s.map_or(true, |s| c < s) => {
            name = head[..c].to_string();
            args.insert(0, head[c + 1..].to_string());
        }
        (_, Some(s)) => {
            name = head[..s].to_string();
            args.insert(0, head[s..].trim().to_string());
        }
        _ => {}
    }

    Invocation {
        name: name.trim().to_ascii_lowercase(),
        args,
        raw,
    }
}

/// Expand `template` against `env`.
///
/// Runs up to [`MAX_PASSES`] substitution passes, then strips `{{trim}}`
/// markers together with their surrounding newlines. Idempotent once it
/// returns: expanding the output again yields the same string.
pub fn expand(template: &str, env: &mut MacroEnv<'_>) -> String {
    let mut current = template.to_string();
    if !current.contains("{{") {
        return current;
    }

    for pass in 0..MAX_PASSES {
        let (next, changed) = expand_pass(&current, env);
        current = next;
        if !changed {
            break;
        }
        if pass == MAX_PASSES - 1 {
            tracing::debug!("macro expansion still changing after {MAX_PASSES} passes");
        }
    }

    apply_trim_markers(&current)
}

/// One left-to-right pass. Replacements are not re-scanned within the
/// same pass; nesting resolves on the next pass.
fn expand_pass(input: &str, env: &mut MacroEnv<'_>) -> (String, bool) {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;
    let mut changed = false;

    while let Some(open_rel) = input[cursor..].find("{{") {
        let mut start = cursor + open_rel;
        let close_rel = match input[start + 2..].find("}}") {
            Some(r) => r,
            None => break,
        };
        let close = start + 2 + close_rel;

        // Innermost-first: when the candidate span contains another "{{",
        // the real macro starts at the last one.
        if let Some(j) = input[start + 2..close].rfind("{{") {
            start = start + 2 + j;
        }

        out.push_str(&input[cursor..start]);

        let inner = &input[start + 2..close];
        let invocation = parse_invocation(inner);
        match resolve(env, &invocation, input, start) {
            Resolution::Replaced(text) => {
                out.push_str(&text);
                changed = true;
            }
            Resolution::Keep => {
                out.push_str(&input[start..close + 2]);
            }
        }
        cursor = close + 2;
    }

    out.push_str(&input[cursor..]);
    (out, changed)
}

fn resolve(
    env: &mut MacroEnv<'_>,
    invocation: &Invocation,
    pass_input: &str,
    offset: usize,
) -> Resolution {
    if invocation.name == "//" {
        return Resolution::Replaced(String::new());
    }

    // Host overrides win over the fixed vocabulary.
    if let Some(value) = lookup_override(env.overrides, &invocation.name) {
        return Resolution::Replaced(value);
    }

    if let Some(resolution) = builtins::resolve(env, invocation, pass_input, offset) {
        return resolution;
    }

    if let Some(registry) = env.registry {
        if let Some(proc) = registry.get(&invocation.name) {
            let call = MacroCall {
                invocation,
                character: env.character,
                user: env.user,
                group: env.group,
                preset: env.preset,
                generation_type: env.generation_type,
                input: &env.input,
                history: env.history,
                local_vars: &*env.local_vars,
                global_vars: &*env.global_vars,
            };
            return Resolution::Replaced(proc(&call));
        }
    }

    // Unknown macros survive verbatim for forward compatibility.
    Resolution::Keep
}

fn lookup_override(overrides: &BTreeMap<String, Value>, name: &str) -> Option<String> {
    overrides
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| sanitize_value(v))
}

/// nil → "", scalars bare, containers as compact JSON.
pub(crate) fn sanitize_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn apply_trim_markers(text: &str) -> String {
    if !text.contains("{{") {
        return text.to_string();
    }
    static TRIM_RE: OnceLock<Regex> = OnceLock::new();
    let re = TRIM_RE.get_or_init(|| {
        Regex::new(r"(?i)\n*[ \t]*\{\{trim\}\}[ \t]*\n*").expect("trim marker pattern")
    });
    re.replace_all(text, "").into_owned()
}
