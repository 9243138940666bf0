//! End-to-end build scenarios and pipeline invariants.

use serde_json::json;

use crate::dialect::{Dialect, DialectOptions, WireOutput};
use crate::inject::{InjectPosition, Injection, InjectionRegistry};
use crate::pipeline::{Plan, PromptBuilder, TrimReason};
use crate::types::{
    slots, AuthorsNote, AuthorsNotePosition, BudgetGroup, Character, ExamplesBehavior,
    GenerationType, GroupContext, LoreBook, LoreEntry, Message, Preset, PromptEntry, Role, User,
    VecHistory,
};
use crate::tokens::TokenEstimator;
use crate::vars::MemoryVariableStore;

fn alice() -> Character {
    Character::named("Alice")
}

fn bob() -> User {
    User::named("Bob")
}

fn build_simple(
    character: &Character,
    preset: &Preset,
    history: &VecHistory,
    message: &str,
) -> Plan {
    PromptBuilder::new(character, &bob(), history, preset)
        .user_message(message)
        .build()
        .unwrap()
}

fn slots_of(plan: &Plan) -> Vec<&str> {
    plan.blocks
        .iter()
        .filter(|b| b.enabled && !b.content.is_empty())
        .filter_map(|b| b.slot.as_deref())
        .collect()
}

#[cfg(test)]
mod scenario_tests {
    use super::*;

    #[test]
    fn minimal_build() {
        let character = alice();
        let preset = Preset::default();
        let history = VecHistory::default();
        let plan = build_simple(&character, &preset, &history, "Hi");

        assert_eq!(plan.messages.len(), 2);
        assert_eq!(plan.messages[0].role, Role::System);
        assert_eq!(
            plan.messages[0].content,
            "Write Alice's next reply in a fictional chat between Alice and Bob."
        );
        assert_eq!(plan.messages[1].role, Role::User);
        assert_eq!(plan.messages[1].content, "Hi");
        assert!(plan.warnings.is_empty());
        assert!(plan.trim_report.is_empty());

        let WireOutput::Chat(messages) = plan
            .to_messages(Dialect::OpenAiChat, &DialectOptions::default())
            .unwrap()
        else {
            panic!("expected chat output")
        };
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
    }

    #[test]
    fn character_prompt_override_composes_with_original() {
        let mut character = alice();
        character.system_prompt = "You are {{char}} in a story. {{original}} Stay concise.".into();
        let preset = Preset {
            main_prompt: "Default SYS.".into(),
            ..Default::default()
        };
        let plan = build_simple(&character, &preset, &VecHistory::default(), "Hi");
        assert_eq!(
            plan.messages[0].content,
            "You are Alice in a story. Default SYS. Stay concise."
        );
    }

    #[test]
    fn forbid_overrides_keeps_preset_prompt() {
        let mut character = alice();
        character.system_prompt = "Character prompt.".into();
        let mut preset = Preset {
            main_prompt: "Preset prompt.".into(),
            ..Default::default()
        };
        for entry in &mut preset.prompt_entries {
            if entry.id == "main_prompt" {
                entry.forbid_overrides = true;
            }
        }
        let plan = build_simple(&character, &preset, &VecHistory::default(), "Hi");
        assert_eq!(plan.messages[0].content, "Preset prompt.");
    }

    #[test]
    fn lore_activation_with_budget_drop() {
        let mut character = alice();
        character.embedded_lorebook = Some(LoreBook::named("embedded").with_entries(vec![
            {
                let mut e = LoreEntry::new(1, "Dragons breathe fire.").with_keys(["dragon"]);
                e.insertion_order = 10;
                e
            },
            {
                let mut e = LoreEntry::new(2, "x".repeat(4000)).with_keys(["dragon"]);
                e.insertion_order = 20;
                e
            },
        ]));
        let preset = Preset {
            world_info_budget_cap: 50,
            ..Default::default()
        };
        let plan = build_simple(&character, &preset, &VecHistory::default(), "I see a dragon");

        let lore_blocks: Vec<&str> = plan
            .blocks
            .iter()
            .filter(|b| b.enabled && b.group == BudgetGroup::Lore)
            .map(|b| b.content.as_str())
            .collect();
        assert_eq!(lore_blocks.len(), 1);
        assert!(lore_blocks[0].contains("Dragons breathe fire."));

        assert_eq!(plan.trim_report.len(), 1);
        assert_eq!(plan.trim_report[0].reason, TrimReason::LoreBudget);
        assert_eq!(
            plan.trim_report[0].slot.as_deref(),
            Some("character:embedded.2")
        );
    }

    #[test]
    fn authors_note_frequency_gate() {
        let preset = Preset {
            authors_note: AuthorsNote {
                text: "Keep it brief.".into(),
                frequency: 2,
                position: AuthorsNotePosition::InChat,
                ..Default::default()
            },
            ..Default::default()
        };

        // One user message in history; n = 1 + 1 = 2 → present.
        let history = VecHistory::new(vec![Message::user("one"), Message::assistant("r")]);
        let plan = build_simple(&alice(), &preset, &history, "two");
        assert!(slots_of(&plan).contains(&slots::AUTHORS_NOTE));

        // Two user messages; n = 3 → absent.
        let history = VecHistory::new(vec![
            Message::user("one"),
            Message::assistant("r"),
            Message::user("two"),
            Message::assistant("r2"),
        ]);
        let plan = build_simple(&alice(), &preset, &history, "three");
        assert!(!slots_of(&plan).contains(&slots::AUTHORS_NOTE));
    }

    #[test]
    fn in_chat_entries_merge_on_same_key() {
        let mut preset = Preset::default();
        preset
            .prompt_entries
            .push(PromptEntry::custom("style_a", Role::System, "A").in_chat(0, 10));
        preset
            .prompt_entries
            .push(PromptEntry::custom("style_b", Role::System, "B").in_chat(0, 10));

        let history = VecHistory::new(vec![Message::user("q"), Message::assistant("a")]);
        let plan = build_simple(&alice(), &preset, &history, "next");

        let merged: Vec<&str> = plan
            .blocks
            .iter()
            .filter(|b| b.enabled && b.content == "A\nB")
            .map(|b| b.content.as_str())
            .collect();
        assert_eq!(merged.len(), 1);
        // Depth 0 lands after the appended user message.
        let contents: Vec<&str> = plan.messages.iter().map(|m| m.content.as_str()).collect();
        let user_at = contents.iter().position(|c| *c == "next").unwrap();
        let merged_at = contents.iter().position(|c| *c == "A\nB").unwrap();
        assert!(merged_at > user_at);
    }

    #[test]
    fn continue_appends_nudge_not_user_message() {
        let history = VecHistory::new(vec![Message::user("hi"), Message::assistant("Hello")]);
        let preset = Preset::default();
        let plan = PromptBuilder::new(&alice(), &bob(), &history, &preset)
            .user_message("")
            .generation_type(GenerationType::Continue)
            .build()
            .unwrap();

        assert!(!plan
            .blocks
            .iter()
            .any(|b| b.enabled && b.has_slot(slots::USER_MESSAGE)));
        let nudge_at = plan
            .blocks
            .iter()
            .position(|b| b.enabled && b.has_slot(slots::CONTINUE_NUDGE))
            .expect("continue nudge present");
        // The nudge is the last enabled chat element.
        assert!(plan.blocks[nudge_at + 1..]
            .iter()
            .all(|b| !b.enabled || b.content.is_empty()));
    }

    #[test]
    fn continue_prefill_marks_last_assistant() {
        let history = VecHistory::new(vec![Message::user("hi"), Message::assistant("Hello")]);
        let preset = Preset {
            continue_prefill: true,
            continue_postfix: "".into(),
            ..Default::default()
        };
        let plan = PromptBuilder::new(&alice(), &bob(), &history, &preset)
            .generation_type(GenerationType::Continue)
            .build()
            .unwrap();

        assert!(!plan
            .blocks
            .iter()
            .any(|b| b.enabled && b.has_slot(slots::CONTINUE_NUDGE)));

        let WireOutput::Anthropic { prefill, messages, .. } = plan
            .to_messages(Dialect::AnthropicMessages, &DialectOptions::default())
            .unwrap()
        else {
            panic!("expected anthropic output")
        };
        assert!(prefill);
        assert_eq!(messages.last().unwrap().role, "assistant");
    }

    #[test]
    fn impersonation_injects_prompt_and_suppresses_phi() {
        let mut character = alice();
        character.post_history_instructions = "Always reply as the character.".into();
        let history = VecHistory::new(vec![Message::user("hi"), Message::assistant("Hello")]);
        let plan = PromptBuilder::new(&character, &bob(), &history, &Preset::default())
            .generation_type(GenerationType::Impersonate)
            .build()
            .unwrap();

        assert!(slots_of(&plan).contains(&slots::IMPERSONATION_PROMPT));
        assert!(!slots_of(&plan).contains(&slots::POST_HISTORY_INSTRUCTIONS));
        let imp = plan
            .blocks
            .iter()
            .find(|b| b.has_slot(slots::IMPERSONATION_PROMPT))
            .unwrap();
        assert!(imp.content.contains("Bob"));
    }

    #[test]
    fn group_chat_uses_group_separator_and_nudge() {
        let group = GroupContext {
            members: vec!["Alice".into(), "Eve".into()],
            muted: vec![],
            current_character: Some("Alice".into()),
        };
        let history = VecHistory::new(vec![Message::user("hi")]);
        let plan = PromptBuilder::new(&alice(), &bob(), &history, &Preset::default())
            .user_message("hello all")
            .group(&group)
            .build()
            .unwrap();

        let separator = plan
            .blocks
            .iter()
            .find(|b| b.has_slot(slots::NEW_CHAT_PROMPT))
            .expect("separator present");
        assert!(separator.content.contains("Alice and Eve"));
        let nudge = plan
            .blocks
            .iter()
            .find(|b| b.has_slot(slots::GROUP_NUDGE))
            .expect("group nudge present");
        assert!(nudge.content.contains("Alice"));
    }

    #[test]
    fn greeting_is_returned_not_injected() {
        let mut character = alice();
        character.first_message = "Hello, {{user}}!".into();
        character.alternate_greetings = vec!["Yo, {{user}}.".into()];

        let plan = PromptBuilder::new(&character, &bob(), &VecHistory::default(), &Preset::default())
            .user_message("hi")
            .greeting_index(1)
            .build()
            .unwrap();
        assert_eq!(plan.greeting.as_deref(), Some("Yo, Bob."));
        assert_eq!(plan.greeting_index, Some(1));
        assert!(!plan.messages.iter().any(|m| m.content.contains("Yo, Bob.")));

        let plan = PromptBuilder::new(&character, &bob(), &VecHistory::default(), &Preset::default())
            .greeting_index(0)
            .build()
            .unwrap();
        assert_eq!(plan.greeting.as_deref(), Some("Hello, Bob!"));
    }
}

#[cfg(test)]
mod invariant_tests {
    use super::*;

    fn full_character() -> Character {
        let mut character = alice();
        character.description = "A cartographer.".into();
        character.personality = "curious".into();
        character.scenario = "A rainy night.".into();
        character.example_dialogue = "<START>\n{{user}}: hi\n{{char}}: hello".into();
        character
    }

    #[test]
    fn anchor_ordering_is_preserved() {
        let mut character = full_character();
        character.embedded_lorebook = Some(LoreBook::named("wi").with_entries(vec![{
            let mut e = LoreEntry::new(1, "Before defs.").with_keys(["map"]);
            e.position = crate::types::LorePosition::BeforeCharDefs;
            e
        }]));
        let mut user = bob();
        user.persona_text = "A traveling merchant.".into();
        let mut preset = Preset::default();
        preset.post_history_instructions = "Reply briefly.".into();

        let history = VecHistory::new(vec![Message::user("show me the map")]);
        let plan = PromptBuilder::new(&character, &user, &history, &preset)
            .user_message("thanks")
            .build()
            .unwrap();

        let order = slots_of(&plan);
        let position = |slot: &str| {
            order
                .iter()
                .position(|s| *s == slot)
                .unwrap_or_else(|| panic!("slot {slot} missing from {order:?}"))
        };
        assert!(position(slots::MAIN_PROMPT) < position(slots::WORLD_INFO_ENTRY));
        assert!(position(slots::WORLD_INFO_ENTRY) < position(slots::PERSONA_DESCRIPTION));
        assert!(position(slots::PERSONA_DESCRIPTION) < position(slots::CHARACTER_DESCRIPTION));
        assert!(position(slots::CHARACTER_DESCRIPTION) < position(slots::CHARACTER_PERSONALITY));
        assert!(position(slots::CHARACTER_PERSONALITY) < position(slots::SCENARIO));
        assert!(position(slots::SCENARIO) < position(slots::NEW_EXAMPLE_CHAT));
        assert!(position(slots::MES_EXAMPLE) < position(slots::NEW_CHAT_PROMPT));
        assert!(position(slots::NEW_CHAT_PROMPT) < position(slots::HISTORY_MESSAGE));
        assert!(position(slots::HISTORY_MESSAGE) < position(slots::USER_MESSAGE));
        assert!(position(slots::USER_MESSAGE) < position(slots::POST_HISTORY_INSTRUCTIONS));
    }

    #[test]
    fn phi_is_last_enabled_system_block() {
        let mut preset = Preset::default();
        preset.post_history_instructions = "PHI text.".into();
        let history = VecHistory::new(vec![Message::user("q"), Message::assistant("a")]);
        let plan = build_simple(&full_character(), &preset, &history, "next");

        let last_system = plan
            .blocks
            .iter()
            .rev()
            .find(|b| b.enabled && b.role == Role::System && !b.content.is_empty())
            .unwrap();
        assert!(last_system.has_slot(slots::POST_HISTORY_INSTRUCTIONS));
    }

    #[test]
    fn identical_inputs_produce_identical_plans() {
        let character = full_character();
        let preset = Preset {
            context_window_tokens: Some(300),
            reserved_response_tokens: 50,
            ..Default::default()
        };
        let history = VecHistory::new(vec![
            Message::user("first question"),
            Message::assistant("first answer"),
            Message::user("second question {{pick::a,b,c}}"),
        ]);

        let build = || {
            let mut local = MemoryVariableStore::new();
            let mut global = MemoryVariableStore::new();
            PromptBuilder::new(&character, &bob(), &history, &preset)
                .user_message("and a {{random::x,y}} question")
                .variable_stores(&mut local, &mut global)
                .macro_var("rng_seed", json!(1234))
                .macro_var("pick_seed", json!(99))
                .macro_var("now", json!("2026-08-01T10:00:00Z"))
                .build()
                .unwrap()
        };

        let a = build();
        let b = build();
        assert_eq!(
            serde_json::to_string(&a.blocks).unwrap(),
            serde_json::to_string(&b.blocks).unwrap()
        );
        assert_eq!(a.messages, b.messages);
        assert_eq!(
            serde_json::to_string(&a.trim_report).unwrap(),
            serde_json::to_string(&b.trim_report).unwrap()
        );
    }

    #[test]
    fn trimmed_plan_fits_budget() {
        let preset = Preset {
            context_window_tokens: Some(120),
            reserved_response_tokens: 20,
            message_token_overhead: 4,
            ..Default::default()
        };
        let mut history = VecHistory::default();
        for i in 0..20 {
            history.push(Message::user(format!("question number {i}, somewhat long")));
            history.push(Message::assistant(format!("answer number {i}, somewhat long")));
        }
        let plan = build_simple(&full_character(), &preset, &history, "latest question");

        let total: u32 = plan
            .enabled_blocks()
            .map(|b| crate::tokens::HeuristicEstimator.estimate(&b.content) + 4)
            .sum();
        assert!(total <= 100, "trimmed total {total} exceeds budget");
        assert!(!plan.trim_report.is_empty());

        // Oldest history went first; the pending user message survived.
        assert!(plan
            .blocks
            .iter()
            .any(|b| b.enabled && b.has_slot(slots::USER_MESSAGE)));
        let evicted_oldest = plan
            .blocks
            .iter()
            .find(|b| b.metadata.get("history_index").map(String::as_str) == Some("0"))
            .unwrap();
        assert!(!evicted_oldest.enabled);
    }

    #[test]
    fn ephemeral_injections_prune_after_build() {
        let mut registry = InjectionRegistry::new();
        registry.register("memo", Injection::new("persistent note"));
        registry.register("flash", Injection::new("one build only").ephemeral());

        let preset = Preset::default();
        let history = VecHistory::default();
        let character = alice();
        let user = bob();
        let plan = PromptBuilder::new(&character, &user, &history, &preset)
            .user_message("hi")
            .injections(&mut registry)
            .build()
            .unwrap();

        assert!(plan
            .blocks
            .iter()
            .any(|b| b.content == "one build only" && b.enabled));
        assert!(registry.get("memo").is_some());
        assert!(registry.get("flash").is_none());
    }

    #[test]
    fn injection_positions_land_in_their_regions() {
        let mut registry = InjectionRegistry::new();
        registry.register("pre", Injection::new("BEFORE").at(InjectPosition::Before));
        registry.register("post", Injection::new("AFTER").at(InjectPosition::After));
        registry.register("deep", Injection::new("IN-CHAT").in_chat(1, Role::System));

        let history = VecHistory::new(vec![Message::user("q"), Message::assistant("a")]);
        let character = alice();
        let user = bob();
        let preset = Preset::default();
        let plan = PromptBuilder::new(&character, &user, &history, &preset)
            .user_message("next")
            .injections(&mut registry)
            .build()
            .unwrap();

        let contents: Vec<&str> = plan.messages.iter().map(|m| m.content.as_str()).collect();
        let at = |needle: &str| contents.iter().position(|c| *c == needle).unwrap();
        // before → the very start; after → end of main region, before chat;
        // chat depth 1 → before the appended user message.
        assert_eq!(at("BEFORE"), 0);
        assert!(at("AFTER") < at("a"));
        assert!(at("IN-CHAT") > at("a"));
        assert!(at("IN-CHAT") < at("next"));
    }

    #[test]
    fn strict_mode_rejects_unknown_marker_entries() {
        let mut preset = Preset::default();
        preset.prompt_entries.push(PromptEntry::pinned("no_such_slot"));

        let character = alice();
        let user = bob();
        let history = VecHistory::default();
        let err = PromptBuilder::new(&character, &user, &history, &preset)
            .user_message("hi")
            .strict(true)
            .build()
            .unwrap_err();
        assert!(matches!(err, crate::BuildError::StrictModeViolation(_)));

        // Non-strict: a warning instead.
        let plan = PromptBuilder::new(&character, &user, &history, &preset)
            .user_message("hi")
            .build()
            .unwrap();
        assert!(plan.warnings.iter().any(|w| w.contains("no_such_slot")));
    }

    #[test]
    fn missing_names_fail_fast() {
        let character = Character::default();
        let user = bob();
        let history = VecHistory::default();
        let preset = Preset::default();
        let err = PromptBuilder::new(&character, &user, &history, &preset)
            .build()
            .unwrap_err();
        assert!(matches!(err, crate::BuildError::InvalidInput(_)));
    }
}

#[cfg(test)]
mod boundary_tests {
    use super::*;

    #[test]
    fn authors_note_frequency_zero_never_inserts() {
        let preset = Preset {
            authors_note: AuthorsNote {
                text: "Note.".into(),
                frequency: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let history = VecHistory::new(vec![Message::user("one")]);
        let plan = build_simple(&alice(), &preset, &history, "two");
        assert!(!slots_of(&plan).contains(&slots::AUTHORS_NOTE));
    }

    #[test]
    fn negative_frequency_clamps_to_never() {
        let preset = Preset {
            authors_note: AuthorsNote {
                text: "Note.".into(),
                frequency: -3,
                ..Default::default()
            },
            ..Default::default()
        };
        let plan = build_simple(&alice(), &preset, &VecHistory::default(), "hi");
        assert!(!slots_of(&plan).contains(&slots::AUTHORS_NOTE));
    }

    #[test]
    fn disabled_examples_never_appear() {
        let mut character = alice();
        character.example_dialogue = "<START>\n{{user}}: hi\n{{char}}: hello".into();
        let preset = Preset {
            examples_behavior: ExamplesBehavior::Disabled,
            ..Default::default()
        };
        let plan = build_simple(&character, &preset, &VecHistory::default(), "hi");
        assert!(!plan
            .blocks
            .iter()
            .any(|b| b.group == BudgetGroup::Examples));
    }

    #[test]
    fn continue_with_empty_history_is_prompt_region_only() {
        let character = alice();
        let user = bob();
        let history = VecHistory::default();
        let preset = Preset::default();
        let plan = PromptBuilder::new(&character, &user, &history, &preset)
            .generation_type(GenerationType::Continue)
            .build()
            .unwrap();

        assert_eq!(plan.messages.len(), 1);
        assert_eq!(plan.messages[0].role, Role::System);
        assert!(!slots_of(&plan).contains(&slots::CONTINUE_NUDGE));
        assert!(!slots_of(&plan).contains(&slots::USER_MESSAGE));
    }

    #[test]
    fn in_chat_depth_clamps_to_history_length() {
        let mut preset = Preset::default();
        preset
            .prompt_entries
            .push(PromptEntry::custom("deep_note", Role::System, "DEEP").in_chat(99, 0));
        let history = VecHistory::new(vec![Message::user("q"), Message::assistant("a")]);
        let plan = build_simple(&alice(), &preset, &history, "next");

        let contents: Vec<&str> = plan.messages.iter().map(|m| m.content.as_str()).collect();
        let deep_at = contents.iter().position(|c| *c == "DEEP").unwrap();
        let first_history = contents.iter().position(|c| *c == "q").unwrap();
        // Clamped to "before the oldest message", not lost.
        assert_eq!(deep_at + 1, first_history);
    }

    #[test]
    fn empty_user_message_uses_replacement() {
        let preset = Preset {
            replace_empty_message: "(continues silently)".into(),
            ..Default::default()
        };
        let plan = build_simple(&alice(), &preset, &VecHistory::default(), "");
        assert!(plan
            .messages
            .iter()
            .any(|m| m.content == "(continues silently)"));
    }

    #[test]
    fn hidden_history_messages_stay_out_of_the_prompt() {
        let history = VecHistory::new(vec![
            Message::user("visible"),
            Message::user("secret").hidden(),
        ]);
        let character = alice();
        let preset = Preset::default();
        let plan = build_simple(&character, &preset, &history, "next");
        assert!(!plan.messages.iter().any(|m| m.content == "secret"));
        assert!(plan.messages.iter().any(|m| m.content == "visible"));
    }
}

#[cfg(test)]
mod hook_tests {
    use super::*;
    use crate::hooks::HookRegistry;
    use crate::types::Block;

    #[test]
    fn hooks_run_in_order_around_the_pipeline() {
        let mut hooks = HookRegistry::new();
        hooks.on_before_build(Box::new(|ctx| {
            ctx.warnings.push("before ran".into());
        }));
        hooks.on_after_build(Box::new(|ctx| {
            assert!(!ctx.blocks.is_empty(), "after_build sees the built plan");
            ctx.warnings.push("after ran".into());
        }));

        let character = alice();
        let user = bob();
        let history = VecHistory::default();
        let preset = Preset::default();
        let plan = PromptBuilder::new(&character, &user, &history, &preset)
            .user_message("hi")
            .hooks(&hooks)
            .build()
            .unwrap();
        assert_eq!(plan.warnings, vec!["before ran", "after ran"]);
    }

    #[test]
    fn pinned_resolver_supplies_replacement_blocks() {
        let mut preset = Preset::default();
        preset.prompt_entries.push(PromptEntry::pinned("weather_report"));

        let resolver = |entry: &PromptEntry| {
            (entry.id == "weather_report")
                .then(|| vec![Block::new(Role::System, "It is raining.")])
        };
        let character = alice();
        let user = bob();
        let history = VecHistory::default();
        let plan = PromptBuilder::new(&character, &user, &history, &preset)
            .user_message("hi")
            .pinned_resolver(&resolver)
            .build()
            .unwrap();
        assert!(plan.messages.iter().any(|m| m.content == "It is raining."));
        assert!(plan.warnings.is_empty());
    }
}
