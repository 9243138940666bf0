//! Lore-engine behavior suite.

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{evaluate, LoreInput, LoreOutcome, ScanFields};
use crate::pipeline::plan::TrimReason;
use crate::tokens::HeuristicEstimator;
use crate::types::{
    GenerationType, LoreBook, LoreEntry, LorePosition, LoreSource, Preset, Role,
};
use crate::vars::{MemoryVariableStore, VariableStore};

struct Fixture {
    book: LoreBook,
    chat: Vec<String>,
    preset: Preset,
    store: MemoryVariableStore,
    generation_type: GenerationType,
    message_count: u32,
}

impl Fixture {
    fn new() -> Self {
        Self {
            book: LoreBook::named("world"),
            chat: Vec::new(),
            preset: Preset {
                context_window_tokens: Some(8192),
                ..Default::default()
            },
            store: MemoryVariableStore::new(),
            generation_type: GenerationType::Normal,
            message_count: 0,
        }
    }

    fn chat_newest_first(mut self, messages: &[&str]) -> Self {
        self.chat = messages.iter().map(|s| s.to_string()).collect();
        self.message_count = self.chat.len() as u32;
        self
    }

    fn run(&mut self) -> LoreOutcome {
        let input = LoreInput {
            books: vec![(LoreSource::Global, &self.book)],
            chat_messages: self.chat.clone(),
            extra_scan: Vec::new(),
            scan_fields: ScanFields::default(),
            preset: &self.preset,
            generation_type: self.generation_type,
            message_count: self.message_count,
            dry_run: false,
        };
        let mut rng = StdRng::seed_from_u64(11);
        evaluate(&input, &mut rng, &HeuristicEstimator, &mut self.store)
    }
}

#[cfg(test)]
mod activation_tests {
    use super::*;

    #[test]
    fn keyword_activates_entry() {
        let mut fx = Fixture::new().chat_newest_first(&["I see a dragon on the hill"]);
        fx.book.entries = vec![LoreEntry::new(1, "Dragons breathe fire.").with_keys(["dragon"])];

        let outcome = fx.run();
        assert_eq!(outcome.placements.before_char_defs.len(), 1);
        assert!(outcome.placements.before_char_defs[0]
            .content
            .contains("Dragons breathe fire."));
    }

    #[test]
    fn miss_means_no_block() {
        let mut fx = Fixture::new().chat_newest_first(&["nothing interesting"]);
        fx.book.entries = vec![LoreEntry::new(1, "Dragons.").with_keys(["dragon"])];
        assert!(fx.run().placements.is_empty());
    }

    #[test]
    fn constant_ignores_keywords() {
        let mut fx = Fixture::new().chat_newest_first(&["unrelated"]);
        fx.book.entries = vec![LoreEntry {
            constant: true,
            ..LoreEntry::new(1, "The year is 1452.")
        }];
        assert_eq!(fx.run().placements.before_char_defs.len(), 1);
    }

    #[test]
    fn disabled_entries_never_fire() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        fx.book.entries = vec![LoreEntry {
            enabled: false,
            constant: true,
            ..LoreEntry::new(1, "x").with_keys(["dragon"])
        }];
        assert!(fx.run().placements.is_empty());
    }

    #[test]
    fn scan_depth_zero_skips_chat() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon sighted"]);
        fx.preset.world_info_depth = 0;
        fx.book.entries = vec![LoreEntry::new(1, "Dragons.").with_keys(["dragon"])];
        assert!(fx.run().placements.is_empty());
    }

    #[test]
    fn entry_scan_depth_override_widens() {
        let mut fx =
            Fixture::new().chat_newest_first(&["recent", "older", "a dragon was here long ago"]);
        fx.preset.world_info_depth = 1;
        let mut entry = LoreEntry::new(1, "Dragons.").with_keys(["dragon"]);
        entry.scan_depth = Some(3);
        fx.book.entries = vec![entry];
        assert_eq!(fx.run().placements.before_char_defs.len(), 1);
    }

    #[test]
    fn trigger_gate_by_generation_type() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        fx.book.entries = vec![LoreEntry {
            triggers: vec![GenerationType::Continue],
            ..LoreEntry::new(1, "Dragons.").with_keys(["dragon"])
        }];
        assert!(fx.run().placements.is_empty());

        fx.generation_type = GenerationType::Continue;
        assert_eq!(fx.run().placements.before_char_defs.len(), 1);
    }

    #[test]
    fn delay_suppresses_until_enough_messages() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        fx.book.entries = vec![LoreEntry {
            delay: 3,
            ..LoreEntry::new(1, "Dragons.").with_keys(["dragon"])
        }];
        assert!(fx.run().placements.is_empty());

        let mut fx = Fixture::new().chat_newest_first(&["dragon", "b", "c"]);
        fx.book.entries = vec![LoreEntry {
            delay: 3,
            ..LoreEntry::new(1, "Dragons.").with_keys(["dragon"])
        }];
        assert_eq!(fx.run().placements.before_char_defs.len(), 1);
    }

    #[test]
    fn probability_zero_never_fires() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        fx.book.entries = vec![LoreEntry {
            use_probability: true,
            probability: 0,
            ..LoreEntry::new(1, "Dragons.").with_keys(["dragon"])
        }];
        assert!(fx.run().placements.is_empty());
    }

    #[test]
    fn character_field_scanning() {
        let mut fx = Fixture::new();
        let mut entry = LoreEntry::new(1, "Maps entry").with_keys(["cartographer"]);
        entry.match_character_description = true;
        fx.book.entries = vec![entry];

        let input = LoreInput {
            books: vec![(LoreSource::Global, &fx.book)],
            chat_messages: vec![],
            extra_scan: vec![],
            scan_fields: ScanFields {
                character_description: "Alice is a cartographer of impossible places.",
                ..Default::default()
            },
            preset: &fx.preset,
            generation_type: GenerationType::Normal,
            message_count: 0,
            dry_run: false,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let outcome = evaluate(&input, &mut rng, &HeuristicEstimator, &mut fx.store);
        assert_eq!(outcome.placements.before_char_defs.len(), 1);
    }
}

#[cfg(test)]
mod recursion_tests {
    use super::*;

    fn recursive_book() -> Vec<LoreEntry> {
        vec![
            LoreEntry::new(1, "The dragon guards the Obsidian Vault.").with_keys(["dragon"]),
            LoreEntry::new(2, "The Obsidian Vault lies beneath the old keep.")
                .with_keys(["obsidian vault"]),
        ]
    }

    #[test]
    fn recursion_activates_chained_entries() {
        let mut fx = Fixture::new().chat_newest_first(&["a dragon lands"]);
        fx.preset.world_info_recursive = true;
        fx.book.entries = recursive_book();

        let outcome = fx.run();
        assert_eq!(outcome.placements.before_char_defs.len(), 2);
        let recursed = &outcome.placements.before_char_defs[1];
        assert_eq!(recursed.metadata.get("recursed").map(String::as_str), Some("true"));
    }

    #[test]
    fn recursion_off_means_no_chaining() {
        let mut fx = Fixture::new().chat_newest_first(&["a dragon lands"]);
        fx.book.entries = recursive_book();
        assert_eq!(fx.run().placements.before_char_defs.len(), 1);
    }

    #[test]
    fn prevent_recursion_blocks_contribution() {
        let mut fx = Fixture::new().chat_newest_first(&["a dragon lands"]);
        fx.preset.world_info_recursive = true;
        let mut entries = recursive_book();
        entries[0].prevent_recursion = true;
        fx.book.entries = entries;
        assert_eq!(fx.run().placements.before_char_defs.len(), 1);
    }

    #[test]
    fn exclude_recursion_blocks_activation_by_recursed_text() {
        let mut fx = Fixture::new().chat_newest_first(&["a dragon lands"]);
        fx.preset.world_info_recursive = true;
        let mut entries = recursive_book();
        entries[1].exclude_recursion = true;
        fx.book.entries = entries;
        assert_eq!(fx.run().placements.before_char_defs.len(), 1);
    }

    #[test]
    fn delay_until_recursion_waits_for_pass_two() {
        let mut fx = Fixture::new().chat_newest_first(&["the obsidian vault is mentioned"]);
        fx.preset.world_info_recursive = true;
        let mut entries = recursive_book();
        entries[1].delay_until_recursion = true;
        fx.book.entries = entries;

        // Entry 2's key is in chat, but it only fires on a recursion pass,
        // which requires entry 1 to activate first — and entry 1's key is
        // absent, so nothing recurses.
        assert!(fx.run().placements.is_empty());

        let mut fx2 = Fixture::new().chat_newest_first(&["dragon near the obsidian vault"]);
        fx2.preset.world_info_recursive = true;
        let mut entries = recursive_book();
        entries[1].delay_until_recursion = true;
        fx2.book.entries = entries;
        assert_eq!(fx2.run().placements.before_char_defs.len(), 2);
    }
}

#[cfg(test)]
mod timed_effect_tests {
    use super::*;
    use crate::lore::TIMED_EFFECTS_KEY;

    #[test]
    fn sticky_keeps_entry_active_without_key() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        fx.book.entries = vec![LoreEntry {
            sticky: 3,
            ..LoreEntry::new(1, "Dragons.").with_keys(["dragon"])
        }];
        assert_eq!(fx.run().placements.before_char_defs.len(), 1);
        assert!(fx.store.get(TIMED_EFFECTS_KEY).is_some());

        // Next build: no key match anywhere, but sticky carries it.
        fx.chat = vec!["nothing".into(), "still nothing".into()];
        fx.message_count = 2;
        assert_eq!(fx.run().placements.before_char_defs.len(), 1);
    }

    #[test]
    fn sticky_expires_then_cooldown_blocks() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        fx.book.entries = vec![LoreEntry {
            sticky: 2,
            cooldown: 5,
            ..LoreEntry::new(1, "Dragons.").with_keys(["dragon"])
        }];
        assert_eq!(fx.run().placements.before_char_defs.len(), 1);

        // Past the sticky window: the chained cooldown suppresses the
        // entry even though its key matches.
        fx.chat = vec!["dragon again".into(), "b".into(), "c".into()];
        fx.message_count = 3;
        assert!(fx.run().placements.is_empty());
    }

    #[test]
    fn dry_run_does_not_persist() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        fx.book.entries = vec![LoreEntry {
            sticky: 3,
            ..LoreEntry::new(1, "Dragons.").with_keys(["dragon"])
        }];
        let input = LoreInput {
            books: vec![(LoreSource::Global, &fx.book)],
            chat_messages: fx.chat.clone(),
            extra_scan: vec![],
            scan_fields: ScanFields::default(),
            preset: &fx.preset,
            generation_type: GenerationType::Normal,
            message_count: 1,
            dry_run: true,
        };
        let mut rng = StdRng::seed_from_u64(11);
        let outcome = evaluate(&input, &mut rng, &HeuristicEstimator, &mut fx.store);
        assert_eq!(outcome.placements.before_char_defs.len(), 1);
        assert!(fx.store.get(TIMED_EFFECTS_KEY).is_none());
    }
}

#[cfg(test)]
mod budget_tests {
    use super::*;

    #[test]
    fn over_budget_entries_drop_in_reverse_order() {
        let mut fx = Fixture::new().chat_newest_first(&["I see a dragon"]);
        fx.preset.world_info_budget_cap = 50;
        let mut cheap = LoreEntry::new(1, "Dragons breathe fire.").with_keys(["dragon"]);
        cheap.insertion_order = 10;
        let mut costly = LoreEntry::new(2, "x".repeat(1000)).with_keys(["dragon"]);
        costly.insertion_order = 20;
        fx.book.entries = vec![cheap, costly];

        let outcome = fx.run();
        assert_eq!(outcome.placements.before_char_defs.len(), 1);
        assert!(outcome.placements.before_char_defs[0].content.contains("fire"));
        assert_eq!(outcome.report.len(), 1);
        assert_eq!(outcome.report[0].reason, TrimReason::LoreBudget);
        assert_eq!(outcome.report[0].slot.as_deref(), Some("global:world.2"));
    }

    #[test]
    fn ignore_budget_survives_zero_budget() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        fx.preset.world_info_budget = 0;
        let keep = LoreEntry {
            ignore_budget: true,
            ..LoreEntry::new(1, "Always present.").with_keys(["dragon"])
        };
        let drop = LoreEntry::new(2, "Droppable.").with_keys(["dragon"]);
        fx.book.entries = vec![keep, drop];

        let outcome = fx.run();
        assert_eq!(outcome.placements.before_char_defs.len(), 1);
        assert!(outcome.placements.before_char_defs[0].content.contains("Always"));
        assert_eq!(outcome.report.len(), 1);
    }

    #[test]
    fn constant_entries_win_budget_priority() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        fx.preset.world_info_budget_cap = 10;
        let mut keyed = LoreEntry::new(1, "Keyed entry with some words.").with_keys(["dragon"]);
        keyed.insertion_order = 1;
        let constant = LoreEntry {
            constant: true,
            insertion_order: 99,
            ..LoreEntry::new(2, "Constant entry.")
        };
        fx.book.entries = vec![keyed, constant];

        let outcome = fx.run();
        let kept: Vec<&str> = outcome
            .placements
            .before_char_defs
            .iter()
            .map(|b| b.content.as_str())
            .collect();
        assert_eq!(kept.len(), 1);
        assert!(kept[0].contains("Constant"));
    }
}

#[cfg(test)]
mod placement_tests {
    use super::*;

    #[test]
    fn positions_route_to_their_groups() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        let entry = |uid: u32, position: LorePosition| LoreEntry {
            position,
            ..LoreEntry::new(uid, format!("entry {uid}")).with_keys(["dragon"])
        };
        fx.book.entries = vec![
            entry(1, LorePosition::BeforeCharDefs),
            entry(2, LorePosition::AfterCharDefs),
            entry(3, LorePosition::BeforeExampleMessages),
            entry(4, LorePosition::AfterExampleMessages),
            entry(5, LorePosition::TopOfAn),
            entry(6, LorePosition::BottomOfAn),
            LoreEntry {
                position: LorePosition::AtDepth,
                depth: 2,
                role: Role::Assistant,
                ..LoreEntry::new(7, "depth entry").with_keys(["dragon"])
            },
            LoreEntry {
                position: LorePosition::Outlet,
                outlet_name: Some("sidebar".into()),
                ..LoreEntry::new(8, "outlet entry").with_keys(["dragon"])
            },
        ];

        let outcome = fx.run();
        let p = &outcome.placements;
        assert_eq!(p.before_char_defs.len(), 1);
        assert_eq!(p.after_char_defs.len(), 1);
        assert_eq!(p.before_examples.len(), 1);
        assert_eq!(p.after_examples.len(), 1);
        assert_eq!(p.top_of_an, vec!["entry 5".to_string()]);
        assert_eq!(p.bottom_of_an, vec!["entry 6".to_string()]);
        assert_eq!(p.in_chat.len(), 1);
        assert_eq!(p.in_chat[0].depth, 2);
        assert_eq!(p.in_chat[0].role, Role::Assistant);
        assert_eq!(p.outlets["sidebar"], vec![(100, "outlet entry".to_string())]);
    }

    #[test]
    fn insertion_order_sorts_blocks() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        let mut late = LoreEntry::new(1, "late").with_keys(["dragon"]);
        late.insertion_order = 200;
        let mut early = LoreEntry::new(2, "early").with_keys(["dragon"]);
        early.insertion_order = 50;
        fx.book.entries = vec![late, early];

        let outcome = fx.run();
        let contents: Vec<&str> = outcome
            .placements
            .before_char_defs
            .iter()
            .map(|b| b.content.as_str())
            .collect();
        assert!(contents[0].contains("early"));
        assert!(contents[1].contains("late"));
    }

    #[test]
    fn wi_format_wraps_block_content() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        fx.preset.wi_format = "[Lore: {0}]".into();
        fx.book.entries = vec![LoreEntry::new(1, "Dragons.").with_keys(["dragon"])];
        let outcome = fx.run();
        assert_eq!(outcome.placements.before_char_defs[0].content, "[Lore: Dragons.]");
    }
}

#[cfg(test)]
mod group_tests {
    use super::*;

    fn grouped(uid: u32, weight: i32, order: i32) -> LoreEntry {
        LoreEntry {
            group: "faction".into(),
            group_weight: weight,
            insertion_order: order,
            ..LoreEntry::new(uid, format!("member {uid}")).with_keys(["dragon"])
        }
    }

    #[test]
    fn group_scoring_keeps_heaviest() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        fx.preset.world_info_use_group_scoring = true;
        fx.book.entries = vec![grouped(1, 10, 5), grouped(2, 90, 6)];

        let outcome = fx.run();
        assert_eq!(outcome.placements.before_char_defs.len(), 1);
        assert!(outcome.placements.before_char_defs[0].content.contains("member 2"));
        assert_eq!(outcome.report.len(), 1);
        assert_eq!(outcome.report[0].reason, TrimReason::GroupScoring);
    }

    #[test]
    fn group_override_beats_weight() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        fx.preset.world_info_use_group_scoring = true;
        let mut light = grouped(1, 1, 5);
        light.group_override = true;
        fx.book.entries = vec![light, grouped(2, 90, 6)];

        let outcome = fx.run();
        assert_eq!(outcome.placements.before_char_defs.len(), 1);
        assert!(outcome.placements.before_char_defs[0].content.contains("member 1"));
    }

    #[test]
    fn without_scoring_exactly_one_member_survives() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        fx.book.entries = vec![grouped(1, 50, 5), grouped(2, 50, 6), grouped(3, 50, 7)];
        let outcome = fx.run();
        assert_eq!(outcome.placements.before_char_defs.len(), 1);
        assert_eq!(outcome.report.len(), 2);
    }

    #[test]
    fn different_groups_do_not_interfere() {
        let mut fx = Fixture::new().chat_newest_first(&["dragon"]);
        let mut other = grouped(2, 50, 6);
        other.group = "other".into();
        fx.book.entries = vec![grouped(1, 50, 5), other];
        assert_eq!(fx.run().placements.before_char_defs.len(), 2);
    }
}
