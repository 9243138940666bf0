use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::Rng;

use super::matcher::{KeyMatcher, MatchOptions, ScanText};
use super::timed::TimedEffects;
use crate::pipeline::plan::{TrimEntry, TrimReason};
use crate::tokens::TokenEstimator;
use crate::types::{
    Block, BudgetGroup, EntryKey, GenerationType, LoreBook, LoreEntry, LoreInsertionStrategy,
    LorePosition, LoreSource, Preset, slots,
};
use crate::vars::VariableStore;

/// Hard cap on the scan buffer; beyond this it is truncated with a warning.
const SCAN_BUFFER_CAP: usize = 1024 * 1024;

/// Recursion step ceiling regardless of preset configuration.
const MAX_RECURSION_CAP: u32 = 10;

/// Priority offsets encoding the trim ordering: constant entries are kept
/// longest, recursion-activated entries go first.
const CONSTANT_PRIORITY: i32 = -100_000;
const RECURSED_PRIORITY: i32 = 100_000;

/// Character/persona fields an entry may opt into scanning.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanFields<'a> {
    pub character_description: &'a str,
    pub character_personality: &'a str,
    pub scenario: &'a str,
    pub creator_notes: &'a str,
    pub persona: &'a str,
    pub depth_prompt: &'a str,
}

/// Everything the lore engine reads.
pub struct LoreInput<'a> {
    /// Books in merge order, tagged by source.
    pub books: Vec<(LoreSource, &'a LoreBook)>,
    /// Visible chat message text, newest first, already name-formatted.
    pub chat_messages: Vec<String>,
    /// Text that always participates in the scan: scan-flagged
    /// injections, authors note when allowed.
    pub extra_scan: Vec<String>,
    pub scan_fields: ScanFields<'a>,
    pub preset: &'a Preset,
    pub generation_type: GenerationType,
    /// Current chat length; drives delay windows and timed effects.
    pub message_count: u32,
    /// Skip timed-effect persistence.
    pub dry_run: bool,
}

/// Activated entries grouped by placement, ready for the assembler.
#[derive(Debug, Default)]
pub struct LorePlacements {
    pub before_char_defs: Vec<Block>,
    pub after_char_defs: Vec<Block>,
    pub before_examples: Vec<Block>,
    pub after_examples: Vec<Block>,
    pub top_of_an: Vec<String>,
    pub bottom_of_an: Vec<String>,
    pub in_chat: Vec<Block>,
    /// Outlet name → (insertion order, content).
    pub outlets: BTreeMap<String, Vec<(i32, String)>>,
}

impl LorePlacements {
    pub fn is_empty(&self) -> bool {
        self.before_char_defs.is_empty()
            && self.after_char_defs.is_empty()
            && self.before_examples.is_empty()
            && self.after_examples.is_empty()
            && self.top_of_an.is_empty()
            && self.bottom_of_an.is_empty()
            && self.in_chat.is_empty()
            && self.outlets.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct LoreOutcome {
    pub placements: LorePlacements,
    pub report: Vec<TrimEntry>,
    pub warnings: Vec<String>,
}

struct Candidate<'a> {
    key: EntryKey,
    entry: &'a LoreEntry,
    source_rank: i32,
    index: usize,
    scan_depth: u32,
}

struct Activation {
    candidate_index: usize,
    recursed: bool,
}

/// Evaluate all books against the scan state and produce placements.
pub fn evaluate(
    input: &LoreInput<'_>,
    rng: &mut StdRng,
    estimator: &dyn TokenEstimator,
    store: &mut dyn VariableStore,
) -> LoreOutcome {
    let mut outcome = LoreOutcome::default();
    let mut matcher = KeyMatcher::new();

    let candidates = collect_candidates(input);
    if candidates.is_empty() {
        return outcome;
    }

    // Timed-effect bookkeeping happens even when nothing matches.
    let mut timed = TimedEffects::load(store);
    for ended in timed.expire(input.message_count) {
        if let Some(candidate) = candidates.iter().find(|c| c.key.to_string() == ended) {
            timed.chain_cooldown(&ended, candidate.entry.cooldown, input.message_count);
        }
    }

    let mut active: Vec<Activation> = Vec::new();
    let mut active_keys: BTreeSet<usize> = BTreeSet::new();
    let mut recursion_text = String::new();
    let mut scan_cache: BTreeMap<(u32, bool), ScanText> = BTreeMap::new();

    let recursive = input.preset.world_info_recursive
        || input
            .books
            .iter()
            .any(|(_, book)| book.recursive_scanning == Some(true));
    let max_steps = if recursive {
        input
            .preset
            .world_info_max_recursion_steps
            .min(MAX_RECURSION_CAP)
    } else {
        0
    };

    // Step 0 is the normal pass; steps 1..=max_steps re-scan with
    // recursed content appended.
    let mut step = 0u32;
    loop {
        let is_recursion_pass = step > 0;
        let mut newly: Vec<usize> = Vec::new();

        for (idx, candidate) in candidates.iter().enumerate() {
            if active_keys.contains(&idx) {
                continue;
            }
            let entry = candidate.entry;
            if !entry.triggers_on(input.generation_type) {
                continue;
            }

            let activated = if !is_recursion_pass && timed.is_sticky(&candidate.key) {
                // Sticky wins over cooldown and key misses.
                true
            } else {
                if timed.in_cooldown(&candidate.key) {
                    continue;
                }
                if input.message_count < entry.delay {
                    continue;
                }
                if entry.delay_until_recursion && !is_recursion_pass {
                    continue;
                }
                if is_recursion_pass && entry.exclude_recursion {
                    continue;
                }

                let hit = entry.constant || {
                    let scan = entry_scan_text(
                        input,
                        candidate,
                        &recursion_text,
                        &mut scan_cache,
                        &mut outcome.warnings,
                    );
                    matcher.selective_matches(entry, &scan, MatchOptions::for_entry(entry))
                };
                if !hit {
                    continue;
                }
                if entry.use_probability && entry.probability < 100 {
                    let draw = rng.random_range(0..100u32);
                    if draw >= entry.probability as u32 {
                        tracing::debug!(entry = %candidate.key, "lore entry lost its probability roll");
                        continue;
                    }
                }

                timed.on_activated(
                    &candidate.key,
                    entry.sticky,
                    entry.cooldown,
                    input.message_count,
                );
                true
            };

            if activated {
                active_keys.insert(idx);
                newly.push(idx);
                active.push(Activation {
                    candidate_index: idx,
                    recursed: is_recursion_pass,
                });
            }
        }

        // Feed fresh content into the recursion buffer.
        for idx in &newly {
            let entry = candidates[*idx].entry;
            if !entry.prevent_recursion {
                recursion_text.push('\n');
                recursion_text.push_str(&entry.content);
            }
        }
        if recursion_text.len() > SCAN_BUFFER_CAP {
            truncate_in_place(&mut recursion_text, SCAN_BUFFER_CAP);
            outcome
                .warnings
                .push("lore recursion buffer exceeded 1 MiB and was truncated".into());
        }
        // Recursed content invalidates cached buffers.
        if !newly.is_empty() {
            scan_cache.clear();
        }

        step += 1;
        if step > max_steps || newly.is_empty() {
            break;
        }
    }

    // Widen the chat window until the minimum activation count is met.
    min_activation_passes(
        input,
        &candidates,
        &mut matcher,
        &mut timed,
        rng,
        &mut active,
        &mut active_keys,
        &mut outcome.warnings,
    );

    if !input.dry_run {
        timed.save(store);
    }
    outcome.warnings.append(&mut matcher.warnings);

    apply_group_filters(input, &candidates, &mut active, rng, &mut outcome.report);
    apply_budget(input, &candidates, &mut active, estimator, &mut outcome.report);
    place(input, &candidates, &active, &mut outcome);
    outcome
}

fn collect_candidates<'a>(input: &LoreInput<'a>) -> Vec<Candidate<'a>> {
    let mut candidates = Vec::new();
    for (source, book) in &input.books {
        for entry in &book.entries {
            if !entry.enabled {
                continue;
            }
            let source_rank = match input.preset.character_lore_insertion_strategy {
                LoreInsertionStrategy::Sorted => 0,
                LoreInsertionStrategy::CharacterFirst => match source {
                    LoreSource::Character => 0,
                    LoreSource::Global => 1,
                },
                LoreInsertionStrategy::GlobalFirst => match source {
                    LoreSource::Character => 1,
                    LoreSource::Global => 0,
                },
            };
            let scan_depth = entry
                .scan_depth
                .or(book.scan_depth)
                .unwrap_or(input.preset.world_info_depth);
            candidates.push(Candidate {
                key: EntryKey {
                    source: *source,
                    book: book.name.clone(),
                    uid: entry.uid,
                },
                entry,
                source_rank,
                index: candidates.len(),
                scan_depth,
            });
        }
    }
    candidates
}

/// Scan text for one entry: chat window at its depth, the always-scanned
/// extras, recursed content, and any opted-in character fields.
fn entry_scan_text(
    input: &LoreInput<'_>,
    candidate: &Candidate<'_>,
    recursion_text: &str,
    cache: &mut BTreeMap<(u32, bool), ScanText>,
    warnings: &mut Vec<String>,
) -> ScanText {
    let entry = candidate.entry;
    let wants_fields = entry.match_character_description
        || entry.match_character_personality
        || entry.match_scenario
        || entry.match_creator_notes
        || entry.match_persona
        || entry.match_depth_prompt;

    if !wants_fields {
        if let Some(cached) = cache.get(&(candidate.scan_depth, false)) {
            return cached.clone();
        }
    }

    let mut buffer = String::new();
    let depth = candidate.scan_depth as usize;
    if depth > 0 {
        for message in input.chat_messages.iter().take(depth) {
            buffer.push_str(message);
            buffer.push('\n');
        }
    }
    for extra in &input.extra_scan {
        buffer.push_str(extra);
        buffer.push('\n');
    }
    buffer.push_str(recursion_text);

    if wants_fields {
        let fields = &input.scan_fields;
        for (flag, text) in [
            (entry.match_character_description, fields.character_description),
            (entry.match_character_personality, fields.character_personality),
            (entry.match_scenario, fields.scenario),
            (entry.match_creator_notes, fields.creator_notes),
            (entry.match_persona, fields.persona),
            (entry.match_depth_prompt, fields.depth_prompt),
        ] {
            if flag && !text.is_empty() {
                buffer.push('\n');
                buffer.push_str(text);
            }
        }
    }

    if buffer.len() > SCAN_BUFFER_CAP {
        truncate_in_place(&mut buffer, SCAN_BUFFER_CAP);
        warnings.push("lore scan buffer exceeded 1 MiB and was truncated".into());
    }

    let scan = ScanText::new(buffer);
    if !wants_fields {
        cache.insert((candidate.scan_depth, false), scan.clone());
    }
    scan
}

#[allow(clippy::too_many_arguments)]
fn min_activation_passes(
    input: &LoreInput<'_>,
    candidates: &[Candidate<'_>],
    matcher: &mut KeyMatcher,
    timed: &mut TimedEffects,
    rng: &mut StdRng,
    active: &mut Vec<Activation>,
    active_keys: &mut BTreeSet<usize>,
    warnings: &mut Vec<String>,
) {
    let target = input.preset.world_info_min_activations as usize;
    if target == 0 || active.len() >= target {
        return;
    }
    let depth_cap = input
        .preset
        .world_info_min_activations_depth_max
        .min(input.chat_messages.len() as u32);
    let base = input.preset.world_info_depth;

    let mut depth = base + 1;
    while depth <= depth_cap && active.len() < target {
        for (idx, candidate) in candidates.iter().enumerate() {
            if active_keys.contains(&idx) || active.len() >= target {
                continue;
            }
            let entry = candidate.entry;
            if !entry.triggers_on(input.generation_type)
                || entry.constant
                || timed.in_cooldown(&candidate.key)
                || input.message_count < entry.delay
                || entry.delay_until_recursion
            {
                continue;
            }
            let probe = Candidate {
                key: candidate.key.clone(),
                entry,
                source_rank: candidate.source_rank,
                index: candidate.index,
                scan_depth: depth,
            };
            let mut cache = BTreeMap::new();
            let scan = entry_scan_text(input, &probe, "", &mut cache, warnings);
            if !matcher.selective_matches(entry, &scan, MatchOptions::for_entry(entry)) {
                continue;
            }
            if entry.use_probability && entry.probability < 100 {
                let draw = rng.random_range(0..100u32);
                if draw >= entry.probability as u32 {
                    continue;
                }
            }
            timed.on_activated(&candidate.key, entry.sticky, entry.cooldown, input.message_count);
            active_keys.insert(idx);
            active.push(Activation {
                candidate_index: idx,
                recursed: false,
            });
        }
        depth += 1;
    }
}

/// Inclusion groups: at most one activated entry per non-empty group.
fn apply_group_filters(
    input: &LoreInput<'_>,
    candidates: &[Candidate<'_>],
    active: &mut Vec<Activation>,
    rng: &mut StdRng,
    report: &mut Vec<TrimEntry>,
) {
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (pos, activation) in active.iter().enumerate() {
        let entry = candidates[activation.candidate_index].entry;
        if !entry.group.is_empty() {
            groups.entry(entry.group.as_str()).or_default().push(pos);
        }
    }

    let mut dropped: BTreeSet<usize> = BTreeSet::new();
    for (_, members) in groups {
        if members.len() < 2 {
            continue;
        }
        let entry_of = |pos: usize| candidates[active[pos].candidate_index].entry;

        let winner = if let Some(overridden) = members
            .iter()
            .filter(|pos| entry_of(**pos).group_override)
            .min_by_key(|pos| entry_of(**pos).insertion_order)
        {
            *overridden
        } else {
            let scoring = members.iter().any(|pos| {
                entry_of(*pos)
                    .use_group_scoring
                    .unwrap_or(input.preset.world_info_use_group_scoring)
            });
            if scoring {
                *members
                    .iter()
                    .max_by_key(|pos| (entry_of(**pos).group_weight, -entry_of(**pos).insertion_order))
                    .expect("non-empty group")
            } else {
                weighted_draw(&members, |pos| entry_of(pos).group_weight.max(1) as u32, rng)
            }
        };

        for pos in members {
            if pos != winner {
                dropped.insert(pos);
                let candidate = &candidates[active[pos].candidate_index];
                report.push(TrimEntry {
                    block_id: None,
                    slot: Some(candidate.key.to_string()),
                    group: BudgetGroup::Lore,
                    reason: TrimReason::GroupScoring,
                    tokens: 0,
                });
            }
        }
    }

    let mut pos = 0;
    active.retain(|_| {
        let keep = !dropped.contains(&pos);
        pos += 1;
        keep
    });
}

fn weighted_draw(members: &[usize], weight: impl Fn(usize) -> u32, rng: &mut StdRng) -> usize {
    let total: u32 = members.iter().map(|pos| weight(*pos)).sum();
    let mut roll = rng.random_range(0..total.max(1));
    for pos in members {
        let w = weight(*pos);
        if roll < w {
            return *pos;
        }
        roll -= w;
    }
    members[members.len() - 1]
}

/// Token budget over activated entries. Candidates sort constant-first,
/// then ignore-budget, then insertion order, then probability.
fn apply_budget(
    input: &LoreInput<'_>,
    candidates: &[Candidate<'_>],
    active: &mut Vec<Activation>,
    estimator: &dyn TokenEstimator,
    report: &mut Vec<TrimEntry>,
) {
    let budget = input.preset.lore_budget();

    let mut order: Vec<usize> = (0..active.len()).collect();
    order.sort_by_key(|pos| {
        let candidate = &candidates[active[*pos].candidate_index];
        let entry = candidate.entry;
        (
            std::cmp::Reverse(entry.constant),
            std::cmp::Reverse(entry.ignore_budget),
            entry.insertion_order,
            std::cmp::Reverse(entry.probability),
            candidate.source_rank,
            candidate.index,
        )
    });

    let mut spent: u64 = 0;
    let mut dropped: BTreeSet<usize> = BTreeSet::new();
    for pos in order {
        let candidate = &candidates[active[pos].candidate_index];
        let entry = candidate.entry;
        let cost = estimator.estimate(&wrap_content(input.preset, &entry.content)) as u64;
        if entry.ignore_budget {
            spent += cost;
            continue;
        }
        if spent + cost > budget as u64 {
            dropped.insert(pos);
            tracing::debug!(entry = %candidate.key, cost, "lore entry dropped for budget");
            report.push(TrimEntry {
                block_id: None,
                slot: Some(candidate.key.to_string()),
                group: BudgetGroup::Lore,
                reason: TrimReason::LoreBudget,
                tokens: cost as u32,
            });
        } else {
            spent += cost;
        }
    }

    let mut pos = 0;
    active.retain(|_| {
        let keep = !dropped.contains(&pos);
        pos += 1;
        keep
    });
}

fn wrap_content(preset: &Preset, content: &str) -> String {
    if preset.wi_format.is_empty() {
        content.to_string()
    } else {
        preset.wi_format.replace("{0}", content)
    }
}

fn place(
    input: &LoreInput<'_>,
    candidates: &[Candidate<'_>],
    active: &[Activation],
    outcome: &mut LoreOutcome,
) {
    let mut order: Vec<usize> = (0..active.len()).collect();
    order.sort_by_key(|pos| {
        let candidate = &candidates[active[*pos].candidate_index];
        (
            candidate.entry.insertion_order,
            candidate.source_rank,
            candidate.index,
        )
    });

    for pos in order {
        let activation = &active[pos];
        let candidate = &candidates[activation.candidate_index];
        let entry = candidate.entry;

        match entry.position {
            LorePosition::TopOfAn => {
                outcome.placements.top_of_an.push(entry.content.clone());
                continue;
            }
            LorePosition::BottomOfAn => {
                outcome.placements.bottom_of_an.push(entry.content.clone());
                continue;
            }
            LorePosition::Outlet => {
                let name = entry
                    .outlet_name
                    .clone()
                    .or_else(|| entry.name.clone());
                match name {
                    Some(name) => outcome
                        .placements
                        .outlets
                        .entry(name)
                        .or_default()
                        .push((entry.insertion_order, entry.content.clone())),
                    None => outcome.warnings.push(format!(
                        "lore entry {} targets an outlet but names none",
                        candidate.key
                    )),
                }
                continue;
            }
            _ => {}
        }

        let mut priority = entry.insertion_order;
        if entry.constant {
            priority += CONSTANT_PRIORITY;
        }
        if activation.recursed {
            priority += RECURSED_PRIORITY;
        }

        let mut block = Block::new(entry.role, wrap_content(input.preset, &entry.content))
            .with_slot(slots::WORLD_INFO_ENTRY)
            .in_group(BudgetGroup::Lore)
            .with_priority(priority)
            .with_meta("lore_key", candidate.key.to_string());
        if entry.ignore_budget {
            block = block.with_meta("ignore_budget", "true");
        }
        if activation.recursed {
            block = block.with_meta("recursed", "true");
        }
        block.order = entry.insertion_order;

        match entry.position {
            LorePosition::BeforeCharDefs => outcome.placements.before_char_defs.push(block),
            LorePosition::AfterCharDefs => outcome.placements.after_char_defs.push(block),
            LorePosition::BeforeExampleMessages => outcome.placements.before_examples.push(block),
            LorePosition::AfterExampleMessages => outcome.placements.after_examples.push(block),
            LorePosition::AtDepth => {
                let block = block.at_depth(entry.depth, entry.insertion_order);
                outcome.placements.in_chat.push(block);
            }
            LorePosition::TopOfAn | LorePosition::BottomOfAn | LorePosition::Outlet => {
                unreachable!("handled above")
            }
        }
    }
}

fn truncate_in_place(text: &mut String, cap: usize) {
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}
