use crate::pipeline::context::BuildContext;
use crate::pipeline::plan::{TrimEntry, TrimReason};
use crate::pipeline::worker::{BuildWorker, WorkerError};
use crate::types::{Block, BudgetGroup, ExamplesBehavior, Role, slots};

/// Evicts blocks until the plan fits the input-token budget.
///
/// Strict order: example blocks (earliest first), then lore (least
/// important first, `ignore_budget` exempt), then history (oldest first,
/// never the most recent user message). System blocks, PHI and the
/// authors note are never evicted. Evicted blocks stay in the sequence,
/// disabled, and are never revived.
pub struct TrimWorker;

impl BuildWorker for TrimWorker {
    fn name(&self) -> &str {
        "trim"
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), WorkerError> {
        let Some(budget) = ctx.preset.max_input_tokens() else {
            return Err(WorkerError::skipped(self.name(), "no context window configured"));
        };
        let budget = budget as u64;
        let overhead = ctx.preset.message_token_overhead as u64;

        let costs: Vec<u64> = ctx
            .blocks
            .iter()
            .map(|b| ctx.estimator.estimate(&b.content) as u64 + overhead)
            .collect();
        let mut total: u64 = ctx
            .blocks
            .iter()
            .zip(&costs)
            .filter(|(b, _)| b.enabled)
            .map(|(_, c)| *c)
            .sum();
        if total <= budget {
            return Ok(());
        }
        tracing::debug!(total, budget, "over budget, trimming");

        // 1. Examples, earliest first.
        if ctx.preset.examples_behavior != ExamplesBehavior::AlwaysKeep {
            let victims: Vec<usize> = ctx
                .blocks
                .iter()
                .enumerate()
                .filter(|(_, b)| b.enabled && b.group == BudgetGroup::Examples)
                .map(|(i, _)| i)
                .collect();
            total = evict(ctx, &costs, victims, total, budget, TrimReason::ExamplesEvicted);
            if total <= budget {
                return Ok(());
            }
        }

        // 2. Lore, least important first; `ignore_budget` is exempt.
        let mut lore: Vec<usize> = ctx
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| {
                b.enabled
                    && b.group == BudgetGroup::Lore
                    && b.metadata.get("ignore_budget").map(String::as_str) != Some("true")
            })
            .map(|(i, _)| i)
            .collect();
        // Highest priority value goes first; recursion-activated entries
        // encode a large offset, constants a negative one.
        lore.sort_by_key(|i| std::cmp::Reverse((ctx.blocks[*i].priority, ctx.blocks[*i].order)));
        total = evict(ctx, &costs, lore, total, budget, TrimReason::LoreEvicted);
        if total <= budget {
            return Ok(());
        }

        // 3. History, oldest first, sparing the most recent user message.
        let last_user = ctx
            .blocks
            .iter()
            .rposition(|b| b.enabled && b.group == BudgetGroup::History && b.role == Role::User);
        let victims: Vec<usize> = ctx
            .blocks
            .iter()
            .enumerate()
            .filter(|(i, b)| b.enabled && b.group == BudgetGroup::History && Some(*i) != last_user)
            .map(|(i, _)| i)
            .collect();
        total = evict(ctx, &costs, victims, total, budget, TrimReason::HistoryEvicted);

        if total > budget {
            ctx.warn(format!(
                "prompt still exceeds the input budget after trimming \
                 ({total} > {budget} tokens)"
            ));
            ctx.report.push(TrimEntry {
                block_id: None,
                slot: None,
                group: BudgetGroup::Default,
                reason: TrimReason::BudgetDeficit,
                tokens: (total - budget) as u32,
            });
        }
        Ok(())
    }
}

fn evict(
    ctx: &mut BuildContext<'_>,
    costs: &[u64],
    victims: Vec<usize>,
    mut total: u64,
    budget: u64,
    reason: TrimReason,
) -> u64 {
    for index in victims {
        if total <= budget {
            break;
        }
        let block = &mut ctx.blocks[index];
        if never_evict(block) {
            continue;
        }
        block.enabled = false;
        total -= costs[index];
        let entry = TrimEntry {
            block_id: Some(block.id),
            slot: block.slot.clone(),
            group: block.group,
            reason,
            tokens: costs[index] as u32,
        };
        tracing::debug!(slot = ?entry.slot, ?reason, tokens = entry.tokens, "evicted block");
        ctx.report.push(entry);
    }
    total
}

/// Hard reservations: the system group, PHI and the authors note.
fn never_evict(block: &Block) -> bool {
    block.group == BudgetGroup::System
        || block.has_slot(slots::POST_HISTORY_INSTRUCTIONS)
        || block.has_slot(slots::AUTHORS_NOTE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_evict_covers_reserved_slots() {
        let phi = Block::new(Role::System, "x")
            .with_slot(slots::POST_HISTORY_INSTRUCTIONS)
            .in_group(BudgetGroup::System);
        assert!(never_evict(&phi));

        let note = Block::new(Role::System, "x")
            .with_slot(slots::AUTHORS_NOTE)
            .in_group(BudgetGroup::Default);
        assert!(never_evict(&note));

        let lore = Block::new(Role::System, "x").in_group(BudgetGroup::Lore);
        assert!(!never_evict(&lore));
    }
}
