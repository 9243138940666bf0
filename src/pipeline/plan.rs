use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dialect::{Dialect, DialectOptions, WireOutput};
use crate::errors::BuildError;
use crate::types::{Block, BudgetGroup, Role};

/// Why a block (or lore candidate) was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimReason {
    LoreBudget,
    LoreEvicted,
    ExamplesEvicted,
    HistoryEvicted,
    GroupScoring,
    BudgetDeficit,
}

/// One trim-report line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimEntry {
    /// Present when an assembled block was evicted; lore candidates
    /// dropped before block creation carry `None`.
    pub block_id: Option<Uuid>,
    pub slot: Option<String>,
    pub group: BudgetGroup,
    pub reason: TrimReason,
    pub tokens: u32,
}

/// Role-tagged projection of one enabled block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The build output.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// The full linear block sequence, evicted blocks included
    /// (disabled).
    pub blocks: Vec<Block>,
    /// Projection of enabled, non-empty blocks.
    pub messages: Vec<PlanMessage>,
    pub warnings: Vec<String>,
    pub trim_report: Vec<TrimEntry>,
    /// The requested greeting, macro-expanded. Never silently prepended;
    /// hosts that want it in history prepend it themselves.
    pub greeting: Option<String>,
    pub greeting_index: Option<usize>,
}

impl Plan {
    pub(crate) fn project_messages(blocks: &[Block]) -> Vec<PlanMessage> {
        blocks
            .iter()
            .filter(|b| b.enabled && !b.content.is_empty())
            .map(|b| PlanMessage {
                role: b.role,
                content: b.content.clone(),
                name: b.name.clone(),
            })
            .collect()
    }

    /// Project the plan into a wire shape. The only boundary-crossing
    /// serialization.
    pub fn to_messages(
        &self,
        dialect: Dialect,
        options: &DialectOptions,
    ) -> Result<WireOutput, BuildError> {
        crate::dialect::render(&self.blocks, dialect, options)
    }

    /// Total estimated tokens of enabled blocks, as the trimmer counted
    /// them.
    pub fn enabled_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| b.enabled)
    }
}
