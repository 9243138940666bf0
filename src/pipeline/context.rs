use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use serde_json::Value;
use uuid::Uuid;

use super::plan::TrimEntry;
use crate::inject::InjectionRegistry;
use crate::lore::LorePlacements;
use crate::macros::{expand, MacroEnv, MacroRegistry};
use crate::tokens::TokenEstimator;
use crate::types::{
    Block, Character, GenerationType, GroupContext, History, LoreBook, Preset, PromptEntry, User,
};
use crate::vars::VariableStore;

/// Callback consulted for unknown pinned prompt entries before the
/// assembler warns (or errors in strict mode).
pub type PinnedResolver = dyn Fn(&PromptEntry) -> Option<Vec<Block>> + Send + Sync;

/// The in-flight mutable state of one build.
///
/// Created by the builder, threaded through every worker and both hook
/// points, and destroyed when the plan is extracted.
pub struct BuildContext<'a> {
    // — immutable inputs —
    pub character: &'a Character,
    pub user: &'a User,
    pub history: &'a dyn History,
    pub preset: &'a Preset,
    pub group: Option<&'a GroupContext>,
    pub global_lorebooks: Vec<&'a LoreBook>,
    pub injections: &'a InjectionRegistry,
    pub macro_registry: Option<&'a MacroRegistry>,
    pub pinned_resolver: Option<&'a PinnedResolver>,
    pub macro_vars: BTreeMap<String, Value>,
    pub generation_type: GenerationType,
    pub user_message: Option<String>,
    pub greeting_index: Option<usize>,
    pub strict: bool,
    pub dry_run: bool,

    // — environment —
    pub estimator: &'a dyn TokenEstimator,
    pub rng: StdRng,
    pub now: DateTime<Utc>,
    pub pick_seed: u64,
    pub(crate) seed: u64,

    // — mutable stores —
    pub local_vars: &'a mut dyn VariableStore,
    pub global_vars: &'a mut dyn VariableStore,

    // — in-flight state —
    /// The main region stream in emission order (relative blocks, the
    /// chat-history sentinel, before/in-prompt injections, PHI).
    pub blocks: Vec<Block>,
    /// Blocks interleaved into chat later, carried with
    /// `(depth, order, role)`.
    pub in_chat_blocks: Vec<Block>,
    /// Lore engine output awaiting placement.
    pub lore: LorePlacements,
    /// Outlet name → joined content, drained by the macro pass.
    pub outlets: BTreeMap<String, String>,
    /// Formatted example dialogue for `{{mesExamples}}`.
    pub examples_text: String,
    pub warnings: Vec<String>,
    pub report: Vec<TrimEntry>,
    pub greeting: Option<String>,

    id_counter: u64,
}

impl<'a> BuildContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        character: &'a Character,
        user: &'a User,
        history: &'a dyn History,
        preset: &'a Preset,
        injections: &'a InjectionRegistry,
        estimator: &'a dyn TokenEstimator,
        local_vars: &'a mut dyn VariableStore,
        global_vars: &'a mut dyn VariableStore,
        seed: u64,
    ) -> Self {
        use rand::SeedableRng;
        Self {
            character,
            user,
            history,
            preset,
            group: None,
            global_lorebooks: Vec::new(),
            injections,
            macro_registry: None,
            pinned_resolver: None,
            macro_vars: BTreeMap::new(),
            generation_type: GenerationType::Normal,
            user_message: None,
            greeting_index: None,
            strict: false,
            dry_run: false,
            estimator,
            rng: StdRng::seed_from_u64(seed),
            now: Utc::now(),
            pick_seed: 0,
            seed,
            local_vars,
            global_vars,
            blocks: Vec::new(),
            in_chat_blocks: Vec::new(),
            lore: LorePlacements::default(),
            outlets: BTreeMap::new(),
            examples_text: String::new(),
            warnings: Vec::new(),
            report: Vec::new(),
            greeting: None,
            id_counter: 0,
        }
    }

    /// Deterministic block id: seeded by the build, sequenced by
    /// creation order, so identical inputs produce identical plans.
    pub fn next_id(&mut self) -> Uuid {
        self.id_counter += 1;
        Uuid::from_u64_pair(self.seed, self.id_counter)
    }

    /// Append to the main stream, assigning a deterministic id.
    pub fn push_block(&mut self, mut block: Block) {
        block.id = self.next_id();
        self.blocks.push(block);
    }

    /// Carry an in-chat block forward, assigning a deterministic id.
    pub fn push_in_chat(&mut self, mut block: Block) {
        block.id = self.next_id();
        self.in_chat_blocks.push(block);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("build warning: {message}");
        self.warnings.push(message);
    }

    /// Number of visible user messages; drives the authors-note
    /// frequency gate and turn conditions.
    pub fn user_turns(&self) -> u32 {
        self.history.user_message_count() as u32
    }

    /// Expand a template against the current build state.
    pub fn expand_macros(&mut self, template: &str, allow_outlets: bool) -> String {
        self.expand_macros_with_original(template, allow_outlets, None)
    }

    /// Expansion with a one-shot `{{original}}` value, used when
    /// character overrides compose with preset text.
    pub fn expand_macros_with_original(
        &mut self,
        template: &str,
        allow_outlets: bool,
        original: Option<String>,
    ) -> String {
        let mut env = MacroEnv {
            character: self.character,
            user: self.user,
            group: self.group,
            history: self.history,
            preset: self.preset,
            generation_type: self.generation_type,
            input: self.user_message.clone().unwrap_or_default(),
            examples_text: self.examples_text.clone(),
            local_vars: &mut *self.local_vars,
            global_vars: &mut *self.global_vars,
            registry: self.macro_registry,
            overrides: &self.macro_vars,
            rng: &mut self.rng,
            pick_seed: self.pick_seed,
            now: self.now,
            outlets: self.outlets.clone(),
            allow_outlets,
            original,
        };
        expand(template, &mut env)
    }
}
