use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::context::{BuildContext, PinnedResolver};
use super::plan::Plan;
use super::worker::WorkerPipeline;
use super::workers::{
    AssembleWorker, CompileWorker, EntriesWorker, InjectionsWorker, LoreWorker, MacroWorker,
    TrimWorker,
};
use crate::errors::BuildError;
use crate::hooks::HookRegistry;
use crate::inject::InjectionRegistry;
use crate::macros::MacroRegistry;
use crate::tokens::{HeuristicEstimator, TokenEstimator};
use crate::types::{Character, GenerationType, GroupContext, History, LoreBook, Preset, User};
use crate::vars::{MemoryVariableStore, VariableStore};

/// Assembles one prompt.
///
/// Borrows every input for the duration of the build; nothing is retained
/// afterwards. Reserved `macro_vars` keys: `rng_seed`, `pick_seed` and
/// `now` (RFC 3339) pin the determinism inputs; everything else is a
/// plain macro override.
pub struct PromptBuilder<'a> {
    character: &'a Character,
    user: &'a User,
    history: &'a dyn History,
    preset: &'a Preset,
    user_message: Option<String>,
    generation_type: GenerationType,
    greeting_index: Option<usize>,
    global_lorebooks: Vec<&'a LoreBook>,
    injections: Option<&'a mut InjectionRegistry>,
    macro_registry: Option<&'a MacroRegistry>,
    hooks: Option<&'a HookRegistry>,
    local_vars: Option<&'a mut dyn VariableStore>,
    global_vars: Option<&'a mut dyn VariableStore>,
    group: Option<&'a GroupContext>,
    macro_vars: BTreeMap<String, Value>,
    estimator: Option<&'a dyn TokenEstimator>,
    pinned_resolver: Option<&'a PinnedResolver>,
    strict: bool,
    dry_run: bool,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(
        character: &'a Character,
        user: &'a User,
        history: &'a dyn History,
        preset: &'a Preset,
    ) -> Self {
        Self {
            character,
            user,
            history,
            preset,
            user_message: None,
            generation_type: GenerationType::Normal,
            greeting_index: None,
            global_lorebooks: Vec::new(),
            injections: None,
            macro_registry: None,
            hooks: None,
            local_vars: None,
            global_vars: None,
            group: None,
            macro_vars: BTreeMap::new(),
            estimator: None,
            pinned_resolver: None,
            strict: false,
            dry_run: false,
        }
    }

    pub fn user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    pub fn generation_type(mut self, generation_type: GenerationType) -> Self {
        self.generation_type = generation_type;
        self
    }

    pub fn greeting_index(mut self, index: usize) -> Self {
        self.greeting_index = Some(index);
        self
    }

    pub fn global_lorebook(mut self, book: &'a LoreBook) -> Self {
        self.global_lorebooks.push(book);
        self
    }

    pub fn injections(mut self, registry: &'a mut InjectionRegistry) -> Self {
        self.injections = Some(registry);
        self
    }

    pub fn macro_registry(mut self, registry: &'a MacroRegistry) -> Self {
        self.macro_registry = Some(registry);
        self
    }

    pub fn hooks(mut self, hooks: &'a HookRegistry) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn variable_stores(
        mut self,
        local: &'a mut dyn VariableStore,
        global: &'a mut dyn VariableStore,
    ) -> Self {
        self.local_vars = Some(local);
        self.global_vars = Some(global);
        self
    }

    pub fn group(mut self, group: &'a GroupContext) -> Self {
        self.group = Some(group);
        self
    }

    pub fn macro_var(mut self, key: impl Into<String>, value: Value) -> Self {
        self.macro_vars.insert(key.into(), value);
        self
    }

    pub fn estimator(mut self, estimator: &'a dyn TokenEstimator) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn pinned_resolver(mut self, resolver: &'a PinnedResolver) -> Self {
        self.pinned_resolver = Some(resolver);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Skip timed-effect persistence; the plan itself is unaffected.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run the pipeline. Ephemeral injections are pruned from the
    /// registry afterwards, error or not.
    pub fn build(self) -> Result<Plan, BuildError> {
        if self.character.name.is_empty() {
            return Err(BuildError::InvalidInput("character name is required".into()));
        }
        if self.user.name.is_empty() {
            return Err(BuildError::InvalidInput("user name is required".into()));
        }

        let mut default_local = MemoryVariableStore::new();
        let mut default_global = MemoryVariableStore::new();
        let default_registry = InjectionRegistry::new();
        let default_estimator = HeuristicEstimator;

        let seed = self
            .macro_vars
            .get("rng_seed")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let pick_seed = self
            .macro_vars
            .get("pick_seed")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let now: DateTime<Utc> = self
            .macro_vars
            .get("now")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let mut injections = self.injections;
        let result = {
            let injections_read: &InjectionRegistry = match injections.as_deref() {
                Some(registry) => registry,
                None => &default_registry,
            };
            let local: &mut dyn VariableStore = match self.local_vars {
                Some(store) => store,
                None => &mut default_local,
            };
            let global: &mut dyn VariableStore = match self.global_vars {
                Some(store) => store,
                None => &mut default_global,
            };
            let estimator = self.estimator.unwrap_or(&default_estimator);

            let mut ctx = BuildContext::new(
                self.character,
                self.user,
                self.history,
                self.preset,
                injections_read,
                estimator,
                local,
                global,
                seed,
            );
            ctx.group = self.group;
            ctx.global_lorebooks = self.global_lorebooks;
            ctx.macro_registry = self.macro_registry;
            ctx.pinned_resolver = self.pinned_resolver;
            ctx.macro_vars = self.macro_vars;
            ctx.generation_type = self.generation_type;
            ctx.user_message = self.user_message;
            ctx.greeting_index = self.greeting_index;
            ctx.strict = self.strict;
            ctx.dry_run = self.dry_run;
            ctx.pick_seed = pick_seed;
            ctx.now = now;

            run_pipeline(&mut ctx, self.hooks).map(|()| {
                let messages = Plan::project_messages(&ctx.blocks);
                Plan {
                    blocks: std::mem::take(&mut ctx.blocks),
                    messages,
                    warnings: std::mem::take(&mut ctx.warnings),
                    trim_report: std::mem::take(&mut ctx.report),
                    greeting: ctx.greeting.take(),
                    greeting_index: ctx.greeting_index,
                }
            })
        };

        // Best-effort pruning even when a worker failed.
        if let Some(registry) = injections.as_deref_mut() {
            registry.prune_ephemeral();
        }
        result
    }
}

fn run_pipeline(ctx: &mut BuildContext<'_>, hooks: Option<&HookRegistry>) -> Result<(), BuildError> {
    tracing::debug!(
        character = %ctx.character.name,
        generation = ?ctx.generation_type,
        history_len = ctx.history.len(),
        "starting prompt build"
    );

    if let Some(hooks) = hooks {
        hooks.run_before(ctx);
    }

    let pipeline = WorkerPipeline::new()
        .add_worker(Box::new(LoreWorker))
        .add_worker(Box::new(EntriesWorker))
        .add_worker(Box::new(InjectionsWorker))
        .add_worker(Box::new(CompileWorker))
        .add_worker(Box::new(MacroWorker))
        .add_worker(Box::new(AssembleWorker))
        .add_worker(Box::new(TrimWorker));
    pipeline.run(ctx)?;

    if let Some(hooks) = hooks {
        hooks.run_after(ctx);
    }

    tracing::debug!(
        blocks = ctx.blocks.len(),
        warnings = ctx.warnings.len(),
        "prompt build finished"
    );
    Ok(())
}
