//! Build hooks.
//!
//! Hosts observe or adjust the in-flight build at two points: after input
//! validation but before any worker runs, and after the plan is trimmed.
//! Hooks execute inline on the calling thread, in registration order.

use crate::pipeline::BuildContext;

pub type Hook = Box<dyn Fn(&mut BuildContext<'_>) + Send + Sync>;

#[derive(Default)]
pub struct HookRegistry {
    before_build: Vec<Hook>,
    after_build: Vec<Hook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before_build(&mut self, hook: Hook) {
        self.before_build.push(hook);
    }

    pub fn on_after_build(&mut self, hook: Hook) {
        self.after_build.push(hook);
    }

    pub(crate) fn run_before(&self, ctx: &mut BuildContext<'_>) {
        for hook in &self.before_build {
            hook(ctx);
        }
    }

    pub(crate) fn run_after(&self, ctx: &mut BuildContext<'_>) {
        for hook in &self.after_build {
            hook(ctx);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before_build.is_empty() && self.after_build.is_empty()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("before_build", &self.before_build.len())
            .field("after_build", &self.after_build.len())
            .finish()
    }
}
