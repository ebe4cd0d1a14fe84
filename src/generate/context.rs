use regex::Regex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub const START_PROGRESS: u8 = 0;
pub const VALIDATED_PROGRESS: u8 = 33;
pub const GENERATED_PROGRESS: u8 = 67;
pub const COMPILED_PROGRESS: u8 = 100;

/// Reports build progress at the fixed checkpoints 0/33/67/100.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, message: &str, percent: u8);
}

/// Discards all progress. Used by tests and non-interactive callers.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _message: &str, _percent: u8) {}
}

/// Cooperative cancellation signal, checked at every pipeline transition.
/// Cheap to clone; all clones observe the same flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// How deep one build goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Always proceed to full compilation when it is enabled.
    MustComplete,
    /// Stop after the target's fast syntax-only check of the generated code.
    /// Used for interactive, low-latency feedback.
    FastFeedback,
}

/// Everything one build invocation needs beyond the program itself. Passed
/// through every stage rather than held as ambient state, so concurrent
/// builds cannot interfere through it.
pub struct BuildContext<'a> {
    pub reporter: &'a dyn ProgressReporter,
    pub cancel: CancelToken,
    pub mode: BuildMode,
    /// Stop after emitting sources; skip the toolchain entirely.
    pub generate_only: bool,
    /// Restrict generation/compilation to federates matching this pattern.
    pub filter: Option<Regex>,
    /// Toolchain parallelism degree; defaults to the available CPU count.
    pub jobs: Option<usize>,
}

impl<'a> BuildContext<'a> {
    pub fn new(reporter: &'a dyn ProgressReporter, cancel: CancelToken) -> Self {
        Self {
            reporter,
            cancel,
            mode: BuildMode::MustComplete,
            generate_only: false,
            filter: None,
            jobs: None,
        }
    }

    pub fn matches_filter(&self, name: &str) -> bool {
        match &self.filter {
            Some(re) => re.is_match(name),
            None => true,
        }
    }

    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or_else(num_cpus::get).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_is_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn filter_defaults_to_match_all() {
        let ctx = BuildContext::new(&NoopReporter, CancelToken::new());
        assert!(ctx.matches_filter("anything"));

        let mut ctx = BuildContext::new(&NoopReporter, CancelToken::new());
        ctx.filter = Some(Regex::new("^sender").unwrap());
        assert!(ctx.matches_filter("sender_1"));
        assert!(!ctx.matches_filter("receiver"));
    }
}
