//! Progress reporting and cooperative cancellation for long computations.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Result, ViewshedError};

/// Progress callback: `(completed, total, message)`.
pub type ProgressCallback = dyn Fn(usize, usize, &str) + Send + Sync;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Optional hooks passed into viewshed and optimizer runs.
///
/// ```
/// use viewshed::{CancellationToken, RunControl};
///
/// let token = CancellationToken::new();
/// let report = |done: usize, total: usize, msg: &str| println!("{done}/{total} {msg}");
/// let control = RunControl::new().with_progress(&report).with_cancel(&token);
/// assert!(control.check().is_ok());
/// ```
#[derive(Clone, Copy, Default)]
pub struct RunControl<'a> {
    progress: Option<&'a (dyn Fn(usize, usize, &str) + Send + Sync + 'a)>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> RunControl<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(
        mut self,
        progress: &'a (dyn Fn(usize, usize, &str) + Send + Sync + 'a),
    ) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn report(&self, completed: usize, total: usize, message: &str) {
        if let Some(progress) = self.progress {
            progress(completed, total, message);
        }
    }

    /// `Err(Cancelled)` once the token has been cancelled.
    pub fn check(&self) -> Result<()> {
        match self.cancel {
            Some(token) if token.is_cancelled() => Err(ViewshedError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Counter for one phase of `total` steps, safe to tick from worker threads.
    pub(crate) fn phase(&self, total: usize, message: &'a str) -> Phase<'a> {
        Phase {
            control: *self,
            done: AtomicUsize::new(0),
            total,
            message,
        }
    }
}

pub(crate) struct Phase<'a> {
    control: RunControl<'a>,
    done: AtomicUsize,
    total: usize,
    message: &'a str,
}

impl Phase<'_> {
    /// Fails fast if cancelled, otherwise counts one step done.
    pub(crate) fn step(&self) -> Result<()> {
        self.control.check()?;
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        self.control.report(done, self.total, self.message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_token_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_check_after_cancel() {
        let token = CancellationToken::new();
        let control = RunControl::new().with_cancel(&token);
        assert!(control.check().is_ok());
        token.cancel();
        assert!(matches!(control.check(), Err(ViewshedError::Cancelled)));
        assert!(RunControl::new().check().is_ok());
    }

    #[test]
    fn test_phase_reports_progress() {
        let seen = Mutex::new(Vec::new());
        let report = |done: usize, total: usize, msg: &str| {
            seen.lock().unwrap().push((done, total, msg.to_string()));
        };
        let control = RunControl::new().with_progress(&report);

        let phase = control.phase(2, "scan");
        phase.step().unwrap();
        phase.step().unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen, vec![(1, 2, "scan".to_string()), (2, 2, "scan".to_string())]);
    }
}
