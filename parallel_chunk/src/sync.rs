//! Coordination shared by the fork-join phases.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};

/// Shared cancellation flag. Every worker checks it before touching its chunk.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
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

/// Marker returned by a worker that has handed its error to [`FailFast`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Aborted;

/// Per-phase failure bookkeeping.
///
/// The first error recorded wins; recording it also raises the phase's abort
/// flag so chunks that have not started yet are skipped. After the join,
/// [`FailFast::finish`] yields that first error instead of whatever the
/// parallel collect happened to stop on.
pub(crate) struct FailFast<'a> {
    cancel: &'a CancelToken,
    aborted: AtomicBool,
    first: OnceLock<Error>,
}

impl<'a> FailFast<'a> {
    pub(crate) fn new(cancel: &'a CancelToken) -> Self {
        Self {
            cancel,
            aborted: AtomicBool::new(false),
            first: OnceLock::new(),
        }
    }

    /// Called at worker start.
    pub(crate) fn check(&self) -> std::result::Result<(), Aborted> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(Aborted);
        }
        if self.cancel.is_cancelled() {
            return Err(self.record(Error::Cancelled));
        }
        Ok(())
    }

    pub(crate) fn record(&self, err: Error) -> Aborted {
        // Store before raising the flag: anyone who sees the flag also sees an error.
        let _ = self.first.set(err);
        self.aborted.store(true, Ordering::SeqCst);
        Aborted
    }

    pub(crate) fn run<T>(&self, f: impl FnOnce() -> Result<T>) -> std::result::Result<T, Aborted> {
        self.check()?;
        f().map_err(|e| self.record(e))
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn finish<T>(self, outcome: std::result::Result<T, Aborted>) -> Result<T> {
        match (outcome, self.first.into_inner()) {
            (Ok(value), None) => Ok(value),
            (_, Some(err)) => Err(err),
            (Err(Aborted), None) => Err(Error::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_first_error_wins() {
        let cancel = CancelToken::new();
        let guard = FailFast::new(&cancel);
        guard.record(Error::format("first"));
        guard.record(Error::format("second"));
        assert!(guard.check().is_err());
        match guard.finish::<()>(Err(Aborted)) {
            Err(Error::Format(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parallel_failure_reports_failing_item() {
        let cancel = CancelToken::new();
        let guard = FailFast::new(&cancel);
        let outcome: std::result::Result<Vec<usize>, Aborted> = (0..64usize)
            .into_par_iter()
            .map(|i| {
                guard.run(|| {
                    if i == 17 {
                        Err(Error::format("item 17"))
                    } else {
                        Ok(i)
                    }
                })
            })
            .collect();
        match guard.finish(outcome) {
            Err(Error::Format(msg)) => assert_eq!(msg, "item 17"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cancelled_token_stops_phase() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let guard = FailFast::new(&cancel);
        let outcome = guard.run(|| Ok(1));
        assert!(matches!(guard.finish(outcome), Err(Error::Cancelled)));
    }

    #[test]
    fn test_success_passes_through() {
        let cancel = CancelToken::new();
        let guard = FailFast::new(&cancel);
        let outcome = guard.run(|| Ok(5));
        assert_eq!(guard.finish(outcome).unwrap(), 5);
    }
}
