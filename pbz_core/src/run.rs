use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::error::{PipelineError, Result, Stage};

/// Cooperative cancellation shared by every thread of one run.
///
/// Checked at the top of each stage iteration and inside every buffer wait.
/// Setting it never interrupts a read, codec call, or write already in flight.
#[derive(Debug, Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call state shared across the read, transform, and write threads.
///
/// Holds the block count the stages run towards, the cancellation flag, and a
/// first-writer-wins error latch.
#[derive(Debug)]
pub struct RunState {
    total_blocks: u64,
    cancel: CancelFlag,
    error: Mutex<Option<PipelineError>>,
}

impl RunState {
    pub fn new(total_blocks: u64) -> Self {
        Self {
            total_blocks,
            cancel: CancelFlag::default(),
            error: Mutex::new(None),
        }
    }

    #[inline]
    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    #[inline]
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Latch `err` if no error has been recorded yet, then cancel the run.
    ///
    /// Returns `true` when this call's error is the one that will be reported.
    pub fn fail(&self, stage: Stage, err: PipelineError) -> bool {
        let mut slot = self.error.lock();
        self.cancel.cancel();
        if slot.is_some() {
            warn!(%stage, error = %err, "discarding error raised after the run was cancelled");
            return false;
        }
        error!(%stage, error = %err, "pipeline stage failed");
        *slot = Some(err);
        true
    }

    /// Consume the run, yielding the latched error if any stage failed.
    pub fn into_result(self) -> Result<()> {
        match self.error.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    #[test]
    fn first_error_wins() {
        let run = RunState::new(4);
        assert!(!run.is_cancelled());

        assert!(run.fail(Stage::Read, ProtocolError::TrailingData.into()));
        assert!(!run.fail(
            Stage::Transform,
            PipelineError::codec(1, anyhow::anyhow!("late"))
        ));
        assert!(run.is_cancelled());

        let err = run.into_result().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Protocol(ProtocolError::TrailingData)
        ));
    }

    #[test]
    fn clean_run_is_ok() {
        let run = RunState::new(0);
        assert!(!run.is_cancelled());
        assert!(run.into_result().is_ok());
    }
}
