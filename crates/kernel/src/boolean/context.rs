use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::Tolerance;

use super::diagnostics::{BooleanFailure, Phase, Warning};
use super::options::BooleanOptions;

/// Cooperative cancellation flag, cheap to clone and share across threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// State shared by the phases of one Boolean call.
pub struct OperationContext {
    pub options: BooleanOptions,
    pub tolerance: Tolerance,
    /// Resolved fuzzy value added to every coincidence test.
    pub fuzzy: f64,
    cancel: CancelToken,
    warnings: Mutex<Vec<Warning>>,
}

impl OperationContext {
    pub fn new(options: &BooleanOptions, fuzzy: f64) -> Self {
        Self {
            cancel: options.cancel.clone().unwrap_or_default(),
            options: options.clone(),
            tolerance: crate::default_tolerance(),
            fuzzy,
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails with `Cancelled` once the token has been set.
    pub fn checkpoint(&self, phase: Phase) -> Result<(), BooleanFailure> {
        if self.is_cancelled() {
            return Err(BooleanFailure::Cancelled { phase });
        }
        Ok(())
    }

    pub fn warn(&self, warning: Warning) {
        self.warnings.lock().push(warning);
    }

    pub fn take_warnings(&self) -> Vec<Warning> {
        std::mem::take(&mut *self.warnings.lock())
    }

    /// Maps `items` on the rayon pool, or in order when the call is sequential.
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        if self.options.parallel {
            items.par_iter().map(f).collect()
        } else {
            items.iter().map(f).collect()
        }
    }
}
