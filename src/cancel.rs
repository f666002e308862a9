use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::HsneError;

/// Cooperative cancellation flag shared between a caller and a running build.
///
/// Clones observe the same flag. Long phases poll it between work units.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every build holding a clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// `Err(HsneError::Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> Result<(), HsneError> {
        if self.is_cancelled() {
            Err(HsneError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Poll an optional token.
#[inline]
pub(crate) fn check(token: Option<&CancellationToken>) -> Result<(), HsneError> {
    match token {
        Some(token) => token.check(),
        None => Ok(()),
    }
}
