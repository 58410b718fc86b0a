use std::sync::{Mutex, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::error::Result;

type Attempt = Shared<BoxFuture<'static, Result<()>>>;

/// Makes an async operation idempotent.
///
/// Concurrent callers await the same in-flight attempt. A successful
/// outcome is returned to every later caller; a failed one is replaced by a
/// fresh attempt on the next call.
#[derive(Default)]
pub(crate) struct SharedAttempt {
    current: Mutex<Option<Attempt>>,
}

impl SharedAttempt {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Join the current attempt, or start one with `start`.
    pub(crate) async fn run<F>(&self, start: F) -> Result<()>
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>>,
    {
        let attempt = {
            let mut slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(attempt) if !matches!(attempt.peek(), Some(Err(_))) => attempt.clone(),
                _ => {
                    let attempt = start().shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    /// True once an attempt has completed successfully.
    pub(crate) fn succeeded(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|attempt| matches!(attempt.peek(), Some(Ok(()))))
    }
}
