//! Scoped suspension of gradient tracking.
//!
//! Evaluation runs the model on its inner (non-autodiff) module, so no graph is
//! recorded there. The guard additionally publishes the suspension through a
//! thread-local flag that models and the training loop can consult.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Whether gradient tracking is enabled on the current thread
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(Cell::get)
}

/// Disables gradient tracking until the returned guard is dropped
#[must_use = "gradient tracking is restored as soon as the guard is dropped"]
pub fn no_grad() -> NoGradGuard {
    NoGradGuard::new()
}

/// RAII guard restoring the previous gradient mode on drop (including unwinds).
///
/// Guards nest: dropping an inner guard restores the state the outer one set.
#[derive(Debug)]
pub struct NoGradGuard {
    previous: bool,
    // Thread-local state, so the guard must stay on its thread.
    _not_send: PhantomData<*const ()>,
}

impl NoGradGuard {
    pub fn new() -> Self {
        let previous = GRAD_ENABLED.with(|flag| flag.replace(false));
        Self {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Default for NoGradGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        GRAD_ENABLED.with(|flag| flag.set(self.previous));
    }
}
