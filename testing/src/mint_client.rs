//! [`MintClient`] wrapper that loses requests or responses.

use std::sync::atomic::{AtomicUsize, Ordering};
use turnstile_core::checkout::MintClient;
use turnstile_core::minter::{MintError, MintRequest, MintResult};
use turnstile_core::types::IdempotencyKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    FailBefore,
    DropResponse,
}

/// Wraps a real client and fails the first `n` calls with
/// [`MintError::Unavailable`].
///
/// In "drop response" mode the inner mint runs and commits before the error
/// is returned, which is what a client timeout looks like from the device.
#[derive(Debug)]
pub struct FlakyMintClient<M> {
    inner: M,
    mode: Mode,
    remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl<M> FlakyMintClient<M> {
    /// Fail the first `n` calls without reaching the minter.
    pub const fn failing_before(inner: M, n: usize) -> Self {
        Self::with_mode(inner, Mode::FailBefore, n)
    }

    /// Let the first `n` calls mint, then report them as lost.
    pub const fn dropping_responses(inner: M, n: usize) -> Self {
        Self::with_mode(inner, Mode::DropResponse, n)
    }

    const fn with_mode(inner: M, mode: Mode, n: usize) -> Self {
        Self {
            inner,
            mode,
            remaining: AtomicUsize::new(n),
            calls: AtomicUsize::new(0),
        }
    }

    /// How many times `mint` was called
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<M: MintClient> MintClient for FlakyMintClient<M> {
    async fn mint(&self, key: &IdempotencyKey, request: &MintRequest) -> Result<MintResult, MintError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            Mode::FailBefore if self.take_failure() => {
                Err(MintError::Unavailable("connection reset".to_string()))
            }
            Mode::DropResponse => {
                let result = self.inner.mint(key, request).await;
                if self.take_failure() {
                    Err(MintError::Unavailable("response timed out".to_string()))
                } else {
                    result
                }
            }
            Mode::FailBefore => self.inner.mint(key, request).await,
        }
    }
}
