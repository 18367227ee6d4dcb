//! Deterministic [`CodeSource`] for collision tests.

use chrono::{DateTime, Utc};
use turnstile_core::code::{CodeSource, RANDOM_BYTES, RedemptionCode};

/// Emits the same redemption code on every call.
///
/// Two tickets minted through this source always collide, which is the only
/// way to exercise the collision path without 2^160 attempts.
#[derive(Debug, Clone)]
pub struct RepeatingCodeSource {
    code: RedemptionCode,
}

impl RepeatingCodeSource {
    /// Repeat a code built from `seed`.
    #[must_use]
    pub fn new(seed: u8) -> Self {
        Self {
            code: RedemptionCode::from_parts(0, [seed; RANDOM_BYTES]),
        }
    }

    /// The repeated code
    #[must_use]
    pub const fn code(&self) -> &RedemptionCode {
        &self.code
    }
}

impl CodeSource for RepeatingCodeSource {
    fn next_code(&self, _now: DateTime<Utc>) -> RedemptionCode {
        self.code.clone()
    }
}
