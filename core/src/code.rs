//! Redemption codes: the QR payload printed on every ticket.
//!
//! A code is 28 bytes encoded base64url without padding (38 characters):
//!
//! ```text
//! | 8 bytes big-endian issue time (µs) | 20 bytes from the OS CSPRNG |
//! ```
//!
//! The timestamp spreads codes across time so two minters sharing a faulty RNG
//! still diverge. Uniqueness rests on the random suffix alone
//! ([`ENTROPY_BITS`] bits). Codes carry no sequential counter and nothing
//! derivable from the ticket id.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes of big-endian microsecond timestamp at the front of a code
pub const TIMESTAMP_BYTES: usize = 8;

/// Bytes of CSPRNG output following the timestamp
pub const RANDOM_BYTES: usize = 20;

/// Effective entropy of a redemption code
pub const ENTROPY_BITS: usize = RANDOM_BYTES * 8;

/// Encoded length of a redemption code
pub const CODE_LEN: usize = 38;

const RAW_LEN: usize = TIMESTAMP_BYTES + RANDOM_BYTES;

const _: () = assert!(ENTROPY_BITS >= 128);
const _: () = assert!(CODE_LEN == (RAW_LEN * 8).div_ceil(6));

/// Characters of a code shown in logs and scan summaries
pub const LOG_PREFIX_LEN: usize = 6;

/// A well-formed redemption code.
///
/// Construction goes through [`RedemptionCode::generate`],
/// [`RedemptionCode::from_parts`] or [`RedemptionCode::parse`], so every value
/// of this type has the canonical length and alphabet.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RedemptionCode(String);

/// A presented string that cannot be a redemption code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed redemption code")]
pub struct MalformedCode;

impl RedemptionCode {
    /// Generate a fresh code stamped with `now`, drawing from the OS CSPRNG.
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        let mut random = [0u8; RANDOM_BYTES];
        OsRng.fill_bytes(&mut random);
        Self::from_parts(timestamp_micros(now), random)
    }

    /// Assemble a code from its timestamp and random components.
    #[must_use]
    pub fn from_parts(timestamp_micros: u64, random: [u8; RANDOM_BYTES]) -> Self {
        let mut raw = [0u8; RAW_LEN];
        raw[..TIMESTAMP_BYTES].copy_from_slice(&timestamp_micros.to_be_bytes());
        raw[TIMESTAMP_BYTES..].copy_from_slice(&random);
        Self(URL_SAFE_NO_PAD.encode(raw))
    }

    /// Parse a presented code.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedCode`] if the input has the wrong length, leaves the
    /// base64url alphabet, or is not the canonical encoding of 28 bytes.
    pub fn parse(presented: &str) -> Result<Self, MalformedCode> {
        if presented.len() != CODE_LEN {
            return Err(MalformedCode);
        }
        match URL_SAFE_NO_PAD.decode(presented) {
            Ok(raw) if raw.len() == RAW_LEN => Ok(Self(presented.to_string())),
            _ => Err(MalformedCode),
        }
    }

    /// Issue time embedded in the code, in microseconds since the epoch.
    #[must_use]
    pub fn timestamp_micros(&self) -> u64 {
        let mut ts = [0u8; TIMESTAMP_BYTES];
        if let Ok(raw) = URL_SAFE_NO_PAD.decode(&self.0) {
            ts.copy_from_slice(&raw[..TIMESTAMP_BYTES]);
        }
        u64::from_be_bytes(ts)
    }

    /// The encoded code
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix safe to write to logs.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.0[..LOG_PREFIX_LEN]
    }
}

/// Log-safe prefix of an arbitrary presented string.
#[must_use]
pub fn presented_prefix(presented: &str) -> &str {
    let end = presented
        .char_indices()
        .nth(LOG_PREFIX_LEN)
        .map_or(presented.len(), |(i, _)| i);
    &presented[..end]
}

fn timestamp_micros(now: DateTime<Utc>) -> u64 {
    u64::try_from(now.timestamp_micros()).unwrap_or(0)
}

impl TryFrom<String> for RedemptionCode {
    type Error = MalformedCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RedemptionCode> for String {
    fn from(code: RedemptionCode) -> Self {
        code.0
    }
}

impl fmt::Display for RedemptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RedemptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RedemptionCode({}…)", self.prefix())
    }
}

/// Source of fresh redemption codes for the minter.
pub trait CodeSource: Send + Sync {
    /// Produce a new code stamped with `now`.
    fn next_code(&self, now: DateTime<Utc>) -> RedemptionCode;
}

/// Production code source backed by the OS CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRngCodeSource;

impl CodeSource for OsRngCodeSource {
    fn next_code(&self, now: DateTime<Utc>) -> RedemptionCode {
        RedemptionCode::generate(now)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn generated_codes_have_canonical_shape() {
        let code = RedemptionCode::generate(Utc::now());
        assert_eq!(code.as_str().len(), CODE_LEN);
        assert!(
            code.as_str()
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        );
        assert_eq!(RedemptionCode::parse(code.as_str()).unwrap(), code);
    }

    #[test]
    fn codes_do_not_repeat() {
        let now = Utc::now();
        let codes: HashSet<_> = (0..10_000).map(|_| RedemptionCode::generate(now)).collect();
        assert_eq!(codes.len(), 10_000);
    }

    #[test]
    fn timestamp_is_embedded() {
        let now = Utc::now();
        let code = RedemptionCode::generate(now);
        assert_eq!(code.timestamp_micros(), u64::try_from(now.timestamp_micros()).unwrap());
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert_eq!(RedemptionCode::parse(""), Err(MalformedCode));
        assert_eq!(RedemptionCode::parse("not-a-code"), Err(MalformedCode));
        assert_eq!(RedemptionCode::parse(&"!".repeat(CODE_LEN)), Err(MalformedCode));
        assert_eq!(RedemptionCode::parse(&"+".repeat(CODE_LEN)), Err(MalformedCode));
    }

    #[test]
    fn debug_output_hides_the_code() {
        let code = RedemptionCode::generate(Utc::now());
        let debug = format!("{code:?}");
        assert!(!debug.contains(code.as_str()));
        assert!(debug.contains(code.prefix()));
    }

    #[test]
    fn presented_prefix_handles_short_and_multibyte_input() {
        assert_eq!(presented_prefix("abc"), "abc");
        assert_eq!(presented_prefix("ééééééééé"), "éééééé");
    }

    proptest! {
        #[test]
        fn assembled_codes_parse(ts in any::<u64>(), random in prop::array::uniform20(any::<u8>())) {
            let code = RedemptionCode::from_parts(ts, random);
            prop_assert_eq!(code.as_str().len(), CODE_LEN);
            prop_assert_eq!(code.timestamp_micros(), ts);
            prop_assert!(RedemptionCode::parse(code.as_str()).is_ok());
        }

        #[test]
        fn wrong_length_never_parses(s in "[A-Za-z0-9_-]{0,80}") {
            prop_assume!(s.len() != CODE_LEN);
            prop_assert!(RedemptionCode::parse(&s).is_err());
        }
    }
}
