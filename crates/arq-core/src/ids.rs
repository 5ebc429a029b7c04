// SPDX-License-Identifier: MIT OR Apache-2.0
//! Message id generation and shape validation.
//!
//! Two shapes are canonical:
//!
//! - `arq_<ns_ts>_<counter>_<hex6>` — nanosecond timestamp, process-local
//!   positive counter, six hex digits of per-process entropy. Monotonic
//!   within a process; the suffix disambiguates across processes.
//! - `arq_<ulid>` — 26 Crockford-base32 characters, for peers that mint
//!   ULIDs instead.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn canonical_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^arq_[0-9]+_[1-9][0-9]*_[0-9a-f]{6}$").unwrap_or_else(|_| unreachable!())
    })
}

fn ulid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^arq_[0-9A-HJKMNP-TV-Z]{26}$").unwrap_or_else(|_| unreachable!())
    })
}

/// Mint a new canonical message id.
///
/// Ids are strictly increasing within a process: the nanosecond timestamp
/// is non-decreasing and the counter always increases.
///
/// # Examples
///
/// ```
/// let id = arq_core::generate_message_id();
/// assert!(arq_core::is_valid_message_id(&id));
/// ```
#[must_use]
pub fn generate_message_id() -> String {
    let ns = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX).max(0);
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    let entropy = Uuid::new_v4().into_bytes();
    format!(
        "arq_{ns}_{counter}_{:02x}{:02x}{:02x}",
        entropy[0], entropy[1], entropy[2]
    )
}

/// Whether `id` matches one of the canonical shapes.
///
/// # Examples
///
/// ```
/// assert!(arq_core::is_valid_message_id("arq_1700000000000000000_7_c0ffee"));
/// assert!(arq_core::is_valid_message_id("arq_01HZZZZZZZZZZZZZZZZZZZZZZZ"));
/// assert!(!arq_core::is_valid_message_id("arq_invalid"));
/// ```
#[must_use]
pub fn is_valid_message_id(id: &str) -> bool {
    canonical_re().is_match(id) || ulid_re().is_match(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_canonical_format() {
        assert!(is_valid_message_id("arq_1700000000000000000_7_c0ffee"));
    }

    #[test]
    fn accepts_ulid_compat_format() {
        assert!(is_valid_message_id("arq_01HZZZZZZZZZZZZZZZZZZZZZZZ"));
        assert!(is_valid_message_id("arq_11111111111111111111111111"));
    }

    #[test]
    fn rejects_invalid_formats() {
        assert!(!is_valid_message_id("arq_invalid"));
        assert!(!is_valid_message_id("arq_1700000000000000000_notint_c0ffee"));
        assert!(!is_valid_message_id("arq_1700000000000000000_0_c0ffee"));
        assert!(!is_valid_message_id("msg-1"));
        // I, L, O, U are outside the Crockford alphabet.
        assert!(!is_valid_message_id("arq_01ILOUZZZZZZZZZZZZZZZZZZZZ"));
    }

    #[test]
    fn generated_ids_are_unique_and_increasing() {
        let a = generate_message_id();
        let b = generate_message_id();
        assert_ne!(a, b);

        let counter = |id: &str| -> u64 {
            id.split('_').nth(2).and_then(|c| c.parse().ok()).unwrap()
        };
        assert!(counter(&b) > counter(&a));
    }
}
