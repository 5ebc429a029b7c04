// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! arq-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for ArqonBus.

/// The uniform wire frame and its builders.
pub mod envelope;
/// Shared error codes surfaced in `response` envelopes.
pub mod error;
/// Message id generation and shape validation.
pub mod ids;
/// The SAM operator contract (task in, actions out).
pub mod operator;
/// Monotonic sequences and vector clocks.
pub mod time;
/// Structural and semantic envelope validation.
pub mod validate;

pub use envelope::{Envelope, EnvelopeBuilder, EnvelopeType, JsonMap, ResponseStatus, metadata_keys};
pub use error::ErrorCode;
pub use ids::{generate_message_id, is_valid_message_id};
pub use operator::{Action, ActionType, Operator, OperatorError, State, SynthesisOperator};
pub use time::{ClockOrdering, MonotonicSequenceGenerator, vector_clock_compare, vector_clock_merge};
pub use validate::EnvelopeValidator;

/// Protocol version embedded in every envelope unless a sender overrides it.
pub const ENVELOPE_VERSION: &str = "1.0";
