// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error codes surfaced in failed `response` envelopes.

use std::fmt;

/// Machine-readable error code carried in `Envelope::error_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed frame, failed validation, or bad command arguments.
    Validation,
    /// The sender lacks the required capability or role.
    Authorization,
    /// The targeted feature lane is disabled by configuration.
    FeatureDisabled,
    /// A JSON frame arrived on a protobuf-only infra path.
    InfraProtocol,
}

impl ErrorCode {
    /// Wire form of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Authorization => "AUTHORIZATION_ERROR",
            Self::FeatureDisabled => "FEATURE_DISABLED",
            Self::InfraProtocol => "INFRA_PROTOCOL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
