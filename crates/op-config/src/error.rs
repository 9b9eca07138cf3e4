// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration errors (spec §6). Unlike most of the error taxonomy in
//! `op-core`, these never reach a client — they fail process startup.

use thiserror::Error;

/// Something in the environment could not be parsed into a valid [`crate::Config`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `OP_MODE` was set to something other than `fast-test`/`production`.
    #[error("invalid OP_MODE '{value}': expected 'fast-test' or 'production'")]
    InvalidMode {
        /// The raw value read from the environment.
        value: String,
    },
    /// A numeric setting (port, concurrency) failed to parse or was zero.
    #[error("invalid {field} '{value}': {reason}")]
    InvalidNumber {
        /// The field name, e.g. `OP_WORKER_CONCURRENCY`.
        field: &'static str,
        /// The raw value read from the environment.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}
