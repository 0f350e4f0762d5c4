// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for hangar-server.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Core persistence operation failed.
    #[error("Core error: {0}")]
    Core(#[from] hangar_core::error::CoreError),

    /// A compute backend call failed.
    #[error("Backend error: {0}")]
    Backend(#[from] crate::backends::BackendError),

    /// A referenced record is missing.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of record.
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Result type using the server Error.
pub type Result<T> = std::result::Result<T, Error>;
