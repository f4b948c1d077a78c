// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for infraprint.

use thiserror::Error;

/// Top-level error type for all infraprint operations.
///
/// Protocol-level failures never surface here: operation handlers always
/// answer with a status code.  These variants cover transport, spool and
/// lifecycle failures only.
#[derive(Debug, Error)]
pub enum InfraError {
    // -- Setup --
    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Wire / transport --
    #[error("malformed IPP message: {0}")]
    Protocol(String),

    #[error("HTTP framing error: {0}")]
    Http(String),

    #[error("request body exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },

    #[error("print server error: {0}")]
    PrintServer(String),

    // -- Documents --
    #[error("document fetch failed: {0}")]
    DocumentFetch(String),

    // -- Storage --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, InfraError>;
