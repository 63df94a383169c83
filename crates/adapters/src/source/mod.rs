// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reservation source adapters

mod json;

pub use json::JsonFileSource;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeReservationSource;

use async_trait::async_trait;
use kw_core::SourceReservation;
use thiserror::Error;

/// Errors from fetching reservations
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source not found: {0}")]
    NotFound(String),
    #[error("failed to read source {source_ref}: {error}")]
    Read {
        source_ref: String,
        #[source]
        error: std::io::Error,
    },
    #[error("malformed source {source_ref}: {error}")]
    Malformed {
        source_ref: String,
        #[source]
        error: serde_json::Error,
    },
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Adapter for the external booking calendar
#[async_trait]
pub trait ReservationSource: Clone + Send + Sync + 'static {
    /// Fetch every reservation the source currently lists for a group
    async fn fetch_reservations(
        &self,
        source_ref: &str,
    ) -> Result<Vec<SourceReservation>, SourceError>;
}
