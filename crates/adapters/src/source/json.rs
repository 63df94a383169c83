// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reservation source backed by exported JSON files.

use super::{ReservationSource, SourceError};
use async_trait::async_trait;
use kw_core::SourceReservation;
use std::path::{Path, PathBuf};

/// Reads `<dir>/<source_ref>.json`, an array of reservation records.
#[derive(Clone, Debug)]
pub struct JsonFileSource {
    dir: PathBuf,
}

impl JsonFileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, source_ref: &str) -> PathBuf {
        self.dir.join(format!("{source_ref}.json"))
    }
}

#[async_trait]
impl ReservationSource for JsonFileSource {
    async fn fetch_reservations(
        &self,
        source_ref: &str,
    ) -> Result<Vec<SourceReservation>, SourceError> {
        // A reference must name a file directly inside the source directory
        if source_ref.is_empty() || source_ref.contains(['/', '\\']) || source_ref == ".." {
            return Err(SourceError::NotFound(source_ref.to_string()));
        }

        let path = self.path_for(source_ref);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(source_ref.to_string()));
            }
            Err(error) => {
                return Err(SourceError::Read {
                    source_ref: source_ref.to_string(),
                    error,
                })
            }
        };

        serde_json::from_slice(&bytes).map_err(|error| SourceError::Malformed {
            source_ref: source_ref.to_string(),
            error,
        })
    }
}

#[cfg(test)]
#[path = "json_tests.rs"]
mod tests;
