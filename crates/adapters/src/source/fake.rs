// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake reservation source for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{ReservationSource, SourceError};
use async_trait::async_trait;
use kw_core::SourceReservation;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct FakeSourceState {
    records: HashMap<String, Vec<SourceReservation>>,
    unavailable: HashSet<String>,
    fetches: Vec<String>,
}

/// In-memory reservation source for testing
#[derive(Clone, Default)]
pub struct FakeReservationSource {
    inner: Arc<Mutex<FakeSourceState>>,
}

impl FakeReservationSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeSourceState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the records listed for a source reference
    pub fn set(&self, source_ref: &str, records: Vec<SourceReservation>) {
        self.state().records.insert(source_ref.to_string(), records);
    }

    pub fn set_unavailable(&self, source_ref: &str, unavailable: bool) {
        let mut state = self.state();
        if unavailable {
            state.unavailable.insert(source_ref.to_string());
        } else {
            state.unavailable.remove(source_ref);
        }
    }

    /// Source references fetched so far, in order
    pub fn fetches(&self) -> Vec<String> {
        self.state().fetches.clone()
    }
}

#[async_trait]
impl ReservationSource for FakeReservationSource {
    async fn fetch_reservations(
        &self,
        source_ref: &str,
    ) -> Result<Vec<SourceReservation>, SourceError> {
        let mut state = self.state();
        state.fetches.push(source_ref.to_string());
        if state.unavailable.contains(source_ref) {
            return Err(SourceError::Unavailable(source_ref.to_string()));
        }
        Ok(state.records.get(source_ref).cloned().unwrap_or_default())
    }
}
