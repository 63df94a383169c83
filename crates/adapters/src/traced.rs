// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced adapter wrappers for consistent observability

use crate::device::{DeviceAdapter, DeviceError};
use crate::source::{ReservationSource, SourceError};
use async_trait::async_trait;
use kw_core::{DeviceId, SourceReservation, SLOT_COUNT};
use tracing::Instrument;

/// Codes are 4 to 8 decimal digits
fn validate_code(code: &str) -> Result<(), String> {
    if !(4..=8).contains(&code.len()) || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("invalid code: expected 4-8 digits, got {} chars", code.len()));
    }
    Ok(())
}

fn validate_slot(slot: u8) -> Result<(), String> {
    if slot == 0 || slot > SLOT_COUNT {
        return Err(format!("slot {slot} out of range 1..={SLOT_COUNT}"));
    }
    Ok(())
}

/// Wrapper that adds tracing to any DeviceAdapter
#[derive(Clone)]
pub struct TracedDeviceAdapter<D> {
    inner: D,
}

impl<D> TracedDeviceAdapter<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<D: DeviceAdapter> DeviceAdapter for TracedDeviceAdapter<D> {
    async fn write_code(&self, device: &DeviceId, slot: u8, code: &str) -> Result<(), DeviceError> {
        let span = tracing::info_span!("device.write_code", %device, slot);
        async {
            tracing::info!(code_len = code.len(), "starting");

            // Precondition: slot in range and a well-formed code
            if let Err(reason) = validate_slot(slot).and_then(|_| validate_code(code)) {
                tracing::error!(%reason, "precondition failed");
                return Err(DeviceError::Rejected {
                    device: device.clone(),
                    reason,
                });
            }

            let start = std::time::Instant::now();
            let result = self.inner.write_code(device, slot, code).await;
            let elapsed = start.elapsed();

            match &result {
                Ok(()) => tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "code written"),
                Err(e) => tracing::error!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "write failed"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn clear_code(&self, device: &DeviceId, slot: u8) -> Result<(), DeviceError> {
        let span = tracing::info_span!("device.clear_code", %device, slot);
        async {
            if let Err(reason) = validate_slot(slot) {
                tracing::error!(%reason, "precondition failed");
                return Err(DeviceError::Rejected {
                    device: device.clone(),
                    reason,
                });
            }

            let start = std::time::Instant::now();
            let result = self.inner.clear_code(device, slot).await;
            let elapsed = start.elapsed();

            match &result {
                Ok(()) => tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "code cleared"),
                Err(e) => tracing::error!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "clear failed"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn ping(&self, device: &DeviceId) -> bool {
        let alive = self.inner.ping(device).await;
        tracing::debug!(%device, alive, "pinged");
        alive
    }

    async fn set_auto_relock(&self, device: &DeviceId, enabled: bool) -> Result<(), DeviceError> {
        let span = tracing::info_span!("device.auto_relock", %device, enabled);
        async {
            let result = self.inner.set_auto_relock(device, enabled).await;
            match &result {
                Ok(()) => tracing::info!("auto relock set"),
                Err(e) => tracing::error!(error = %e, "auto relock failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn lock(&self, device: &DeviceId) -> Result<(), DeviceError> {
        let span = tracing::info_span!("device.lock", %device);
        async {
            let result = self.inner.lock(device).await;
            match &result {
                Ok(()) => tracing::info!("locked"),
                Err(e) => tracing::error!(error = %e, "lock failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn unlock(&self, device: &DeviceId) -> Result<(), DeviceError> {
        let span = tracing::info_span!("device.unlock", %device);
        async {
            let result = self.inner.unlock(device).await;
            match &result {
                Ok(()) => tracing::info!("unlocked"),
                Err(e) => tracing::error!(error = %e, "unlock failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

/// Wrapper that adds tracing to any ReservationSource
#[derive(Clone)]
pub struct TracedReservationSource<S> {
    inner: S,
}

impl<S> TracedReservationSource<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: ReservationSource> ReservationSource for TracedReservationSource<S> {
    async fn fetch_reservations(
        &self,
        source_ref: &str,
    ) -> Result<Vec<SourceReservation>, SourceError> {
        let span = tracing::info_span!("source.fetch", source_ref);
        async {
            let start = std::time::Instant::now();
            let result = self.inner.fetch_reservations(source_ref).await;
            let elapsed = start.elapsed();

            match &result {
                Ok(records) => tracing::info!(
                    count = records.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "fetched"
                ),
                Err(e) => tracing::warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "fetch failed"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
