// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine runtime

use kw_adapters::{DeviceError, SourceError};
use kw_core::{AllocationError, DeviceId, GroupId, ReservationId, SlotKey};
use kw_storage::WalError;
use thiserror::Error;

/// Errors that can occur in the runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Capacity(#[from] AllocationError),
    #[error("reservation not found: {0}")]
    ReservationNotFound(ReservationId),
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),
    #[error("group not found: {0}")]
    GroupNotFound(GroupId),
    #[error("no assignment on {key} for {reservation}")]
    AssignmentNotFound {
        key: SlotKey,
        reservation: ReservationId,
    },
    #[error("no code derivable for reservation {0}")]
    MissingCode(ReservationId),
    #[error("device {device} does not serve group {group}")]
    NotServed { device: DeviceId, group: GroupId },
    #[error("slot {0} is not failed")]
    SlotNotFailed(SlotKey),
    #[error("invalid code: {0}")]
    InvalidCode(String),
    #[error("storage error: {0}")]
    Storage(#[from] WalError),
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    #[error("source error: {0}")]
    Source(#[from] SourceError),
}
