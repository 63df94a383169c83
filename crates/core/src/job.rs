// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduled job identity and payloads

use crate::id::{DeviceId, ReservationId};
use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Activate,
    Deactivate,
    Finalize,
    CalendarPoll,
    CredentialRotation,
    PropertyCheckIn,
    PropertyCheckOut,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Activate => "activate",
            JobKind::Deactivate => "deactivate",
            JobKind::Finalize => "finalize",
            JobKind::CalendarPoll => "calendar_poll",
            JobKind::CredentialRotation => "credential_rotation",
            JobKind::PropertyCheckIn => "property_check_in",
            JobKind::PropertyCheckOut => "property_check_out",
        }
    }
}

/// Composite job identity; scheduling the same key again replaces the job
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub kind: JobKind,
    pub device: Option<DeviceId>,
    pub slot: Option<u8>,
    pub reservation: Option<ReservationId>,
}

impl JobKey {
    fn of(kind: JobKind) -> Self {
        Self {
            kind,
            device: None,
            slot: None,
            reservation: None,
        }
    }

    pub fn activate(device: &DeviceId, slot: u8, reservation: &ReservationId) -> Self {
        Self {
            device: Some(device.clone()),
            slot: Some(slot),
            reservation: Some(reservation.clone()),
            ..Self::of(JobKind::Activate)
        }
    }

    pub fn deactivate(device: &DeviceId, slot: u8, reservation: &ReservationId) -> Self {
        Self {
            device: Some(device.clone()),
            slot: Some(slot),
            reservation: Some(reservation.clone()),
            ..Self::of(JobKind::Deactivate)
        }
    }

    pub fn for_reservation(kind: JobKind, reservation: &ReservationId) -> Self {
        Self {
            reservation: Some(reservation.clone()),
            ..Self::of(kind)
        }
    }

    pub fn calendar_poll() -> Self {
        Self::of(JobKind::CalendarPoll)
    }

    pub fn credential_rotation() -> Self {
        Self::of(JobKind::CredentialRotation)
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind.as_str())?;
        if let Some(device) = &self.device {
            write!(f, ":{device}")?;
        }
        if let Some(slot) = self.slot {
            write!(f, "#{slot}")?;
        }
        if let Some(reservation) = &self.reservation {
            write!(f, ":{reservation}")?;
        }
        Ok(())
    }
}

/// What a job does when it fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    Activate {
        device: DeviceId,
        slot: u8,
        reservation: ReservationId,
        code: String,
    },
    Deactivate {
        device: DeviceId,
        slot: u8,
        reservation: ReservationId,
    },
    Finalize {
        reservation: ReservationId,
    },
    CalendarPoll,
    CredentialRotation,
    PropertyCheckIn {
        reservation: ReservationId,
    },
    PropertyCheckOut {
        reservation: ReservationId,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Activate { .. } => JobKind::Activate,
            JobPayload::Deactivate { .. } => JobKind::Deactivate,
            JobPayload::Finalize { .. } => JobKind::Finalize,
            JobPayload::CalendarPoll => JobKind::CalendarPoll,
            JobPayload::CredentialRotation => JobKind::CredentialRotation,
            JobPayload::PropertyCheckIn { .. } => JobKind::PropertyCheckIn,
            JobPayload::PropertyCheckOut { .. } => JobKind::PropertyCheckOut,
        }
    }

    /// Key derived from the payload's identifying fields
    pub fn key(&self) -> JobKey {
        match self {
            JobPayload::Activate {
                device,
                slot,
                reservation,
                ..
            } => JobKey::activate(device, *slot, reservation),
            JobPayload::Deactivate {
                device,
                slot,
                reservation,
            } => JobKey::deactivate(device, *slot, reservation),
            JobPayload::Finalize { reservation }
            | JobPayload::PropertyCheckIn { reservation }
            | JobPayload::PropertyCheckOut { reservation } => {
                JobKey::for_reservation(self.kind(), reservation)
            }
            JobPayload::CalendarPoll => JobKey::calendar_poll(),
            JobPayload::CredentialRotation => JobKey::credential_rotation(),
        }
    }
}

/// A job ready to run or waiting for its time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub key: JobKey,
    pub run_at: NaiveDateTime,
    pub payload: JobPayload,
}

impl Job {
    pub fn new(payload: JobPayload, run_at: NaiveDateTime) -> Self {
        Self {
            key: payload.key(),
            run_at,
            payload,
        }
    }
}

/// How a recurring job re-arms after firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    Every(Duration),
    Weekly { weekday: Weekday, at: NaiveTime },
}

impl Recurrence {
    /// First occurrence strictly after `after`
    pub fn next_after(&self, after: NaiveDateTime) -> NaiveDateTime {
        match *self {
            Recurrence::Every(interval) => after + interval,
            Recurrence::Weekly { weekday, at } => {
                let ahead = (7 + weekday.num_days_from_monday()
                    - after.weekday().num_days_from_monday())
                    % 7;
                let candidate = (after.date() + Duration::days(i64::from(ahead))).and_time(at);
                if candidate > after {
                    candidate
                } else {
                    candidate + Duration::days(7)
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
