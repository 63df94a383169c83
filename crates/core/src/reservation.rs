// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reservations and guest code derivation

use crate::id::{GroupId, ReservationId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Derive a guest code from a phone number: its last four digits
pub fn code_from_phone(phone: &str) -> Option<String> {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return None;
    }
    Some(digits[digits.len() - 4..].iter().collect())
}

/// A booking as reported by a reservation source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReservation {
    pub id: ReservationId,
    pub guest_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    #[serde(default)]
    pub is_blocked: bool,
}

/// A stored reservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub group: GroupId,
    pub guest_name: String,
    pub phone: Option<String>,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    /// Owner or maintenance block rather than a guest stay
    #[serde(default)]
    pub is_blocked: bool,
    /// Credential administratively disabled
    #[serde(default)]
    pub disabled: bool,
    /// Code fixed at finalization; later contact changes no longer apply
    #[serde(default)]
    pub locked_code: Option<String>,
}

impl Reservation {
    pub fn new(
        id: impl Into<ReservationId>,
        group: impl Into<GroupId>,
        guest_name: impl Into<String>,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Self {
        Self {
            id: id.into(),
            group: group.into(),
            guest_name: guest_name.into(),
            phone: None,
            check_in,
            check_out,
            is_blocked: false,
            disabled: false,
            locked_code: None,
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn blocked(mut self) -> Self {
        self.is_blocked = true;
        self
    }

    /// Build a stored reservation from a source record
    pub fn from_source(group: GroupId, record: SourceReservation) -> Self {
        Self {
            id: record.id,
            group,
            guest_name: record.guest_name,
            phone: record.phone,
            check_in: record.check_in,
            check_out: record.check_out,
            is_blocked: record.is_blocked,
            disabled: false,
            locked_code: None,
        }
    }

    /// Whether codes should be issued for this reservation at all
    pub fn is_schedulable(&self) -> bool {
        !self.is_blocked && !self.disabled
    }

    /// The code to issue: the locked code, else one derived from the phone
    pub fn code(&self) -> Option<String> {
        self.locked_code
            .clone()
            .or_else(|| self.phone.as_deref().and_then(code_from_phone))
    }

    pub fn has_same_stay(&self, other: &SourceReservation) -> bool {
        self.check_in == other.check_in && self.check_out == other.check_out
    }
}

#[cfg(test)]
#[path = "reservation_tests.rs"]
mod tests;
