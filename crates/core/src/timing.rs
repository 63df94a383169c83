// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Code time calculation
//!
//! Turns stay dates into a credential window for one device. Every
//! category has fixed times of day on the check-in and check-out dates;
//! the device stagger shifts both so that a fleet does not receive all of
//! its commands in the same minute. Overrides replace a side outright and
//! are never staggered.

use crate::assignment::{TimeOverride, Window};
use crate::catalog::{Device, DeviceCategory};
use crate::reservation::Reservation;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

/// Default times of day for a category, in minutes after midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultTiming {
    pub activate_minutes: i64,
    pub deactivate_minutes: i64,
}

const fn hm(hour: i64, minute: i64) -> i64 {
    hour * 60 + minute
}

pub fn default_timing(category: DeviceCategory) -> DefaultTiming {
    let (activate, deactivate) = match category {
        DeviceCategory::Room => (hm(12, 0), hm(11, 0)),
        DeviceCategory::Bathroom => (hm(15, 0), hm(11, 0)),
        DeviceCategory::SharedArea => (hm(15, 0), hm(11, 0)),
        DeviceCategory::Entry => (hm(11, 0), hm(14, 0)),
        DeviceCategory::Storage => (hm(1, 0), hm(23, 59)),
        DeviceCategory::Service => (hm(0, 0), hm(0, 0)),
    };
    DefaultTiming {
        activate_minutes: activate,
        deactivate_minutes: deactivate,
    }
}

fn at_minutes(date: NaiveDate, minutes: i64) -> NaiveDateTime {
    date.and_time(NaiveTime::default()) + Duration::minutes(minutes)
}

/// Compute the window for one device and one stay
pub fn calculate(
    category: DeviceCategory,
    check_in: NaiveDate,
    check_out: NaiveDate,
    stagger_minutes: i64,
    override_activate: Option<NaiveDateTime>,
    override_deactivate: Option<NaiveDateTime>,
) -> Window {
    let timing = default_timing(category);
    let stagger = Duration::minutes(stagger_minutes);

    let activate_at = override_activate
        .unwrap_or_else(|| at_minutes(check_in, timing.activate_minutes) + stagger);
    let deactivate_at = override_deactivate
        .unwrap_or_else(|| at_minutes(check_out, timing.deactivate_minutes) + stagger);

    Window::new(activate_at, deactivate_at)
}

/// Compute the window of a reservation on a device, honoring any override
pub fn window_for(
    device: &Device,
    reservation: &Reservation,
    time_override: Option<&TimeOverride>,
) -> Window {
    calculate(
        device.category,
        reservation.check_in,
        reservation.check_out,
        device.stagger_minutes,
        time_override.and_then(|o| o.activate_at),
        time_override.and_then(|o| o.deactivate_at),
    )
}

#[cfg(test)]
#[path = "timing_tests.rs"]
mod tests;
