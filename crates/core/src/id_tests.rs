// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn ids_display_their_inner_value() {
    assert_eq!(DeviceId::new("lock.front").to_string(), "lock.front");
    assert_eq!(GroupId::from("room_1").to_string(), "room_1");
    assert_eq!(ReservationId::from("abc".to_string()).as_str(), "abc");
}

#[test]
fn ids_serialize_transparently() {
    let id = ReservationId::new("uid-42");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"uid-42\"");
    let back: ReservationId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}
