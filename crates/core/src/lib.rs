// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! kw-core: pure domain of the keyward credential engine
//!
//! This crate provides:
//! - The device and reservation-group catalog with fixed slot pools
//! - The code time calculator and the slot allocator
//! - The per-slot synchronization state machine
//! - Job identity, the timer/catch-up queue and rehydration planning
//! - Configuration, audit records and write-ahead log operations

pub mod clock;
pub mod id;

pub mod catalog;
pub mod reservation;
pub mod slot;

pub mod allocator;
pub mod assignment;
pub mod timing;

pub mod job;
pub mod rehydrate;
pub mod scheduler;
pub mod sync;

pub mod audit;
pub mod config;
pub mod operation;

// Re-exports
pub use allocator::{AllocationError, SlotAllocator};
pub use assignment::{Assignment, TimeOverride, Window};
pub use audit::{AuditAction, AuditEntry};
pub use catalog::{Catalog, CatalogError, Device, DeviceCategory, GroupKind, ReservationGroup};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{ConfigError, EngineConfig, Settings};
pub use id::{DeviceId, GroupId, ReservationId};
pub use job::{Job, JobKey, JobKind, JobPayload, Recurrence};
pub use operation::Operation;
pub use rehydrate::{Disposition, RehydrationPlan, SkipReason};
pub use reservation::{code_from_phone, Reservation, SourceReservation};
pub use scheduler::{Placement, Scheduler};
pub use slot::{SlotKey, SlotPool, EMERGENCY_SLOT, MASTER_SLOT, SLOT_COUNT};
pub use sync::{SlotSync, SweepAction, SyncPolicy, SyncState};
