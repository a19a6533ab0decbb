//! Services - allocation and reservation lifecycle
//!
//! This module contains the core business logic services:
//! - `capacity` - Version-checked increment/decrement of sector occupancy
//! - `allocator` - Eligible sector selection per placement strategy
//! - `lifecycle` - Reservation state machine (create, enter, end, cancel, expire)
//! - `sweeper` - Force-ends overdue reservations with per-item fault isolation
//! - `sweep_worker` - Periodic sweep scheduling
//! - `admin` - Facility and sector administration
//! - `occupancy` - Read-only occupancy queries
//! - `notifier` - Fire-and-forget lifecycle notices
//! - `audit_worker` - Async audit log writer

pub mod admin;
pub mod allocator;
pub mod audit_worker;
pub mod capacity;
pub mod lifecycle;
pub mod notifier;
pub mod occupancy;
pub mod sweep_worker;
pub mod sweeper;

// Re-export commonly used types
pub use admin::SectorAdmin;
pub use allocator::SectorAllocator;
pub use audit_worker::{create_audit_worker, AuditWorker};
pub use capacity::CapacityTracker;
pub use lifecycle::ReservationLifecycle;
pub use notifier::{ChannelNotifier, NoopNotifier, NoticeKind, Notifier, ReservationNotice};
pub use occupancy::{FacilityOccupancy, OccupancyQuery, SectorOccupancy};
pub use sweep_worker::SweepScheduler;
pub use sweeper::{ExpirySweeper, SweepFailure, SweepReport};
