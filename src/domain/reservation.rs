//! Reservation data model and audit events

use crate::domain::types::{
    ClientId, ClientTier, FacilityId, ParkingEventId, ReservationId, SectorId, Version,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Reservation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Active,
    Ended,
    Cancelled,
}

impl ReservationStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Ended => "ended",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What drove a reservation into a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Client exit event
    Exit,
    /// Client cancelled before or instead of using the place
    Cancelled,
    /// Forced by the expiry sweep
    Expired,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Exit => "exit",
            EndReason::Cancelled => "cancelled",
            EndReason::Expired => "expired",
        }
    }

    /// Status a reservation ends up in for this reason
    pub fn terminal_status(&self) -> ReservationStatus {
        match self {
            EndReason::Exit | EndReason::Expired => ReservationStatus::Ended,
            EndReason::Cancelled => ReservationStatus::Cancelled,
        }
    }
}

/// A claim on one place in one sector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reservation {
    id: ReservationId,
    facility_id: FacilityId,
    sector_id: SectorId,
    client_id: ClientId,
    tier: ClientTier,
    begin_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    entered_at: Option<DateTime<Utc>>,
    status: ReservationStatus,
    end_reason: Option<EndReason>,
    version: Version,
}

impl Reservation {
    pub(crate) fn new(
        facility_id: FacilityId,
        sector_id: SectorId,
        client_id: ClientId,
        tier: ClientTier,
        begin_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            facility_id,
            sector_id,
            client_id,
            tier,
            begin_time,
            end_time: None,
            entered_at: None,
            status: ReservationStatus::Active,
            end_reason: None,
            version: Version::INITIAL,
        }
    }

    pub fn id(&self) -> ReservationId {
        self.id
    }

    pub fn facility_id(&self) -> FacilityId {
        self.facility_id
    }

    pub fn sector_id(&self) -> SectorId {
        self.sector_id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn tier(&self) -> ClientTier {
        self.tier
    }

    pub fn begin_time(&self) -> DateTime<Utc> {
        self.begin_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn entered_at(&self) -> Option<DateTime<Utc>> {
        self.entered_at
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Stamp the stored version. Used by repository implementations.
    pub fn stamped(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// True once `begin_time + max_duration` lies strictly before `now`.
    /// A deadline past the representable range is never reached.
    pub fn is_overdue(&self, now: DateTime<Utc>, max_duration: chrono::Duration) -> bool {
        self.is_active()
            && self.begin_time.checked_add_signed(max_duration).is_some_and(|deadline| deadline < now)
    }

    pub(crate) fn mark_entered(&mut self, at: DateTime<Utc>) {
        self.entered_at = Some(at);
    }

    pub(crate) fn finish(&mut self, reason: EndReason, at: DateTime<Utc>) {
        self.status = reason.terminal_status();
        self.end_reason = Some(reason);
        self.end_time = Some(at);
    }

    /// Undo `finish` when the capacity release could not be committed
    pub(crate) fn reopen(&mut self) {
        self.status = ReservationStatus::Active;
        self.end_reason = None;
        self.end_time = None;
    }
}

/// Entry/exit audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParkingEventType {
    Entry,
    Exit,
}

impl ParkingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParkingEventType::Entry => "entry",
            ParkingEventType::Exit => "exit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParkingEvent {
    pub id: ParkingEventId,
    pub reservation_id: ReservationId,
    pub sector_id: SectorId,
    pub event_type: ParkingEventType,
    pub at: DateTime<Utc>,
}

impl ParkingEvent {
    pub fn new(reservation: &Reservation, event_type: ParkingEventType, at: DateTime<Utc>) -> Self {
        Self {
            id: ParkingEventId::new(),
            reservation_id: reservation.id(),
            sector_id: reservation.sector_id(),
            event_type,
            at,
        }
    }
}
