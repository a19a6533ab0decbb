//! Lifecycle notices - fire-and-forget hook on reservation transitions
//!
//! Notifiers are invoked after the state change has been committed. They
//! cannot fail the operation that triggered them and must not block.

use crate::domain::{ClientId, EndReason, FacilityId, Reservation, ReservationId, SectorId};
use crate::infra::metrics::Metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Created,
    Entered,
    Exited,
    Cancelled,
    Expired,
}

impl NoticeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::Created => "created",
            NoticeKind::Entered => "entered",
            NoticeKind::Exited => "exited",
            NoticeKind::Cancelled => "cancelled",
            NoticeKind::Expired => "expired",
        }
    }
}

impl From<EndReason> for NoticeKind {
    fn from(reason: EndReason) -> Self {
        match reason {
            EndReason::Exit => NoticeKind::Exited,
            EndReason::Cancelled => NoticeKind::Cancelled,
            EndReason::Expired => NoticeKind::Expired,
        }
    }
}

/// A committed reservation transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservationNotice {
    pub kind: NoticeKind,
    pub reservation_id: ReservationId,
    pub client_id: ClientId,
    pub facility_id: FacilityId,
    pub sector_id: SectorId,
    pub at: DateTime<Utc>,
}

impl ReservationNotice {
    pub fn new(kind: NoticeKind, reservation: &Reservation, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            reservation_id: reservation.id(),
            client_id: reservation.client_id().clone(),
            facility_id: reservation.facility_id(),
            sector_id: reservation.sector_id(),
            at,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: ReservationNotice);
}

/// Discards every notice
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notice: ReservationNotice) {}
}

/// Forwards notices to a bounded channel; drops (and counts) when full
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<ReservationNotice>,
    metrics: Option<Arc<Metrics>>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::Sender<ReservationNotice>) -> Self {
        Self { tx, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notice: ReservationNotice) {
        match self.tx.try_send(notice) {
            Ok(()) => {}
            Err(TrySendError::Full(notice)) => {
                if let Some(ref m) = self.metrics {
                    m.record_notice_dropped();
                }
                warn!(
                    reservation_id = %notice.reservation_id,
                    kind = %notice.kind.as_str(),
                    "notice_dropped_channel_full"
                );
            }
            Err(TrySendError::Closed(notice)) => {
                debug!(reservation_id = %notice.reservation_id, "notice_channel_closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClientTier;

    fn notice(kind: NoticeKind) -> ReservationNotice {
        let r = Reservation::new(
            FacilityId::new(),
            SectorId::new(),
            ClientId::new("client-7"),
            ClientTier::Standard,
            Utc::now(),
        );
        ReservationNotice::new(kind, &r, Utc::now())
    }

    #[test]
    fn test_end_reason_maps_to_kind() {
        assert_eq!(NoticeKind::from(EndReason::Exit), NoticeKind::Exited);
        assert_eq!(NoticeKind::from(EndReason::Cancelled), NoticeKind::Cancelled);
        assert_eq!(NoticeKind::from(EndReason::Expired), NoticeKind::Expired);
    }

    #[test]
    fn test_channel_notifier_forwards() {
        let (tx, mut rx) = mpsc::channel(4);
        let notifier = ChannelNotifier::new(tx);
        notifier.notify(notice(NoticeKind::Created));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.kind, NoticeKind::Created);
        assert_eq!(received.client_id.as_str(), "client-7");
    }

    #[test]
    fn test_channel_notifier_drops_when_full() {
        let metrics = Arc::new(Metrics::new());
        let (tx, mut rx) = mpsc::channel(1);
        let notifier = ChannelNotifier::new(tx).with_metrics(metrics.clone());

        notifier.notify(notice(NoticeKind::Created));
        notifier.notify(notice(NoticeKind::Exited));
        notifier.notify(notice(NoticeKind::Expired));

        assert_eq!(metrics.notices_dropped(), 2);
        assert_eq!(rx.try_recv().unwrap().kind, NoticeKind::Created);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_channel_is_silent() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let metrics = Arc::new(Metrics::new());
        ChannelNotifier::new(tx).with_metrics(metrics.clone()).notify(notice(NoticeKind::Created));
        assert_eq!(metrics.notices_dropped(), 0);
    }

    #[test]
    fn test_notice_serializes_kind() {
        let json = serde_json::to_string(&notice(NoticeKind::Cancelled)).unwrap();
        assert!(json.contains("\"kind\":\"cancelled\""));
        assert!(json.contains("\"client_id\":\"client-7\""));
    }
}
