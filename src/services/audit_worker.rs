//! Audit worker - writes lifecycle notices off the allocation path
//!
//! Lifecycle operations push notices into a bounded mpsc channel through a
//! [`ChannelNotifier`]; the worker drains it and appends each notice to the
//! audit log. File I/O never runs on the caller's thread.

use crate::infra::metrics::Metrics;
use crate::io::audit::AuditLog;
use crate::services::notifier::{ChannelNotifier, ReservationNotice};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

pub struct AuditWorker {
    log: AuditLog,
    notice_rx: mpsc::Receiver<ReservationNotice>,
}

impl AuditWorker {
    pub fn new(log: AuditLog, notice_rx: mpsc::Receiver<ReservationNotice>) -> Self {
        Self { log, notice_rx }
    }

    /// Run the worker until every sender is dropped. Returns the number of
    /// notices written.
    pub async fn run(mut self) -> u64 {
        info!(file = %self.log.file_path(), "audit_worker_started");
        let mut written = 0u64;

        while let Some(notice) = self.notice_rx.recv().await {
            if self.log.write_notice(&notice) {
                written += 1;
            }
        }

        info!(written = %written, "audit_worker_stopped");
        written
    }
}

/// Create a notice channel and worker
///
/// Returns the notifier (for the lifecycle) and the worker (to be spawned)
pub fn create_audit_worker(
    log: AuditLog,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (ChannelNotifier, AuditWorker) {
    let (notice_tx, notice_rx) = mpsc::channel(buffer_size.max(1));
    let notifier = ChannelNotifier::new(notice_tx).with_metrics(metrics);
    (notifier, AuditWorker::new(log, notice_rx))
}
