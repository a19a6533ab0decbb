//! Audit log - writes lifecycle notices to file
//!
//! Notices are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::services::notifier::ReservationNotice;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

pub struct AuditLog {
    file_path: String,
}

impl AuditLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "audit_log_initialized");
        Self { file_path: file_path.to_string() }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Append a notice to the audit file
    /// Returns true if successful, false otherwise
    pub fn write_notice(&self, notice: &ReservationNotice) -> bool {
        let line = match serde_json::to_string(notice) {
            Ok(line) => line,
            Err(e) => {
                error!(reservation_id = %notice.reservation_id, error = %e, "audit_encode_failed");
                return false;
            }
        };

        match self.append_line(&line) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    reservation_id = %notice.reservation_id,
                    kind = %notice.kind.as_str(),
                    error = %e,
                    "audit_write_failed"
                );
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "audit_written");

        Ok(())
    }
}
