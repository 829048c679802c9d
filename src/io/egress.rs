//! Geofence event egress - writes emitted events to file
//!
//! Events are written in JSONL format (one JSON object per line)
//! to the file specified in config.

use crate::domain::types::GeofenceEvent;
use crate::io::egress_channel::EgressMessage;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Egress writer for geofence events
pub struct Egress {
    file_path: String,
}

impl Egress {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "egress_initialized");
        Self { file_path: file_path.to_string() }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Write one event, returns true on success
    pub fn write_event(&self, event: &GeofenceEvent) -> bool {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!(poi_id = %event.poi_id, error = %e, "egress_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                debug!(
                    session_id = %event.session_id,
                    poi_id = %event.poi_id,
                    event_type = %event.event_type.as_str(),
                    "event_egressed"
                );
                true
            }
            Err(e) => {
                error!(session_id = %event.session_id, error = %e, "event_egress_failed");
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
        Ok(())
    }

    /// Write several events, returns how many succeeded
    pub fn write_events(&self, events: &[GeofenceEvent]) -> usize {
        events.iter().filter(|e| self.write_event(e)).count()
    }

    /// Drain the egress channel until every sender is gone
    pub async fn run(self, mut rx: mpsc::Receiver<EgressMessage>) {
        let mut written = 0u64;
        while let Some(msg) = rx.recv().await {
            match msg {
                EgressMessage::Event(event) => {
                    if self.write_event(&event) {
                        written += 1;
                    }
                }
            }
        }
        info!(file_path = %self.file_path, written = %written, "egress_writer_stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{GeofenceEventType, PoiId, SessionId};
    use crate::infra::metrics::Metrics;
    use crate::io::egress_channel::create_egress_channel;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn event(poi: &str, event_type: GeofenceEventType) -> GeofenceEvent {
        GeofenceEvent {
            session_id: SessionId::from("visitor-1"),
            poi_id: PoiId::from(poi),
            poi_name: format!("{poi} name"),
            event_type,
            distance: 12.0,
            timestamp: 1_700_000_000_000,
            confidence: 0.7,
            sequence: 3,
        }
    }

    #[test]
    fn test_write_event() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("events.jsonl");
        let egress = Egress::new(file_path.to_str().unwrap());

        assert!(egress.write_event(&event("museum", GeofenceEventType::Enter)));

        let content = fs::read_to_string(&file_path).unwrap();
        assert!(content.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["poiId"], "museum");
        assert_eq!(parsed["type"], "enter");
        assert_eq!(parsed["sequence"], 3);
    }

    #[test]
    fn test_append_and_batch() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("events.jsonl");
        let egress = Egress::new(file_path.to_str().unwrap());

        egress.write_event(&event("a", GeofenceEventType::Enter));
        let count = egress.write_events(&[
            event("a", GeofenceEventType::Dwell),
            event("a", GeofenceEventType::Exit),
        ]);
        assert_eq!(count, 2);

        let content = fs::read_to_string(&file_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            let _parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        }
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("dir").join("events.jsonl");
        let egress = Egress::new(nested.to_str().unwrap());
        assert!(egress.write_event(&event("a", GeofenceEventType::Enter)));
        assert!(nested.exists());
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("events.jsonl");
        let egress = Egress::new(file_path.to_str().unwrap());
        let (sender, rx) = create_egress_channel(8, Arc::new(Metrics::new()));

        sender.send_event(&event("a", GeofenceEventType::Enter));
        sender.send_event(&event("b", GeofenceEventType::Enter));
        drop(sender);
        egress.run(rx).await;

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
