//! Scan lifecycle events.
//!
//! The scheduler broadcasts these so a presentation layer can update its
//! status line without polling the device table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ScanId;

/// Unique identifier for an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// An event emitted by the scan scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl ScanEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// What caused a scan cycle to run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanTrigger {
    /// The periodic cadence elapsed.
    Scheduled,
    /// An out-of-cadence request, e.g. after a subnet change.
    Immediate,
    /// A direct one-shot call outside the cadence.
    Manual,
}

/// The event payload, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type")]
pub enum EventPayload {
    ScanStarted {
        scan_id: ScanId,
        subnet: String,
        trigger: ScanTrigger,
    },
    ScanCompleted {
        scan_id: ScanId,
        device_count: usize,
        appeared: usize,
        departed: usize,
        changed: usize,
        duration_ms: u64,
    },
    /// A scan overran the interval and `missed` ticks were dropped.
    TicksSkipped { missed: u64 },
    SubnetChanged { subnet: String },
    SchedulerStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_roundtrip() {
        let event = ScanEvent::new(EventPayload::ScanStarted {
            scan_id: ScanId::new(),
            subnet: "192.168.1.0/24".to_string(),
            trigger: ScanTrigger::Immediate,
        });

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: ScanEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, deserialized.id);
        assert_eq!(event.payload, deserialized.payload);
    }

    #[test]
    fn event_payload_tags() {
        let payload = EventPayload::ScanCompleted {
            scan_id: ScanId::nil(),
            device_count: 3,
            appeared: 1,
            departed: 0,
            changed: 0,
            duration_ms: 3012,
        };

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"event_type\":\"ScanCompleted\""));

        let json = serde_json::to_string(&EventPayload::SchedulerStopped).unwrap();
        assert_eq!(json, "{\"event_type\":\"SchedulerStopped\"}");
    }

    #[test]
    fn trigger_is_snake_case() {
        let json = serde_json::to_string(&ScanTrigger::Scheduled).unwrap();
        assert_eq!(json, "\"scheduled\"");
    }
}
