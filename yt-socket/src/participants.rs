//! Room roster tracking.
//!
//! `participant_changed` carries the full participant list every time. The
//! tracker diffs consecutive snapshots into arrivals and departures. The
//! first snapshot only records who was already present, and the client's
//! own uuid never shows up in either list.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::events::{Participant, SocketEvent};

/// Name used for participants without a `pin_name`.
const UNNAMED: &str = "User";

/// Someone who left since the previous snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub uuid: String,
    pub pin_name: String,
    /// Time between first seen and gone.
    pub stayed: Duration,
}

/// Difference between two roster snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterChange {
    pub joined: Vec<Participant>,
    pub left: Vec<Departure>,
}

impl RosterChange {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Present {
    pin_name: String,
    since: Instant,
}

#[derive(Debug, Clone)]
pub struct ParticipantTracker {
    self_uuid: String,
    /// `None` until the baseline snapshot arrives.
    present: Option<BTreeMap<String, Present>>,
}

impl ParticipantTracker {
    pub fn new(self_uuid: impl Into<String>) -> Self {
        Self {
            self_uuid: self_uuid.into(),
            present: None,
        }
    }

    /// Whether the baseline snapshot has been recorded.
    pub fn has_baseline(&self) -> bool {
        self.present.is_some()
    }

    /// Number of other participants currently in the room.
    pub fn len(&self) -> usize {
        self.present.as_ref().map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Diff a `participant_changed` event. `None` for any other event.
    pub fn observe(&mut self, event: &SocketEvent) -> Option<RosterChange> {
        event.as_participants().map(|people| self.update(&people))
    }

    /// Apply a full snapshot and return who came and went. The first
    /// snapshot is the baseline and always yields an empty change.
    pub fn update(&mut self, participants: &[Participant]) -> RosterChange {
        let now = Instant::now();
        let current: Vec<(&str, &Participant)> = participants
            .iter()
            .filter_map(|p| p.uuid.as_deref().map(|uuid| (uuid, p)))
            .filter(|(uuid, _)| *uuid != self.self_uuid)
            .collect();

        let Some(present) = self.present.as_mut() else {
            let baseline = current
                .iter()
                .map(|(uuid, p)| (uuid.to_string(), Present::new(p, now)))
                .collect();
            self.present = Some(baseline);
            return RosterChange::default();
        };

        let mut change = RosterChange::default();
        for (uuid, p) in &current {
            if !present.contains_key(*uuid) {
                present.insert(uuid.to_string(), Present::new(p, now));
                change.joined.push((*p).clone());
            }
        }

        let gone: Vec<String> = present
            .keys()
            .filter(|uuid| !current.iter().any(|(u, _)| *u == uuid.as_str()))
            .cloned()
            .collect();
        for uuid in gone {
            if let Some(entry) = present.remove(&uuid) {
                change.left.push(Departure {
                    uuid,
                    pin_name: entry.pin_name,
                    stayed: now.saturating_duration_since(entry.since),
                });
            }
        }
        change
    }
}

impl Present {
    fn new(participant: &Participant, since: Instant) -> Self {
        Self {
            pin_name: participant
                .pin_name
                .clone()
                .unwrap_or_else(|| UNNAMED.to_string()),
            since,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SocketEventType;
    use serde_json::json;

    fn person(uuid: &str, name: &str) -> Participant {
        Participant {
            uuid: Some(uuid.into()),
            pin_name: Some(name.into()),
            ..Participant::default()
        }
    }

    fn uuids(people: &[Participant]) -> Vec<&str> {
        people.iter().filter_map(|p| p.uuid.as_deref()).collect()
    }

    #[test]
    fn test_first_snapshot_is_baseline() {
        let mut tracker = ParticipantTracker::new("me");
        let change = tracker.update(&[person("me", "bot"), person("u1", "a"), person("u2", "b")]);
        assert!(change.is_empty());
        assert!(tracker.has_baseline());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_diff_reports_joins_and_leaves() {
        let mut tracker = ParticipantTracker::new("me");
        tracker.update(&[person("u1", "a"), person("u2", "b")]);

        let change = tracker.update(&[person("u2", "b"), person("u3", "c")]);
        assert_eq!(uuids(&change.joined), vec!["u3"]);
        assert_eq!(change.left.len(), 1);
        assert_eq!(change.left[0].uuid, "u1");
        assert_eq!(change.left[0].pin_name, "a");

        let unchanged = tracker.update(&[person("u3", "c"), person("u2", "b")]);
        assert!(unchanged.is_empty());
    }

    #[test]
    fn test_own_uuid_is_never_reported() {
        let mut tracker = ParticipantTracker::new("me");
        tracker.update(&[person("u1", "a")]);

        let change = tracker.update(&[person("u1", "a"), person("me", "bot")]);
        assert!(change.is_empty());

        let change = tracker.update(&[person("u1", "a")]);
        assert!(change.is_empty());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_entries_without_uuid_are_ignored() {
        let mut tracker = ParticipantTracker::new("me");
        tracker.update(&[]);
        let nameless = Participant {
            uuid: Some("u9".into()),
            ..Participant::default()
        };
        let change = tracker.update(&[Participant::default(), nameless]);
        assert_eq!(uuids(&change.joined), vec!["u9"]);

        let change = tracker.update(&[]);
        assert_eq!(change.left[0].pin_name, "User");
    }

    #[test]
    fn test_observe_reads_participant_events_only() {
        let mut tracker = ParticipantTracker::new("me");
        let chat = SocketEvent::new(SocketEventType::NewMessage, json!({"message": "hi"}));
        assert!(tracker.observe(&chat).is_none());
        assert!(!tracker.has_baseline());

        let roster = SocketEvent::new(
            SocketEventType::ParticipantChanged,
            json!([{"uuid": "u1", "pin_name": "a"}]),
        );
        assert_eq!(tracker.observe(&roster), Some(RosterChange::default()));
        assert!(tracker.has_baseline());
    }
}
