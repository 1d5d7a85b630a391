//! Participant registry
//!
//! A process-wide directory mapping participant id to endpoint, fed by the
//! admission API and consulted when a transaction is submitted. Purely a
//! snapshot: no health probing, no ownership of transactions.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pact_common::protocol::ParticipantInfo;
use tracing::info;

#[derive(Debug, Clone)]
struct RegistryEntry {
    endpoint: String,
    last_seen: DateTime<Utc>,
}

/// Directory of known participants
#[derive(Default)]
pub struct ParticipantRegistry {
    entries: DashMap<String, RegistryEntry>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Add or refresh a participant; re-registration updates the endpoint
    pub fn register(&self, participant_id: impl Into<String>, endpoint: impl Into<String>) {
        let participant_id = participant_id.into();
        let endpoint = endpoint.into();
        info!(participant = %participant_id, endpoint = %endpoint, "registered participant");
        self.entries
            .insert(participant_id, RegistryEntry { endpoint, last_seen: Utc::now() });
    }

    /// Resolve an id to its endpoint
    pub fn resolve(&self, participant_id: &str) -> Option<String> {
        self.entries.get(participant_id).map(|e| e.endpoint.clone())
    }

    /// Refresh `last_seen` after a successful call
    pub fn touch(&self, participant_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(participant_id) {
            entry.last_seen = Utc::now();
        }
    }

    /// Snapshot of all registrations
    pub fn list(&self) -> Vec<ParticipantInfo> {
        let mut infos: Vec<ParticipantInfo> = self
            .entries
            .iter()
            .map(|entry| ParticipantInfo {
                participant_id: entry.key().clone(),
                endpoint: entry.value().endpoint.clone(),
                last_seen: entry.value().last_seen,
            })
            .collect();
        infos.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        infos
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
