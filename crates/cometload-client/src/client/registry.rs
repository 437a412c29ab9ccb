// Process-wide map from user identity to client state.
use dashmap::DashMap;
use std::sync::Arc;

use crate::client::state::{ClientState, ClientStatus};
use crate::counters::{AggregateSnapshot, ClientSnapshot};

/// Shared through `Arc`; entries are written once per identity and never removed.
#[derive(Debug, Default)]
pub struct Registry {
    clients: DashMap<String, Arc<ClientState>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `user_name`, or return the state already registered for it.
    pub fn register(&self, user_name: &str, credential: &str) -> Arc<ClientState> {
        self.clients
            .entry(user_name.to_string())
            .or_insert_with(|| Arc::new(ClientState::new(user_name, credential)))
            .clone()
    }

    pub fn get(&self, user_name: &str) -> Option<Arc<ClientState>> {
        self.clients.get(user_name).map(|entry| entry.value().clone())
    }

    pub fn snapshot(&self, user_name: &str) -> Option<ClientSnapshot> {
        self.clients.get(user_name).map(|entry| entry.snapshot())
    }

    /// Every client's snapshot, ordered by user name.
    pub fn snapshots(&self) -> Vec<ClientSnapshot> {
        let mut snapshots: Vec<ClientSnapshot> =
            self.clients.iter().map(|entry| entry.snapshot()).collect();
        snapshots.sort_by(|a, b| a.user_name.cmp(&b.user_name));
        snapshots
    }

    /// Best-effort totals; sessions keep counting while the scan runs.
    pub fn aggregate(&self) -> AggregateSnapshot {
        let mut aggregate = AggregateSnapshot::default();
        for entry in self.clients.iter() {
            aggregate.users += 1;
            if entry.status() == ClientStatus::Closed {
                aggregate.closed += 1;
                continue;
            }
            aggregate.totals.accumulate(&entry.counters().snapshot());
        }
        aggregate
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
