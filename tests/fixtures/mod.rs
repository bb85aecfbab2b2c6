//! Shared fixtures for integration tests

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use type_duel::config::AppConfig;
use type_duel::error::Result;
use type_duel::relay::{EventStream, InMemoryRelay, RelayClient};
use type_duel::types::{MatchPreference, Participant, RoomSettings};

/// Config with short timing windows so tests run quickly
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.matchmaking.room_grace_seconds = 1;
    config.matchmaking.countdown_seconds = 0;
    config
}

pub fn participant(id: &str) -> Participant {
    Participant::new(id, id.to_uppercase())
}

pub fn preference(language: &str, max_len: u32) -> MatchPreference {
    MatchPreference {
        language: language.to_string(),
        max_passage_length: max_len,
    }
}

pub fn settings(language: &str, max_len: u32) -> RoomSettings {
    RoomSettings {
        language: language.to_string(),
        max_passage_length: max_len,
    }
}

/// Relay wrapper that counts published events by name, for assertions
pub struct CountingRelay {
    inner: InMemoryRelay,
    counts: Mutex<HashMap<String, usize>>,
}

impl CountingRelay {
    pub fn new() -> Self {
        Self {
            inner: InMemoryRelay::new(),
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn count_of(&self, event: &str) -> usize {
        self.counts
            .lock()
            .map(|counts| counts.get(event).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl RelayClient for CountingRelay {
    async fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<()> {
        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(event.to_string()).or_insert(0) += 1;
        }
        self.inner.publish(channel, event, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<EventStream> {
        self.inner.subscribe(channel).await
    }
}

/// Convenience: a counting relay behind the trait object the service wants
pub fn counting_relay() -> (Arc<CountingRelay>, Arc<dyn RelayClient>) {
    let relay = Arc::new(CountingRelay::new());
    let as_client: Arc<dyn RelayClient> = relay.clone();
    (relay, as_client)
}
