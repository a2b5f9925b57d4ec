//! Pub/Sub subscription routing.
//!
//! Two symmetric registries: exact channels and glob patterns, each mapping
//! to subscriber client ids. The registry only routes; frame delivery goes
//! through each subscriber's serialized connection writer.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use globset::{Glob, GlobMatcher};

#[derive(Debug)]
struct PatternSubscription {
    matcher: GlobMatcher,
    subscribers: HashSet<u64>,
}

#[derive(Debug, Default)]
pub struct PubSub {
    channels: HashMap<Bytes, HashSet<u64>>,
    patterns: HashMap<Bytes, PatternSubscription>,
}

/// One message delivery: who gets it, and through which pattern (None for an
/// exact channel match).
#[derive(Debug, PartialEq)]
pub struct Delivery {
    pub client_id: u64,
    pub pattern: Option<Bytes>,
}

impl PubSub {
    pub fn new() -> Self {
        PubSub::default()
    }

    /// Returns false when the client was already subscribed.
    pub fn subscribe(&mut self, channel: Bytes, client_id: u64) -> bool {
        self.channels.entry(channel).or_default().insert(client_id)
    }

    pub fn unsubscribe(&mut self, channel: &Bytes, client_id: u64) -> bool {
        let Some(subscribers) = self.channels.get_mut(channel) else {
            return false;
        };
        let removed = subscribers.remove(&client_id);
        if subscribers.is_empty() {
            self.channels.remove(channel);
        }
        removed
    }

    /// Pattern subscriptions compile their matcher once, here. An invalid
    /// glob still subscribes (it will just never match), matching the
    /// permissive behavior clients expect.
    pub fn psubscribe(&mut self, pattern: Bytes, client_id: u64) -> bool {
        let entry = self
            .patterns
            .entry(pattern.clone())
            .or_insert_with(|| PatternSubscription {
                matcher: compile_pattern(&pattern),
                subscribers: HashSet::new(),
            });
        entry.subscribers.insert(client_id)
    }

    pub fn punsubscribe(&mut self, pattern: &Bytes, client_id: u64) -> bool {
        let Some(entry) = self.patterns.get_mut(pattern) else {
            return false;
        };
        let removed = entry.subscribers.remove(&client_id);
        if entry.subscribers.is_empty() {
            self.patterns.remove(pattern);
        }
        removed
    }

    pub fn remove_client(&mut self, client_id: u64) {
        self.channels.retain(|_, subscribers| {
            subscribers.remove(&client_id);
            !subscribers.is_empty()
        });
        self.patterns.retain(|_, entry| {
            entry.subscribers.remove(&client_id);
            !entry.subscribers.is_empty()
        });
    }

    /// Everyone a PUBLISH to `channel` reaches: exact subscribers first,
    /// then pattern subscribers in pattern order.
    pub fn deliveries(&self, channel: &[u8]) -> Vec<Delivery> {
        let mut deliveries = Vec::new();

        if let Some(subscribers) = self.channels.get(channel) {
            let mut ids: Vec<u64> = subscribers.iter().copied().collect();
            ids.sort();
            deliveries.extend(ids.into_iter().map(|client_id| Delivery {
                client_id,
                pattern: None,
            }));
        }

        let mut matching_patterns: Vec<(&Bytes, &PatternSubscription)> = self
            .patterns
            .iter()
            .filter(|(_, entry)| {
                std::str::from_utf8(channel)
                    .is_ok_and(|channel| entry.matcher.is_match(channel))
            })
            .collect();
        matching_patterns.sort_by(|(a, _), (b, _)| a.cmp(b));

        for (pattern, entry) in matching_patterns {
            let mut ids: Vec<u64> = entry.subscribers.iter().copied().collect();
            ids.sort();
            deliveries.extend(ids.into_iter().map(|client_id| Delivery {
                client_id,
                pattern: Some(pattern.clone()),
            }));
        }

        deliveries
    }

    /// Active channels, optionally filtered by a glob pattern.
    pub fn active_channels(&self, filter: Option<&[u8]>) -> Vec<Bytes> {
        let matcher = filter.map(compile_pattern_slice);

        let mut channels: Vec<Bytes> = self
            .channels
            .keys()
            .filter(|channel| match &matcher {
                Some(matcher) => std::str::from_utf8(channel)
                    .is_ok_and(|channel| matcher.is_match(channel)),
                None => true,
            })
            .cloned()
            .collect();
        channels.sort();
        channels
    }

    pub fn subscriber_count(&self, channel: &[u8]) -> usize {
        self.channels
            .get(channel)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

fn compile_pattern(pattern: &Bytes) -> GlobMatcher {
    compile_pattern_slice(pattern.as_ref())
}

fn compile_pattern_slice(pattern: &[u8]) -> GlobMatcher {
    let text = String::from_utf8_lossy(pattern);
    Glob::new(&text)
        .unwrap_or_else(|_| Glob::new("").expect("the empty glob compiles"))
        .compile_matcher()
}
