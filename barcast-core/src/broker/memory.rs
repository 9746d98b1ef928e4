//! In-process bus with Redis-style pattern matching.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::{BarBus, BusEvent, BusResult, Subscription, SUBSCRIPTION_BUFFER};

/// Process-local [`BarBus`]. Channels need no declaration; a publish fans out
/// to every live subscription whose pattern matches.
#[derive(Default)]
pub struct MemoryBus {
    subscribers: DashMap<String, Vec<mpsc::Sender<BusEvent>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BarBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &[u8]) -> BusResult<()> {
        let mut targets = Vec::new();
        for mut entry in self.subscribers.iter_mut() {
            entry.value_mut().retain(|sender| !sender.is_closed());
            if pattern_matches(entry.key(), channel) {
                targets.extend(entry.value().iter().cloned());
            }
        }
        // guards released; now the sends may block
        for sender in targets {
            let event = BusEvent {
                channel: channel.to_string(),
                payload: payload.to_vec(),
            };
            let _ = sender.send(event).await;
        }
        Ok(())
    }

    async fn subscribe_pattern(&self, pattern: &str) -> BusResult<Subscription> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.subscribers
            .entry(pattern.to_string())
            .or_default()
            .push(sender);
        Ok(Subscription::new(pattern.to_string(), receiver))
    }
}

/// Glob match with `PSUBSCRIBE` semantics: `*` matches any run of characters
/// including `/`, `?` matches exactly one character.
fn pattern_matches(pattern: &str, channel: &str) -> bool {
    let pattern = pattern.as_bytes();
    let channel = channel.as_bytes();
    let mut p = 0;
    let mut c = 0;
    let mut star: Option<usize> = None;
    let mut star_c = 0;
    while c < channel.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == channel[c]) {
            p += 1;
            c += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some(p);
            star_c = c;
            p += 1;
        } else if let Some(rewind) = star {
            // widen the last star by one character and retry
            p = rewind + 1;
            star_c += 1;
            c = star_c;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}
