use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;

use super::{OutputMessage, Publisher};

#[derive(Default)]
struct MemoryState {
    messages: VecDeque<(String, OutputMessage)>,
    /// Oldest messages are evicted past this many.
    limit: Option<usize>,
    published: u64,
    subscribers: HashMap<String, usize>,
}

/// In-process publisher that records sent messages.
///
/// Clones share the same record, so a test (or a dry run) can keep one
/// handle while the tracker owns another.
#[derive(Clone, Default)]
pub struct MemoryPublisher {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryPublisher {
    /// Records every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only the most recent `limit` messages. Long-running dry runs
    /// use this so the record stays a fixed size.
    pub fn bounded(limit: usize) -> Self {
        let publisher = Self::default();
        publisher.state().limit = Some(limit);
        publisher
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_subscribers(&self, topic: &str, count: usize) {
        self.state().subscribers.insert(topic.to_string(), count);
    }

    /// Retained (topic, message) pairs in send order.
    pub fn messages(&self) -> Vec<(String, OutputMessage)> {
        self.state().messages.iter().cloned().collect()
    }

    pub fn messages_on(&self, topic: &str) -> Vec<OutputMessage> {
        self.state()
            .messages
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Messages sent since creation, including evicted ones.
    pub fn published(&self) -> u64 {
        self.state().published
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&mut self, topic: &str, message: &OutputMessage) -> Result<()> {
        log::debug!("memory publish {} -> {}", message.kind(), topic);
        let mut state = self.state();
        state.published += 1;
        if state.limit == Some(0) {
            return Ok(());
        }
        state.messages.push_back((topic.to_string(), message.clone()));
        if let Some(limit) = state.limit {
            while state.messages.len() > limit {
                state.messages.pop_front();
            }
        }
        Ok(())
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        self.state().subscribers.get(topic).copied().unwrap_or(0)
    }
}
