//! One-shot diagnostics
//!
//! The sensor tree is re-read every poll cycle, so "found X at path Y"
//! messages would otherwise repeat forever. Keys are remembered for the whole
//! process lifetime.

use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Default)]
pub struct EventDeduplicator {
    seen: HashSet<String>,
}

impl EventDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `message` unless `key` was already notified. Returns whether it was logged.
    pub fn notify_once(&mut self, message: impl AsRef<str>, key: impl Into<String>) -> bool {
        if !self.seen.insert(key.into()) {
            return false;
        }
        info!("{}", message.as_ref());
        true
    }

    #[cfg(test)]
    pub fn seen(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_once_per_key() {
        let mut dedup = EventDeduplicator::new();
        assert!(dedup.is_empty());

        assert!(dedup.notify_once("Found CPU hardware: Sensor/Intel", "hw:cpu:Sensor/Intel"));
        assert!(!dedup.notify_once("Found CPU hardware: Sensor/Intel", "hw:cpu:Sensor/Intel"));
        assert!(dedup.notify_once("Found GPU hardware: Sensor/NVIDIA", "hw:gpu:Sensor/NVIDIA"));

        assert!(dedup.seen("hw:cpu:Sensor/Intel"));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_same_message_different_key_is_emitted() {
        let mut dedup = EventDeduplicator::new();
        assert!(dedup.notify_once("sensor appeared", "a"));
        assert!(dedup.notify_once("sensor appeared", "b"));
    }
}
