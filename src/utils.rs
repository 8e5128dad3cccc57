//! Utility functions for the esp-ble-prov crate.

use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashSet;
use tokio::sync::mpsc;

/// Tracks names already reported during one discovery run.
///
/// First-seen order is the caller's responsibility: report a name only when
/// [`FirstSeen::insert`] returns `true`.
#[derive(Debug, Default)]
pub struct FirstSeen {
    seen: HashSet<String>,
}

impl FirstSeen {
    /// Record `name`, returning `true` the first time it is seen.
    pub fn insert(&mut self, name: &str) -> bool {
        if self.seen.contains(name) {
            return false;
        }
        self.seen.insert(name.to_string())
    }

    /// Number of distinct names seen.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Remove repeated names, keeping the first occurrence of each.
///
/// # Example
///
/// ```
/// use esp_ble_prov::utils::dedup_names;
///
/// let names = dedup_names(vec!["A".to_string(), "B".to_string(), "A".to_string()]);
/// assert_eq!(names, vec!["A", "B"]);
/// ```
pub fn dedup_names(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = FirstSeen::default();
    names
        .into_iter()
        .filter(|name| seen.insert(name))
        .collect()
}

/// Adapt an mpsc receiver into a stream that ends when all senders are gone.
pub(crate) fn receiver_stream<T: Send + 'static>(rx: mpsc::Receiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_first_seen_order() {
        let names = ["ESP-2", "ESP-1", "ESP-2", "ESP-1", "ESP-3"]
            .iter()
            .map(|s| s.to_string());
        assert_eq!(dedup_names(names), vec!["ESP-2", "ESP-1", "ESP-3"]);
    }

    #[test]
    fn test_first_seen() {
        let mut seen = FirstSeen::default();
        assert!(seen.is_empty());
        assert!(seen.insert("ESP-1"));
        assert!(!seen.insert("ESP-1"));
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn test_receiver_stream_ends_with_sender() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        drop(tx);

        let items: Vec<i32> = receiver_stream(rx).collect().await;
        assert_eq!(items, vec![1, 2]);
    }
}
