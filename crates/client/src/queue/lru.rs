//! Bounded result cache keyed by request URL.

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Insertion-ordered cache with a fixed capacity and entry TTL.
///
/// When full, the least-recently-inserted entry is evicted. Re-inserting a
/// URL moves it to the newest position.
#[derive(Debug)]
pub struct ResultCache {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<String, (Bytes, Instant)>,
    order: VecDeque<String>,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn get(&mut self, url: &str) -> Option<Bytes> {
        let expired = match self.entries.get(url) {
            Some((bytes, stored)) if stored.elapsed() <= self.ttl => return Some(bytes.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.remove(url);
        }
        None
    }

    pub fn insert(&mut self, url: String, bytes: Bytes) {
        if self.entries.contains_key(&url) {
            self.order.retain(|u| u != &url);
        }
        self.order.push_back(url.clone());
        self.entries.insert(url, (bytes, Instant::now()));

        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else { break };
            self.entries.remove(&oldest);
            tracing::trace!(url = %oldest, "evicted queue result");
        }
    }

    fn remove(&mut self, url: &str) {
        self.entries.remove(url);
        self.order.retain(|u| u != url);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    fn url(i: usize) -> String {
        format!("https://cdn.example.com/{i}.jpg")
    }

    #[test]
    fn test_capacity_plus_one_evicts_oldest() {
        let mut cache = ResultCache::new(100, DAY);
        for i in 0..=100 {
            cache.insert(url(i), Bytes::from(vec![i as u8]));
        }

        assert_eq!(cache.len(), 100);
        assert!(cache.get(&url(0)).is_none());
        assert!(cache.get(&url(1)).is_some());
        assert_eq!(cache.get(&url(100)), Some(Bytes::from(vec![100u8])));
    }

    #[test]
    fn test_reinsert_refreshes_position() {
        let mut cache = ResultCache::new(2, DAY);
        cache.insert(url(0), Bytes::from_static(b"a"));
        cache.insert(url(1), Bytes::from_static(b"b"));
        cache.insert(url(0), Bytes::from_static(b"c"));
        cache.insert(url(2), Bytes::from_static(b"d"));

        assert!(cache.get(&url(1)).is_none());
        assert_eq!(cache.get(&url(0)), Some(Bytes::from_static(b"c")));
    }

    #[test]
    fn test_expired_entry_dropped() {
        let mut cache = ResultCache::new(4, Duration::from_millis(5));
        cache.insert(url(0), Bytes::from_static(b"a"));
        std::thread::sleep(Duration::from_millis(15));

        assert!(cache.get(&url(0)).is_none());
        assert!(cache.is_empty());
    }
}
