//! Per-question reply cache with a fixed expiry.

use rustc_hash::FxHashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use hickory_proto::rr::RecordType;

use crate::client::LookupResult;
use crate::dns::Question;

/// Table size at which `set` sweeps out expired entries.
pub const GC_THRESHOLD: usize = 1000;

struct CacheEntry {
    result: LookupResult,
    created: Instant,
}

/// Reply cache keyed by question.
///
/// Uses a 2-level map (qtype -> domain -> entry) so lookups don't allocate a key.
/// A zero expiry disables the cache entirely.
pub struct DnsCache {
    entries: RwLock<FxHashMap<RecordType, FxHashMap<String, CacheEntry>>>,
    expire: Duration,
}

impl DnsCache {
    pub fn new(expire: Duration) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            expire,
        }
    }

    pub fn from_secs(expire_sec: u64) -> Self {
        Self::new(Duration::from_secs(expire_sec))
    }

    pub fn enabled(&self) -> bool {
        !self.expire.is_zero()
    }

    pub fn get(&self, question: &Question) -> Option<LookupResult> {
        if !self.enabled() {
            return None;
        }
        let now = Instant::now();

        {
            let Ok(entries) = self.entries.read() else {
                return None;
            };
            let entry = entries.get(&question.qtype)?.get(&question.name)?;
            if now.duration_since(entry.created) <= self.expire {
                return Some(entry.result.clone());
            }
        }

        let Ok(mut entries) = self.entries.write() else {
            return None;
        };
        if let Some(inner) = entries.get_mut(&question.qtype) {
            if inner
                .get(&question.name)
                .is_some_and(|e| now.duration_since(e.created) > self.expire)
            {
                inner.remove(&question.name);
            }
        }
        None
    }

    /// Store unconditionally, then sweep expired entries once the table is large.
    pub fn set(&self, question: &Question, result: LookupResult) {
        if !self.enabled() {
            return;
        }
        let Ok(mut entries) = self.entries.write() else {
            return;
        };

        let now = Instant::now();
        entries.entry(question.qtype).or_default().insert(
            question.name.clone(),
            CacheEntry {
                result,
                created: now,
            },
        );

        let size: usize = entries.values().map(|inner| inner.len()).sum();
        if size < GC_THRESHOLD {
            return;
        }
        for inner in entries.values_mut() {
            inner.retain(|_, e| now.duration_since(e.created) <= self.expire);
        }
        entries.retain(|_, inner| !inner.is_empty());
        tracing::debug!(before = size, after = len_of(&entries), "cache gc");
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| len_of(&e)).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn len_of(entries: &FxHashMap<RecordType, FxHashMap<String, CacheEntry>>) -> usize {
    entries.values().map(|inner| inner.len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::tests::{a_record, query, reply_with};
    use std::net::Ipv4Addr;
    use std::thread::sleep;

    fn result(domain: &str) -> LookupResult {
        let req = query(domain, RecordType::A);
        LookupResult::synthetic(reply_with(&req, vec![a_record(domain, Ipv4Addr::new(1, 1, 1, 1))]))
    }

    #[test]
    fn get_returns_stored_result() {
        let cache = DnsCache::from_secs(60);
        let q = Question::new("example.com", RecordType::A);

        cache.set(&q, result("example.com"));

        let hit = cache.get(&q).unwrap();
        assert_eq!(hit.reply.answers().len(), 1);
        assert!(cache.get(&Question::new("example.com", RecordType::AAAA)).is_none());
        assert!(cache.get(&Question::new("Example.COM.", RecordType::A)).is_some());
    }

    #[test]
    fn get_misses_after_expiry() {
        let cache = DnsCache::new(Duration::from_millis(20));
        let q = Question::new("example.com", RecordType::A);
        cache.set(&q, result("example.com"));

        sleep(Duration::from_millis(40));

        assert!(cache.get(&q).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn zero_expiry_disables_cache() {
        let cache = DnsCache::from_secs(0);
        let q = Question::new("example.com", RecordType::A);

        cache.set(&q, result("example.com"));

        assert!(cache.get(&q).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn gc_sweeps_expired_entries_at_threshold() {
        let cache = DnsCache::new(Duration::from_millis(500));
        for i in 0..GC_THRESHOLD - 1 {
            let name = format!("old{i}.example.com");
            cache.set(&Question::new(&name, RecordType::A), result(&name));
        }
        assert_eq!(cache.len(), GC_THRESHOLD - 1);
        let fresh: Vec<_> = (0..GC_THRESHOLD)
            .map(|i| {
                let name = format!("new{i}.example.com");
                (Question::new(&name, RecordType::A), result(&name))
            })
            .collect();

        sleep(Duration::from_millis(600));
        for (q, r) in fresh {
            cache.set(&q, r);
        }

        assert_eq!(cache.len(), GC_THRESHOLD);
        assert!(cache.get(&Question::new("old0.example.com", RecordType::A)).is_none());
    }

    #[test]
    fn gc_keeps_live_entries() {
        let cache = DnsCache::from_secs(60);
        for i in 0..GC_THRESHOLD + 5 {
            let name = format!("d{i}.example.com");
            cache.set(&Question::new(&name, RecordType::A), result(&name));
        }

        assert_eq!(cache.len(), GC_THRESHOLD + 5);
    }
}
