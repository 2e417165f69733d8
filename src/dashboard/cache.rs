use std::collections::HashMap;
use std::fmt::Display;
use std::time::{Duration, Instant};

use tracing::debug;

/// Results keyed by query signature, each valid for a fixed TTL after it was stored.
pub struct QueryCache<T> {
    ttl: Duration,
    entries: HashMap<String, (Instant, T)>,
}

/// Signature for a query and its parameters, e.g. `technology_demand(2024-05-01,20)`.
pub fn query_key(name: &str, params: &[&dyn Display]) -> String {
    let args: Vec<String> = params.iter().map(|p| p.to_string()).collect();
    format!("{}({})", name, args.join(","))
}

impl<T: Clone> QueryCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<T> {
        self.entries
            .get(key)
            .filter(|(stored, _)| now.saturating_duration_since(*stored) < self.ttl)
            .map(|(_, value)| value.clone())
    }

    pub fn insert_at(&mut self, key: String, value: T, now: Instant) {
        self.entries.insert(key, (now, value));
    }

    /// Cached value for `key`, or run `load` and cache what it returns. Errors are not
    /// cached.
    pub fn get_or_try_insert_with_at<E>(
        &mut self,
        key: &str,
        now: Instant,
        load: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        if let Some(hit) = self.get_at(key, now) {
            debug!(key, "Query cache hit");
            return Ok(hit);
        }
        let value = load()?;
        self.insert_at(key.to_string(), value.clone(), now);
        Ok(value)
    }

    pub fn get_or_try_insert_with<E>(
        &mut self,
        key: &str,
        load: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        self.get_or_try_insert_with_at(key, Instant::now(), load)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_include_parameters() {
        assert_eq!(query_key("kpis", &[]), "kpis()");
        assert_eq!(query_key("demand", &[&"2024-05-01", &20]), "demand(2024-05-01,20)");
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache = QueryCache::new(Duration::from_secs(3600));
        let t0 = Instant::now();
        cache.insert_at("q".to_string(), 1, t0);
        assert_eq!(cache.get_at("q", t0 + Duration::from_secs(3599)), Some(1));
        assert_eq!(cache.get_at("q", t0 + Duration::from_secs(3600)), None);
        assert_eq!(cache.get_at("other", t0), None);
    }

    #[test]
    fn loader_runs_once_within_ttl() {
        let mut cache = QueryCache::new(Duration::from_secs(60));
        let t0 = Instant::now();
        let mut calls = 0;
        for offset in [0, 10, 59] {
            let v: Result<i32, ()> = cache.get_or_try_insert_with_at("q", t0 + Duration::from_secs(offset), || {
                calls += 1;
                Ok(42)
            });
            assert_eq!(v, Ok(42));
        }
        assert_eq!(calls, 1);

        let _ = cache.get_or_try_insert_with_at("q", t0 + Duration::from_secs(61), || {
            calls += 1;
            Ok::<_, ()>(43)
        });
        assert_eq!(calls, 2);
    }

    #[test]
    fn errors_are_not_cached() {
        let mut cache: QueryCache<i32> = QueryCache::new(Duration::from_secs(60));
        assert_eq!(cache.get_or_try_insert_with("q", || Err("down")), Err("down"));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get_or_try_insert_with("q", || Ok::<_, &str>(7)), Ok(7));
    }

    #[test]
    fn clear_drops_live_entries() {
        let mut cache = QueryCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at("a".into(), 1, t0);
        cache.insert_at("b".into(), 2, t0);
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get_at("a", t0), None);
    }
}
