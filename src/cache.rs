use moka::sync::Cache;
use std::time::Duration;

pub const REPORT_TTL: Duration = Duration::from_secs(30);

/// Read-through cache for report payloads. Staleness is bounded by the TTL
/// and by explicit invalidation fired from the event bus on every data
/// mutation, whichever comes first. Only successful computations are cached.
#[derive(Clone)]
pub struct ReportCache {
    inner: Cache<String, serde_json::Value>,
}

impl ReportCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder().max_capacity(256).time_to_live(ttl).build(),
        }
    }

    pub fn get_or_compute<E>(
        &self,
        key: String,
        compute: impl FnOnce() -> Result<serde_json::Value, E>,
    ) -> Result<serde_json::Value, E> {
        if let Some(hit) = self.inner.get(&key) {
            tracing::debug!(%key, "report cache hit");
            return Ok(hit);
        }
        let value = compute()?;
        self.inner.insert(key, value.clone());
        Ok(value)
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

impl Default for ReportCache {
    fn default() -> Self {
        Self::new(REPORT_TTL)
    }
}
