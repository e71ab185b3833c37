use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::cache::ReportCache;
use crate::clock::Clock;
use crate::events::EventBus;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub clock: Box<dyn Clock>,
    pub reports: ReportCache,
    pub bus: EventBus,
}

impl AppState {
    /// Wires the report cache to the event bus: any data-change event drops
    /// every cached report, so the TTL only bounds staleness the bus cannot
    /// see (nothing in-process mutates the database behind the bus).
    pub fn new(clock: Box<dyn Clock>) -> Self {
        let reports = ReportCache::default();
        let mut bus = EventBus::new();
        let cache = reports.clone();
        bus.subscribe(move |_kind| cache.invalidate_all());
        Self {
            workspace: None,
            db: None,
            clock,
            reports,
            bus,
        }
    }
}
