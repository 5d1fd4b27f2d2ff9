//! Shared helpers for skyalert-gcn integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use skyalert_gcn::error::{GcnError, GcnResult};
use skyalert_gcn::ingest::Ingestor;
use skyalert_gcn::localization::{from_cone, MultiOrderMap, SkymapFetcher};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Center of every map served by [`FakeFetcher`]
pub const FAKE_MAP_CENTER: (f64, f64) = (120.0, -30.0);

/// Single-connection in-memory database with the full schema
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    skyalert_common::db::create_schema(&pool)
        .await
        .expect("Failed to create schema");
    pool
}

pub fn fixture(name: &str) -> Vec<u8> {
    let path: PathBuf = [env!("CARGO_MANIFEST_DIR"), "tests", "fixtures", name].iter().collect();
    std::fs::read(&path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
}

/// Serves an analytic map instead of downloading; records requested URLs
#[derive(Default)]
pub struct FakeFetcher {
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
    fail: bool,
}

impl FakeFetcher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SkymapFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> GcnResult<MultiOrderMap> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        if self.fail {
            return Err(GcnError::SkymapFetch(format!("{}: HTTP 503", url)));
        }
        let (ra, dec) = FAKE_MAP_CENTER;
        Ok(from_cone(ra, dec, 5.0)?.map)
    }
}

pub async fn ingestor(fetcher: Arc<FakeFetcher>) -> (Ingestor, SqlitePool) {
    let pool = memory_pool().await;
    (Ingestor::new(pool.clone(), fetcher), pool)
}
