//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cadstream::decode::Quad;
use cadstream::decode::pack::{encode_payload, pack_quads};
use cadstream::proto::sector_payload::Body;
use cadstream::{
    Error, LevelOfDetail, ModelId, Result, SectorFetcher, SectorId, SectorKey, SectorRequest,
};
use glam::Vec3;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

pub const MODEL: ModelId = ModelId::new(100, 1);

pub fn key(id: u64) -> SectorKey {
    SectorKey::new(MODEL, SectorId(id))
}

/// A valid quads payload whose quads carry `tree_index`.
pub fn quad_payload(sector_id: u32, tree_index: u32) -> Vec<u8> {
    let quad = Quad {
        center: Vec3::ZERO,
        normal: Vec3::Y,
        size: 1.0,
        color: [200, 200, 200, 255],
        tree_index,
    };
    encode_payload(sector_id, Body::Quads(pack_quads(&[quad])))
}

pub fn request(id: u64, lod: LevelOfDetail) -> SectorRequest {
    SectorRequest {
        model: MODEL,
        sector_id: SectorId(id),
        lod,
        file_name: file_name(id, lod),
    }
}

pub fn file_name(id: u64, lod: LevelOfDetail) -> String {
    match lod {
        LevelOfDetail::Simple => format!("{id}.faces"),
        LevelOfDetail::Detailed => format!("{id}.bin"),
    }
}

/// In-memory fetcher with scripted failures, an optional gate and counters.
#[derive(Default)]
pub struct MockFetcher {
    files: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<HashMap<String, u32>>,
    gate: Option<Semaphore>,
    calls: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches block until [`release`](Self::release) is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn with_file(self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.files.lock().unwrap().insert(name.into(), bytes);
        self
    }

    /// Serve quad payloads for both levels of every id.
    pub fn with_sectors(self, ids: impl IntoIterator<Item = u64>) -> Self {
        let mut this = self;
        for id in ids {
            #[allow(clippy::cast_possible_truncation)]
            let payload = quad_payload(id as u32, id as u32);
            this = this
                .with_file(file_name(id, LevelOfDetail::Simple), payload.clone())
                .with_file(file_name(id, LevelOfDetail::Detailed), payload);
        }
        this
    }

    /// Fail the next `count` fetches of `name`.
    pub fn fail_times(self, name: impl Into<String>, count: u32) -> Self {
        self.failures.lock().unwrap().insert(name.into(), count);
        self
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl SectorFetcher for MockFetcher {
    async fn fetch(&self, request: &SectorRequest) -> Result<Vec<u8>> {
        let name = request.file_name.clone();
        *self.calls.lock().unwrap().entry(name.clone()).or_default() += 1;
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&name).filter(|r| **r > 0) {
                *remaining -= 1;
                return Err(Error::Fetch(format!("scripted failure for {name}")));
            }
        }
        self.files
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .ok_or_else(|| Error::Fetch(format!("{name} not found")))
    }
}

/// Poll `step` until `done` holds, failing after a few seconds.
pub async fn eventually<S>(state: &mut S, mut step: impl FnMut(&mut S), done: impl Fn(&S) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        step(state);
        if done(state) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Manifest sector with both levels. Bounds are given in viewer space.
pub fn sector(id: u64, parent: i64, depth: u32, min: [f64; 3], max: [f64; 3], bytes: u64) -> Value {
    json!({
        "id": id,
        "parentId": parent,
        "path": format!("{id}/"),
        "depth": depth,
        "boundingBox": {
            "min": { "x": min[0], "y": -max[2], "z": min[1] },
            "max": { "x": max[0], "y": -min[2], "z": max[1] },
        },
        "estimatedDrawCallCount": 1,
        "sectorFileName": file_name(id, LevelOfDetail::Detailed),
        "downloadSize": bytes,
        "facesFile": {
            "fileName": file_name(id, LevelOfDetail::Simple),
            "downloadSize": bytes / 10,
        },
    })
}

/// Root box around the origin with small children at increasing depth along
/// -Z (in front of the default camera) and one behind the camera.
///
/// Child `i` (1..=4) sits at z = -5i, 100 bytes detailed. Child 9 is behind.
pub fn row_manifest() -> Value {
    let mut sectors = vec![json!({
        "id": 0,
        "parentId": -1,
        "depth": 0,
        "boundingBox": {
            "min": { "x": -50.0, "y": -50.0, "z": -50.0 },
            "max": { "x": 50.0, "y": 50.0, "z": 50.0 },
        },
    })];
    for i in 1..=4u64 {
        #[allow(clippy::cast_precision_loss)]
        let z = -5.0 * i as f64;
        sectors.push(sector(i, 0, 1, [-1.0, -1.0, z - 0.5], [1.0, 1.0, z + 0.5], 100));
    }
    sectors.push(sector(9, 0, 1, [-1.0, -1.0, 20.0], [1.0, 1.0, 21.0], 100));
    json!({ "version": 9, "maxTreeIndex": 10, "sectors": sectors })
}
