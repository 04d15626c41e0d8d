//! Asynchronous sector geometry loading with cooperative cancellation.
//!
//! The loader owns the per-sector state map. Fetch and decode run as tokio
//! tasks; their results come back over an `async_channel` that the owner
//! drains from its own thread with [`SectorLoader::poll`]. Only the owner
//! mutates the state map, so transitions never race.
//!
//! State machine per sector:
//!
//! ```text
//! NotLoaded --request--> Loading --success--> Loaded --evict--> NotLoaded
//!                          |  \--retries exhausted--> Failed
//!                          \--cancel--> NotLoaded (or the previous level)
//! ```
//!
//! Every load carries a generation number. Results whose generation no longer
//! matches the entry (cancelled, superseded) are discarded on arrival.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cadstream_decode::{SectorGeometry, decode_sector};
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};

use crate::config::{LoaderSettings, RetryPolicy};
use crate::culler::LoadedSectors;
use crate::error::{Error, Result};
use crate::fetch::{SectorFetcher, SectorRequest};
use crate::metadata::{LevelOfDetail, ModelId, SectorCost, SectorKey};

/// Shared flag used to stop an in-flight load.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Fails with [`Error::FetchCancelled`] once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::FetchCancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Geometry held by a loaded sector.
#[derive(Debug, Clone)]
pub struct LoadedGeometry {
    pub lod: LevelOfDetail,
    pub geometry: Arc<SectorGeometry>,
    /// Estimated cost from the manifest, used for budgeting.
    pub cost: SectorCost,
}

/// Public view of a sector's load state.
#[derive(Debug, Clone)]
pub enum SectorState {
    NotLoaded,
    Loading { lod: LevelOfDetail },
    Loaded { lod: LevelOfDetail },
    Failed { lod: LevelOfDetail, error: Arc<Error> },
}

impl SectorState {
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }
}

/// Progress counters since the loader was last idle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadingState {
    pub is_loading: bool,
    pub items_requested: usize,
    /// Requests that finished, failed or were cancelled.
    pub items_loaded: usize,
}

/// What [`SectorLoader::request`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Started,
    AlreadyLoaded,
    AlreadyLoading,
    /// The sector failed at this level during the current camera epoch.
    SkippedFailed,
}

/// A change applied by [`SectorLoader::poll`].
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    Loaded {
        key: SectorKey,
        geometry: LoadedGeometry,
        /// Geometry this load replaced (a previous level), now released.
        replaced: Option<LoadedGeometry>,
    },
    Failed {
        key: SectorKey,
        lod: LevelOfDetail,
        error: Arc<Error>,
    },
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    lod: LevelOfDetail,
    cost: SectorCost,
    token: CancelToken,
    fallback: Option<LoadedGeometry>,
}

#[derive(Debug)]
enum Entry {
    Loading(InFlight),
    Loaded(LoadedGeometry),
}

#[derive(Debug)]
struct FailedLoad {
    lod: LevelOfDetail,
    error: Arc<Error>,
    epoch: u64,
}

struct LoadResult {
    key: SectorKey,
    generation: u64,
    outcome: Result<SectorGeometry>,
}

/// Owns sector load states and drives fetch/decode tasks.
pub struct SectorLoader<F: SectorFetcher> {
    fetcher: Arc<F>,
    runtime: Handle,
    semaphore: Arc<Semaphore>,
    retry: RetryPolicy,
    entries: HashMap<SectorKey, Entry>,
    failures: HashMap<SectorKey, FailedLoad>,
    results_tx: async_channel::Sender<LoadResult>,
    results_rx: async_channel::Receiver<LoadResult>,
    next_generation: u64,
    epoch: u64,
    requested: usize,
    settled: usize,
}

impl<F: SectorFetcher> SectorLoader<F> {
    /// Create a loader spawning its tasks on `runtime`.
    pub fn new(fetcher: F, settings: LoaderSettings, runtime: Handle) -> Self {
        Self::with_shared_fetcher(Arc::new(fetcher), settings, runtime)
    }

    pub fn with_shared_fetcher(fetcher: Arc<F>, settings: LoaderSettings, runtime: Handle) -> Self {
        let (results_tx, results_rx) = async_channel::unbounded();
        Self {
            fetcher,
            runtime,
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent_loads.max(1))),
            retry: settings.retry,
            entries: HashMap::new(),
            failures: HashMap::new(),
            results_tx,
            results_rx,
            next_generation: 0,
            epoch: 0,
            requested: 0,
            settled: 0,
        }
    }

    #[must_use]
    pub fn fetcher(&self) -> &Arc<F> {
        &self.fetcher
    }

    fn in_flight_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, Entry::Loading(_)))
            .count()
    }

    /// Start loading `request` unless it is already loaded or loading at the
    /// same level, or failed at that level during camera `epoch`.
    pub fn request(
        &mut self,
        request: SectorRequest,
        cost: SectorCost,
        epoch: u64,
    ) -> RequestOutcome {
        let key = request.key();
        let lod = request.lod;
        self.epoch = epoch;

        if self
            .failures
            .get(&key)
            .is_some_and(|failed| failed.lod == lod && failed.epoch == epoch)
        {
            return RequestOutcome::SkippedFailed;
        }

        let fallback = match self.entries.remove(&key) {
            Some(Entry::Loaded(loaded)) if loaded.lod == lod => {
                self.entries.insert(key, Entry::Loaded(loaded));
                return RequestOutcome::AlreadyLoaded;
            }
            Some(Entry::Loading(in_flight)) if in_flight.lod == lod => {
                self.entries.insert(key, Entry::Loading(in_flight));
                return RequestOutcome::AlreadyLoading;
            }
            Some(Entry::Loaded(loaded)) => Some(loaded),
            Some(Entry::Loading(in_flight)) => {
                tracing::trace!("Sector {} switching from {} to {}", key, in_flight.lod, lod);
                in_flight.token.cancel();
                self.settled += 1;
                in_flight.fallback
            }
            None => None,
        };
        self.failures.remove(&key);

        if self.in_flight_count() == 0 {
            self.requested = 0;
            self.settled = 0;
        }
        self.requested += 1;

        let generation = self.next_generation;
        self.next_generation += 1;
        let token = CancelToken::new();
        self.entries.insert(
            key,
            Entry::Loading(InFlight {
                generation,
                lod,
                cost,
                token: token.clone(),
                fallback,
            }),
        );
        tracing::trace!("Sector {} NotLoaded -> Loading ({})", key, lod);

        let fetcher = Arc::clone(&self.fetcher);
        let semaphore = Arc::clone(&self.semaphore);
        let retry = self.retry;
        let tx = self.results_tx.clone();
        self.runtime.spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => Err(Error::FetchCancelled),
                result = load_with_retry(fetcher.as_ref(), &semaphore, &request, retry, &token) => result,
            };
            let _ = tx
                .send(LoadResult {
                    key,
                    generation,
                    outcome,
                })
                .await;
        });

        RequestOutcome::Started
    }

    /// Cancel an in-flight load. The sector reverts to `NotLoaded`, or to the
    /// level it had before the load started. Returns whether a load was
    /// cancelled.
    pub fn cancel(&mut self, key: SectorKey) -> bool {
        let Some(Entry::Loading(in_flight)) = self.entries.remove(&key) else {
            return false;
        };
        in_flight.token.cancel();
        self.settled += 1;
        if let Some(fallback) = in_flight.fallback {
            self.entries.insert(key, Entry::Loaded(fallback));
        }
        tracing::debug!("Cancelled {} load of sector {}", in_flight.lod, key);
        true
    }

    /// Release a sector's geometry. An in-flight load is cancelled.
    pub fn evict(&mut self, key: SectorKey) -> Option<LoadedGeometry> {
        match self.entries.remove(&key)? {
            Entry::Loaded(loaded) => {
                tracing::trace!("Sector {} Loaded -> NotLoaded", key);
                Some(loaded)
            }
            Entry::Loading(in_flight) => {
                in_flight.token.cancel();
                self.settled += 1;
                in_flight.fallback
            }
        }
    }

    /// Cancel and release everything belonging to `model`. Returns the keys
    /// whose geometry was released.
    pub fn remove_model(&mut self, model: ModelId) -> Vec<SectorKey> {
        let keys: Vec<SectorKey> = self
            .entries
            .keys()
            .filter(|key| key.model == model)
            .copied()
            .collect();
        let released = keys
            .into_iter()
            .filter(|key| self.evict(*key).is_some())
            .collect();
        self.failures.retain(|key, _| key.model != model);
        released
    }

    /// Set the camera epoch that new failures are attributed to.
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    /// Apply finished loads. Call from the thread that owns the loader.
    pub fn poll(&mut self) -> Vec<LoaderEvent> {
        let mut events = Vec::new();
        while let Ok(result) = self.results_rx.try_recv() {
            let current = matches!(
                self.entries.get(&result.key),
                Some(Entry::Loading(in_flight)) if in_flight.generation == result.generation
            );
            if !current {
                tracing::trace!("Discarding stale result for sector {}", result.key);
                continue;
            }
            let Some(Entry::Loading(in_flight)) = self.entries.remove(&result.key) else {
                continue;
            };
            self.settled += 1;

            match result.outcome {
                Ok(geometry) => {
                    let loaded = LoadedGeometry {
                        lod: in_flight.lod,
                        geometry: Arc::new(geometry),
                        cost: in_flight.cost,
                    };
                    tracing::trace!("Sector {} Loading -> Loaded ({})", result.key, loaded.lod);
                    self.entries
                        .insert(result.key, Entry::Loaded(loaded.clone()));
                    events.push(LoaderEvent::Loaded {
                        key: result.key,
                        geometry: loaded,
                        replaced: in_flight.fallback,
                    });
                }
                Err(Error::FetchCancelled) => {
                    if let Some(fallback) = in_flight.fallback {
                        self.entries.insert(result.key, Entry::Loaded(fallback));
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        "Sector {} failed to load at {}: {}",
                        result.key,
                        in_flight.lod,
                        error
                    );
                    let error = Arc::new(error);
                    if let Some(fallback) = in_flight.fallback {
                        self.entries.insert(result.key, Entry::Loaded(fallback));
                    }
                    self.failures.insert(
                        result.key,
                        FailedLoad {
                            lod: in_flight.lod,
                            error: Arc::clone(&error),
                            epoch: self.epoch,
                        },
                    );
                    events.push(LoaderEvent::Failed {
                        key: result.key,
                        lod: in_flight.lod,
                        error,
                    });
                }
            }
        }
        events
    }

    #[must_use]
    pub fn state(&self, key: SectorKey) -> SectorState {
        match self.entries.get(&key) {
            Some(Entry::Loading(in_flight)) => SectorState::Loading { lod: in_flight.lod },
            Some(Entry::Loaded(loaded)) => SectorState::Loaded { lod: loaded.lod },
            None => match self.failures.get(&key) {
                Some(failed) => SectorState::Failed {
                    lod: failed.lod,
                    error: Arc::clone(&failed.error),
                },
                None => SectorState::NotLoaded,
            },
        }
    }

    /// Renderable geometry of a sector, including a previous level kept while
    /// a new one loads.
    #[must_use]
    pub fn geometry(&self, key: SectorKey) -> Option<&LoadedGeometry> {
        match self.entries.get(&key)? {
            Entry::Loaded(loaded) => Some(loaded),
            Entry::Loading(in_flight) => in_flight.fallback.as_ref(),
        }
    }

    /// All sectors holding geometry.
    pub fn resident(&self) -> impl Iterator<Item = (SectorKey, &LoadedGeometry)> {
        self.entries
            .keys()
            .filter_map(|key| self.geometry(*key).map(|geometry| (*key, geometry)))
    }

    /// In-flight loads and their target level.
    pub fn in_flight(&self) -> impl Iterator<Item = (SectorKey, LevelOfDetail)> {
        self.entries.iter().filter_map(|(key, entry)| match entry {
            Entry::Loading(in_flight) => Some((*key, in_flight.lod)),
            Entry::Loaded(_) => None,
        })
    }

    #[must_use]
    pub fn loading_state(&self) -> LoadingState {
        LoadingState {
            is_loading: self.in_flight_count() > 0,
            items_requested: self.requested,
            items_loaded: self.settled.min(self.requested),
        }
    }
}

impl<F: SectorFetcher> LoadedSectors for SectorLoader<F> {
    fn loaded_lod(&self, key: SectorKey) -> Option<LevelOfDetail> {
        self.geometry(key).map(|loaded| loaded.lod)
    }
}

/// Fetch and decode with exponential backoff on retryable errors.
async fn load_with_retry<F: SectorFetcher>(
    fetcher: &F,
    semaphore: &Semaphore,
    request: &SectorRequest,
    retry: RetryPolicy,
    token: &CancelToken,
) -> Result<SectorGeometry> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match load_once(fetcher, semaphore, request, token).await {
            Ok(geometry) => return Ok(geometry),
            Err(error) if error.is_retryable() && attempt < retry.max_attempts => {
                let delay = retry.delay(attempt);
                tracing::warn!(
                    "Loading sector {} failed (attempt {}/{}), retrying in {:?}: {}",
                    request.key(),
                    attempt,
                    retry.max_attempts,
                    delay,
                    error
                );
                tokio::time::sleep(delay).await;
                token.check()?;
            }
            Err(error) => return Err(error),
        }
    }
}

async fn load_once<F: SectorFetcher>(
    fetcher: &F,
    semaphore: &Semaphore,
    request: &SectorRequest,
    token: &CancelToken,
) -> Result<SectorGeometry> {
    let bytes = {
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|_| Error::FetchCancelled)?;
        token.check()?;
        fetcher.fetch(request).await?
    };
    token.check()?;
    let geometry = tokio::task::spawn_blocking(move || decode_sector(&bytes))
        .await
        .map_err(|e| Error::Fetch(format!("decode task failed: {e}")))??;
    token.check()?;
    Ok(geometry)
}
