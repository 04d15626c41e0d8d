//! Per-frame orchestration of culling, budgeting, loading and composition.
//!
//! [`SectorStreamer`] is the viewer-owned state of the streaming core. Each
//! frame the host calls [`update`](SectorStreamer::update) with the camera and
//! [`poll`](SectorStreamer::poll) to pick up finished loads:
//!
//! 1. Every model is culled against the camera
//! 2. The merged candidate list is filtered by the budget
//! 3. Dropped in-flight loads are cancelled, evicted sectors released
//! 4. Accepted sectors are requested from the loader
//!
//! Both calls are synchronous; network and decode work happens on tokio tasks.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use glam::DMat4;
use serde_json::Value;
use tokio::runtime::Handle;

use crate::budget::{Budget, CadBudget, ResidentSector};
use crate::camera::{CameraState, Plane};
use crate::composition::SceneComponentsProvider;
use crate::config::{CameraChangeThresholds, StreamerConfig};
use crate::coords::ModelTransform;
use crate::culler::{
    CandidateSector, DetermineSectorsInput, FrustumSectorCuller, SectorCuller, sort_candidates,
};
use crate::error::{Error, Result};
use crate::events::{EventBus, StreamerEvent};
use crate::fetch::{SectorFetcher, SectorRequest};
use crate::loader::{LoaderEvent, LoadingState, RequestOutcome, SectorLoader, SectorState};
use crate::manifest::parse_manifest;
use crate::metadata::{ModelId, SectorKey, SectorScene};

/// Counts the camera moves that are large enough to matter.
///
/// Sectors that failed to load are not retried until the epoch changes.
#[derive(Debug, Clone)]
pub struct CameraEpoch {
    thresholds: CameraChangeThresholds,
    last: Option<CameraState>,
    epoch: u64,
}

impl CameraEpoch {
    #[must_use]
    pub fn new(thresholds: CameraChangeThresholds) -> Self {
        Self {
            thresholds,
            last: None,
            epoch: 0,
        }
    }

    #[must_use]
    pub fn current(&self) -> u64 {
        self.epoch
    }

    /// Record a camera snapshot and return the (possibly advanced) epoch.
    pub fn observe(&mut self, camera: &CameraState) -> u64 {
        let Some(last) = &self.last else {
            self.last = Some(*camera);
            return self.epoch;
        };
        let moved = last.position.distance(camera.position) > self.thresholds.distance;
        let turned = last
            .rotation
            .normalize()
            .angle_between(camera.rotation.normalize())
            .to_degrees()
            > self.thresholds.angle;
        if moved || turned {
            self.epoch += 1;
            self.last = Some(*camera);
        }
        self.epoch
    }
}

/// What one [`SectorStreamer::update`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub epoch: u64,
    pub candidates: usize,
    pub accepted: usize,
    pub started: usize,
    pub cancelled: usize,
    pub evicted: usize,
}

struct ModelEntry {
    scene: Arc<SectorScene>,
    placement: DMat4,
}

/// Viewer-owned streaming state for any number of models.
pub struct SectorStreamer<F: SectorFetcher> {
    config: StreamerConfig,
    models: BTreeMap<ModelId, ModelEntry>,
    culler: Box<dyn SectorCuller>,
    budget: CadBudget,
    loader: SectorLoader<F>,
    components: SceneComponentsProvider,
    events: EventBus,
    clipping_planes: Vec<Plane>,
    epoch: CameraEpoch,
    loading_state: LoadingState,
}

impl<F: SectorFetcher> SectorStreamer<F> {
    /// Create a streamer that spawns loads on `runtime`.
    pub fn new(fetcher: F, config: StreamerConfig, runtime: Handle) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            models: BTreeMap::new(),
            culler: Box::new(FrustumSectorCuller::new(config.culler)),
            budget: CadBudget::new(config.budget),
            loader: SectorLoader::new(fetcher, config.loader, runtime),
            components: SceneComponentsProvider::new(),
            events: EventBus::new(),
            clipping_planes: Vec::new(),
            epoch: CameraEpoch::new(config.camera_change),
            loading_state: LoadingState::default(),
        })
    }

    /// Replace the culling strategy.
    #[must_use]
    pub fn with_culler(mut self, culler: Box<dyn SectorCuller>) -> Self {
        self.culler = culler;
        self
    }

    #[must_use]
    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    /// Parse a manifest and start streaming the model.
    pub fn add_model(&mut self, model: ModelId, manifest: &Value) -> Result<Arc<SectorScene>> {
        let scene = Arc::new(parse_manifest(manifest)?);
        self.add_model_scene(model, Arc::clone(&scene), DMat4::IDENTITY)?;
        Ok(scene)
    }

    /// Stream an already parsed scene, placed in the viewer by `placement`.
    pub fn add_model_scene(
        &mut self,
        model: ModelId,
        scene: Arc<SectorScene>,
        placement: DMat4,
    ) -> Result<()> {
        ModelTransform::new(placement)?;
        if self.models.contains_key(&model) {
            self.remove_model(model);
        }
        tracing::info!(
            "Added model {}: {} sectors, max depth {}",
            model,
            scene.len(),
            scene.max_depth()
        );
        self.models.insert(model, ModelEntry { scene, placement });
        Ok(())
    }

    /// Stop streaming a model, cancelling its loads and releasing its geometry.
    pub fn remove_model(&mut self, model: ModelId) -> bool {
        if self.models.remove(&model).is_none() {
            return false;
        }
        for key in self.loader.remove_model(model) {
            self.events.publish(&StreamerEvent::SectorEvicted { key });
        }
        self.components.remove_model(model);
        tracing::info!("Removed model {}", model);
        true
    }

    /// Move a model in the viewer. Takes effect on the next update.
    pub fn set_model_placement(&mut self, model: ModelId, placement: DMat4) -> Result<()> {
        let entry = self.models.get_mut(&model).ok_or(Error::UnknownModel(model))?;
        ModelTransform::new(placement)?;
        entry.placement = placement;
        Ok(())
    }

    #[must_use]
    pub fn scene(&self, model: ModelId) -> Option<&Arc<SectorScene>> {
        self.models.get(&model).map(|entry| &entry.scene)
    }

    pub fn models(&self) -> impl Iterator<Item = ModelId> + '_ {
        self.models.keys().copied()
    }

    #[must_use]
    pub fn budget(&self) -> Budget {
        self.budget.budget()
    }

    /// Takes effect on the next update.
    pub fn set_budget(&mut self, budget: Budget) {
        self.budget.set_budget(budget);
    }

    pub fn set_clipping_planes(&mut self, planes: Vec<Plane>) {
        self.clipping_planes = planes;
    }

    #[must_use]
    pub fn clipping_planes(&self) -> &[Plane] {
        &self.clipping_planes
    }

    /// Subscribe to streamer events.
    pub fn subscribe(&mut self) -> async_channel::Receiver<StreamerEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn components(&self) -> &SceneComponentsProvider {
        &self.components
    }

    /// Mutable access for styling and custom objects.
    pub fn components_mut(&mut self) -> &mut SceneComponentsProvider {
        &mut self.components
    }

    #[must_use]
    pub fn loader(&self) -> &SectorLoader<F> {
        &self.loader
    }

    #[must_use]
    pub fn state(&self, key: SectorKey) -> SectorState {
        self.loader.state(key)
    }

    #[must_use]
    pub fn loading_state(&self) -> LoadingState {
        self.loader.loading_state()
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.current()
    }

    /// Cull every model and merge the results into one ordered list.
    #[must_use]
    pub fn determine_sectors(&self, camera: &CameraState) -> Vec<CandidateSector> {
        let mut candidates = Vec::new();
        for (&model, entry) in &self.models {
            candidates.extend(self.culler.determine_sectors(&DetermineSectorsInput {
                camera,
                scene: &entry.scene,
                model,
                model_matrix: entry.placement,
                loaded: &self.loader,
                clipping_planes: &self.clipping_planes,
            }));
        }
        sort_candidates(&mut candidates);
        candidates
    }

    /// Run one cull, budget and request pass for `camera`.
    pub fn update(&mut self, camera: &CameraState) -> UpdateSummary {
        if !camera.is_valid() {
            tracing::debug!("Skipping update for degenerate camera");
            return UpdateSummary {
                epoch: self.epoch.current(),
                ..UpdateSummary::default()
            };
        }
        let epoch = self.epoch.observe(camera);
        self.loader.set_epoch(epoch);

        let candidates = self.determine_sectors(camera);
        let resident: Vec<ResidentSector> = self
            .loader
            .resident()
            .map(|(key, loaded)| ResidentSector {
                key,
                lod: loaded.lod,
                cost: loaded.cost,
            })
            .collect();
        let decision = self.budget.filter(&candidates, &resident);

        let mut summary = UpdateSummary {
            epoch,
            candidates: candidates.len(),
            accepted: decision.accepted.len(),
            ..UpdateSummary::default()
        };

        let accepted: HashSet<SectorKey> = decision.accepted.iter().map(CandidateSector::key).collect();
        let stale: Vec<SectorKey> = self
            .loader
            .in_flight()
            .filter(|(key, _)| !accepted.contains(key))
            .map(|(key, _)| key)
            .collect();
        for key in stale {
            if self.loader.cancel(key) {
                summary.cancelled += 1;
                self.events.publish(&StreamerEvent::SectorCancelled { key });
            }
        }

        for key in decision.evict {
            if self.loader.evict(key).is_some() {
                self.components.remove_sector(key);
                summary.evicted += 1;
                self.events.publish(&StreamerEvent::SectorEvicted { key });
            }
        }

        for candidate in &decision.accepted {
            match self.sector_request(candidate) {
                Ok(request) => {
                    if self.loader.request(request, candidate.cost, epoch) == RequestOutcome::Started {
                        summary.started += 1;
                    }
                }
                Err(error) => tracing::warn!("Cannot request sector {}: {}", candidate.key(), error),
            }
        }

        self.publish_loading_state();
        tracing::debug!(
            "Update epoch {}: {} candidates, {} accepted, {} started, {} cancelled, {} evicted",
            summary.epoch,
            summary.candidates,
            summary.accepted,
            summary.started,
            summary.cancelled,
            summary.evicted
        );
        summary
    }

    fn sector_request(&self, candidate: &CandidateSector) -> Result<SectorRequest> {
        let key = candidate.key();
        let level = self
            .models
            .get(&candidate.model)
            .and_then(|entry| entry.scene.get(candidate.sector_id))
            .and_then(|sector| sector.detail_level(candidate.lod))
            .ok_or(Error::UnknownSector(key))?;
        Ok(SectorRequest {
            model: candidate.model,
            sector_id: candidate.sector_id,
            lod: candidate.lod,
            file_name: level.file_name.clone(),
        })
    }

    /// Hand finished loads to scene composition. Returns how many loads
    /// settled.
    pub fn poll(&mut self) -> usize {
        let events = self.loader.poll();
        let settled = events.len();
        for event in events {
            match event {
                LoaderEvent::Loaded { key, geometry, .. } => {
                    if !self.models.contains_key(&key.model) {
                        continue;
                    }
                    self.components
                        .add_sector(key, geometry.lod, Arc::clone(&geometry.geometry));
                    self.events.publish(&StreamerEvent::SectorLoaded {
                        key,
                        lod: geometry.lod,
                    });
                }
                LoaderEvent::Failed { key, lod, error } => {
                    self.events
                        .publish(&StreamerEvent::SectorFailed { key, lod, error });
                }
            }
        }
        self.publish_loading_state();
        settled
    }

    fn publish_loading_state(&mut self) {
        let state = self.loader.loading_state();
        if state != self.loading_state {
            self.loading_state = state;
            self.events
                .publish(&StreamerEvent::LoadingStateChanged(state));
        }
    }
}
