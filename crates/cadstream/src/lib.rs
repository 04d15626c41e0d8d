//! Budget-driven sector streaming for large CAD models.
//!
//! A CAD model is split into a spatial tree of sectors, each available at a
//! simple (quads) and a detailed level. This crate decides which sectors to
//! keep resident for the current camera and streams them in:
//!
//! - [`manifest`] parses the versioned JSON manifest into a [`SectorScene`]
//! - [`culler`] picks and prioritizes visible sectors
//! - [`budget`] trims the wish list to the memory and draw-call budget
//! - [`loader`] fetches and decodes sectors on tokio tasks, cancellably
//! - [`composition`] holds loaded geometry for styled rendering
//! - [`streamer`] ties the above together, once per frame
//!
//! # Example
//!
//! ```no_run
//! use cadstream::{CameraState, FileFetcher, ModelId, SectorStreamer, StreamerConfig};
//!
//! # async fn example() -> cadstream::Result<()> {
//! let fetcher = FileFetcher::new("models");
//! let model = ModelId::new(1, 1);
//! let manifest = fetcher.fetch_manifest(model).await?;
//!
//! let mut streamer = SectorStreamer::new(
//!     fetcher,
//!     StreamerConfig::from_env()?,
//!     tokio::runtime::Handle::current(),
//! )?;
//! streamer.add_model(model, &manifest)?;
//!
//! // Once per frame:
//! streamer.update(&CameraState::default());
//! streamer.poll();
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod camera;
pub mod composition;
pub mod config;
pub mod coords;
pub mod culler;
mod error;
pub mod events;
pub mod fetch;
pub mod loader;
pub mod manifest;
pub mod metadata;
pub mod streamer;

pub use budget::{Budget, BudgetDecision, BudgetSpent, CadBudget, ResidentSector};
pub use camera::{CameraState, Frustum, Plane};
pub use composition::{CustomObject, Layer, RenderStyle, SceneComponentsProvider};
pub use config::{CameraChangeThresholds, LoaderSettings, RetryPolicy, StreamerConfig};
pub use coords::{
    Aabb, CDF_TO_VIEWER, CdfBox, ModelTransform, TransformedPoints, VIEWER_TO_CDF, to_render_box,
};
pub use culler::{
    CandidateSector, CullerSettings, DetermineSectorsInput, FrustumSectorCuller, LoadedSectors,
    SectorCuller,
};
pub use error::{Error, Result, UnsupportedVersion};
pub use events::{EventBus, StreamerEvent};
pub use fetch::{
    Cache, FileFetcher, HttpFetcher, MemoryCache, NoCache, SectorFetcher, SectorRequest,
};
pub use loader::{
    CancelToken, LoadedGeometry, LoaderEvent, LoadingState, RequestOutcome, SectorLoader,
    SectorState,
};
pub use manifest::{parse_manifest, parse_manifest_str};
pub use metadata::{
    DetailLevel, LevelOfDetail, ModelId, SectorCost, SectorId, SectorKey, SectorMetadata,
    SectorScene,
};
pub use streamer::{CameraEpoch, SectorStreamer, UpdateSummary};

pub use cadstream_decode as decode;
pub use cadstream_proto as proto;
pub use cadstream_decode::SectorGeometry;
