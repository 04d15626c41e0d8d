mod common;

use std::sync::Arc;

use cadstream::{
    Budget, CameraState, LevelOfDetail, LoaderSettings, ModelId, Plane, RetryPolicy,
    SectorFetcher, SectorState, SectorStreamer, StreamerConfig, StreamerEvent, parse_manifest,
};
use common::{MODEL, MockFetcher, eventually, file_name, key, row_manifest};
use glam::{DMat4, DVec3};
use tokio::runtime::Handle;

fn config() -> StreamerConfig {
    StreamerConfig {
        loader: LoaderSettings {
            max_concurrent_loads: 8,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
        },
        ..StreamerConfig::default()
    }
}

fn streamer(fetcher: MockFetcher) -> SectorStreamer<MockFetcher> {
    let mut streamer = SectorStreamer::new(fetcher, config(), Handle::current()).unwrap();
    streamer.add_model(MODEL, &row_manifest()).unwrap();
    streamer
}

async fn settle<F: SectorFetcher>(streamer: &mut SectorStreamer<F>) {
    eventually(
        streamer,
        |s| {
            s.poll();
        },
        |s| !s.loading_state().is_loading,
    )
    .await;
}

fn looking_back() -> CameraState {
    CameraState::looking_at(DVec3::ZERO, DVec3::Z)
}

fn resident_ids(streamer: &SectorStreamer<MockFetcher>) -> Vec<u64> {
    let mut ids: Vec<u64> = streamer
        .components()
        .sectors_in(cadstream::Layer::Normal)
        .into_iter()
        .filter(|key| key.model == MODEL)
        .map(|key| key.sector.0)
        .collect();
    ids.sort_unstable();
    ids
}

#[tokio::test(flavor = "multi_thread")]
async fn streams_visible_sectors_into_the_scene() {
    let mut streamer = streamer(MockFetcher::new().with_sectors([1, 2, 3, 4]));
    let camera = CameraState::default();

    let summary = streamer.update(&camera);
    assert_eq!(summary.candidates, 4);
    assert_eq!(summary.accepted, 4);
    assert_eq!(summary.started, 4);
    settle(&mut streamer).await;

    assert_eq!(resident_ids(&streamer), vec![1, 2, 3, 4]);
    assert!(!streamer.components().contains(key(9)));
    assert_eq!(streamer.loader().fetcher().calls(&file_name(9, LevelOfDetail::Detailed)), 0);
    // Near-field sectors always come in full detail.
    assert_eq!(streamer.components().lod(key(1)), Some(LevelOfDetail::Detailed));

    // A steady camera requests nothing new.
    let again = streamer.update(&camera);
    assert_eq!(again.started, 0);
    assert_eq!(again.evicted, 0);
    assert_eq!(streamer.loader().fetcher().total_calls(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn shrinking_budget_evicts_lowest_priority_sectors() {
    let mut streamer = streamer(MockFetcher::new().with_sectors([1, 2, 3, 4]));
    let camera = CameraState::default();
    streamer.update(&camera);
    settle(&mut streamer).await;

    streamer.set_budget(Budget {
        geometry_download_size_bytes: 200,
        maximum_draw_calls: None,
    });
    let summary = streamer.update(&camera);
    assert_eq!(summary.accepted, 2);
    assert_eq!(summary.evicted, 2);
    assert_eq!(resident_ids(&streamer), vec![1, 2]);
    assert!(matches!(streamer.state(key(4)), SectorState::NotLoaded));
}

#[tokio::test(flavor = "multi_thread")]
async fn sectors_out_of_view_stay_cached_while_budget_allows() {
    let mut streamer = streamer(MockFetcher::new().with_sectors([1, 2, 3, 4, 9]));
    streamer.update(&CameraState::default());
    settle(&mut streamer).await;

    let summary = streamer.update(&looking_back());
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.evicted, 0);
    settle(&mut streamer).await;
    assert_eq!(resident_ids(&streamer), vec![1, 2, 3, 4, 9]);
}

#[tokio::test(flavor = "multi_thread")]
async fn loads_no_longer_wanted_are_cancelled() {
    let mut streamer = streamer(MockFetcher::gated().with_sectors([1, 2, 3, 4, 9]));
    let events = streamer.subscribe();
    assert_eq!(streamer.update(&CameraState::default()).started, 4);

    let summary = streamer.update(&looking_back());
    assert_eq!(summary.cancelled, 4);
    assert_eq!(summary.started, 1);
    streamer.loader().fetcher().release();
    settle(&mut streamer).await;

    assert_eq!(resident_ids(&streamer), vec![9]);
    for id in 1..=4 {
        assert!(matches!(streamer.state(key(id)), SectorState::NotLoaded));
    }
    let mut cancelled = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            StreamerEvent::SectorCancelled { .. } => cancelled += 1,
            StreamerEvent::SectorLoaded { key: loaded, .. } => assert_eq!(loaded, key(9)),
            _ => {}
        }
    }
    assert_eq!(cancelled, 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn events_report_loads_and_loading_state() {
    let mut streamer = streamer(MockFetcher::new().with_sectors([1, 2, 3, 4]));
    let events = streamer.subscribe();
    streamer.update(&CameraState::default());
    settle(&mut streamer).await;

    let mut loaded = Vec::new();
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            StreamerEvent::SectorLoaded { key, lod } => loaded.push((key.sector.0, lod)),
            StreamerEvent::LoadingStateChanged(state) => states.push(state),
            other => panic!("unexpected event {other:?}"),
        }
    }
    loaded.sort_unstable();
    assert_eq!(
        loaded.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert!(states.first().unwrap().is_loading);
    let last = states.last().unwrap();
    assert!(!last.is_loading);
    assert_eq!(last.items_requested, 4);
    assert_eq!(last.items_loaded, 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_sector_waits_for_camera_movement() {
    // Sector 9 has no payload on the server.
    let mut streamer = streamer(MockFetcher::new().with_sectors([1, 2, 3, 4]));
    let events = streamer.subscribe();
    let camera = looking_back();
    streamer.update(&camera);
    settle(&mut streamer).await;

    let attempts = |s: &SectorStreamer<MockFetcher>| {
        let fetcher = s.loader().fetcher();
        fetcher.calls(&file_name(9, LevelOfDetail::Detailed))
            + fetcher.calls(&file_name(9, LevelOfDetail::Simple))
    };
    assert_eq!(attempts(&streamer), 3);
    assert!(matches!(streamer.state(key(9)), SectorState::Failed { .. }));
    let failed = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, StreamerEvent::SectorFailed { .. }))
        .count();
    assert_eq!(failed, 1);

    let summary = streamer.update(&camera);
    assert_eq!(summary.started, 0);
    settle(&mut streamer).await;
    assert_eq!(attempts(&streamer), 3);

    let moved = CameraState {
        position: DVec3::new(0.0, 0.0, 2.0),
        ..camera
    };
    assert_eq!(streamer.update(&moved).started, 1);
    settle(&mut streamer).await;
    assert_eq!(attempts(&streamer), 6);
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_budget_still_shows_the_most_important_sector() {
    let mut streamer = streamer(MockFetcher::new().with_sectors([1, 2, 3, 4]));
    streamer.set_budget(Budget {
        geometry_download_size_bytes: 0,
        maximum_draw_calls: Some(0),
    });
    let camera = CameraState::default();
    assert_eq!(streamer.update(&camera).accepted, 1);
    settle(&mut streamer).await;
    assert_eq!(resident_ids(&streamer), vec![1]);

    let summary = streamer.update(&camera);
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.evicted, 0);
    assert_eq!(resident_ids(&streamer), vec![1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn clipping_planes_remove_sectors() {
    let mut streamer = streamer(MockFetcher::new().with_sectors([1, 2, 3, 4]));
    streamer.set_clipping_planes(vec![
        Plane::from_point_normal(DVec3::new(0.0, 0.0, -12.0), DVec3::Z).unwrap(),
    ]);
    assert_eq!(streamer.update(&CameraState::default()).accepted, 2);
    settle(&mut streamer).await;
    assert_eq!(resident_ids(&streamer), vec![1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn degenerate_camera_is_ignored() {
    let mut streamer = streamer(MockFetcher::new().with_sectors([1, 2, 3, 4]));
    let camera = CameraState {
        fov_y: 0.0,
        ..CameraState::default()
    };
    let summary = streamer.update(&camera);
    assert_eq!(summary.candidates, 0);
    assert_eq!(summary.started, 0);
    assert_eq!(streamer.loader().fetcher().total_calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn removing_a_model_releases_everything() {
    let mut streamer = streamer(MockFetcher::new().with_sectors([1, 2, 3, 4]));
    streamer.update(&CameraState::default());
    settle(&mut streamer).await;
    assert_eq!(streamer.components().sector_count(), 4);

    assert!(streamer.remove_model(MODEL));
    assert!(!streamer.remove_model(MODEL));
    assert_eq!(streamer.components().sector_count(), 0);
    assert_eq!(streamer.loader().resident().count(), 0);
    assert_eq!(streamer.models().count(), 0);
    assert_eq!(streamer.update(&CameraState::default()).candidates, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn model_placement_moves_sectors_out_of_view() {
    let mut streamer = streamer(MockFetcher::new().with_sectors([1, 2, 3, 4]));
    let other = ModelId::new(200, 3);
    let scene = Arc::new(parse_manifest(&row_manifest()).unwrap());
    streamer.add_model_scene(
        other,
        scene,
        DMat4::from_translation(DVec3::new(5000.0, 0.0, 0.0)),
    )
    .unwrap();

    let candidates = streamer.determine_sectors(&CameraState::default());
    assert_eq!(candidates.len(), 4);
    assert!(candidates.iter().all(|c| c.model == MODEL));
    assert_eq!(candidates[0].sector_id.0, 1);
    assert!(candidates.windows(2).all(|w| w[0].priority >= w[1].priority));

    streamer.set_model_placement(other, DMat4::IDENTITY).unwrap();
    assert_eq!(streamer.determine_sectors(&CameraState::default()).len(), 8);
    assert!(matches!(
        streamer.set_model_placement(ModelId::new(9, 9), DMat4::IDENTITY),
        Err(cadstream::Error::UnknownModel(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn non_finite_placement_is_rejected() {
    let mut streamer = streamer(MockFetcher::new().with_sectors([1, 2, 3, 4]));
    let mut broken = DMat4::IDENTITY;
    broken.x_axis.x = f64::NAN;

    assert!(matches!(
        streamer.set_model_placement(MODEL, broken),
        Err(cadstream::Error::MalformedGeometry(_))
    ));
    assert!(matches!(
        streamer.set_model_placement(MODEL, DMat4::ZERO),
        Err(cadstream::Error::MalformedGeometry(_))
    ));
    assert_eq!(streamer.determine_sectors(&CameraState::default()).len(), 4);

    let other = ModelId::new(200, 3);
    let scene = Arc::new(parse_manifest(&row_manifest()).unwrap());
    let infinite = DMat4::from_translation(DVec3::new(f64::INFINITY, 0.0, 0.0));
    assert!(matches!(
        streamer.add_model_scene(other, scene, infinite),
        Err(cadstream::Error::MalformedGeometry(_))
    ));
    assert_eq!(streamer.models().count(), 1);
}
