mod common;

use std::sync::Arc;

use cadstream::{
    Error, LevelOfDetail, LoaderEvent, LoaderSettings, RequestOutcome, RetryPolicy, SectorCost,
    SectorLoader, SectorState,
};
use common::{MockFetcher, eventually, file_name, key, quad_payload, request};
use tokio::runtime::Handle;

const COST: SectorCost = SectorCost::new(100, 1);

fn settings(max_attempts: u32) -> LoaderSettings {
    LoaderSettings {
        max_concurrent_loads: 50,
        retry: RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
    }
}

fn loader(fetcher: MockFetcher) -> SectorLoader<MockFetcher> {
    SectorLoader::new(fetcher, settings(3), Handle::current())
}

#[tokio::test(flavor = "multi_thread")]
async fn loads_and_decodes_sector() {
    let mut loader = loader(MockFetcher::new().with_sectors([1]));
    let outcome = loader.request(request(1, LevelOfDetail::Detailed), COST, 0);
    assert_eq!(outcome, RequestOutcome::Started);
    assert!(matches!(loader.state(key(1)), SectorState::Loading { .. }));
    assert!(loader.geometry(key(1)).is_none());

    let mut events = Vec::new();
    eventually(
        &mut loader,
        |l| events.extend(l.poll()),
        |l| l.state(key(1)).is_loaded(),
    )
    .await;

    assert!(matches!(
        &events[..],
        [LoaderEvent::Loaded { replaced: None, .. }]
    ));
    let loaded = loader.geometry(key(1)).unwrap();
    assert_eq!(loaded.lod, LevelOfDetail::Detailed);
    assert_eq!(loaded.cost, COST);
    assert!(loaded.geometry.tree_indices().contains(&1));
    assert!(!loader.loading_state().is_loading);
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_requests_are_no_ops() {
    let fetcher = MockFetcher::gated().with_sectors([1]);
    let mut loader = loader(fetcher);
    assert_eq!(
        loader.request(request(1, LevelOfDetail::Detailed), COST, 0),
        RequestOutcome::Started
    );
    assert_eq!(
        loader.request(request(1, LevelOfDetail::Detailed), COST, 0),
        RequestOutcome::AlreadyLoading
    );

    loader.fetcher().release();
    eventually(&mut loader, |l| drop(l.poll()), |l| l.state(key(1)).is_loaded()).await;
    assert_eq!(
        loader.request(request(1, LevelOfDetail::Detailed), COST, 0),
        RequestOutcome::AlreadyLoaded
    );
    assert_eq!(
        loader
            .fetcher()
            .calls(&file_name(1, LevelOfDetail::Detailed)),
        1
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_sector_stays_unloaded_even_if_fetch_succeeds() {
    let mut loader = loader(MockFetcher::gated().with_sectors([1]));
    loader.request(request(1, LevelOfDetail::Detailed), COST, 0);
    assert!(loader.cancel(key(1)));
    assert!(matches!(loader.state(key(1)), SectorState::NotLoaded));

    loader.fetcher().release();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let events = loader.poll();

    assert!(events.is_empty());
    assert!(matches!(loader.state(key(1)), SectorState::NotLoaded));
    assert!(loader.geometry(key(1)).is_none());
    assert!(!loader.cancel(key(1)));
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_result_after_rerequest_is_discarded() {
    let fetcher = MockFetcher::gated().with_sectors([1]);
    let mut loader = loader(fetcher);
    loader.request(request(1, LevelOfDetail::Detailed), COST, 0);
    loader.cancel(key(1));
    loader.request(request(1, LevelOfDetail::Detailed), COST, 0);
    loader.fetcher().release();

    let mut loaded_events = 0;
    eventually(
        &mut loader,
        |l| {
            loaded_events += l
                .poll()
                .iter()
                .filter(|e| matches!(e, LoaderEvent::Loaded { .. }))
                .count();
        },
        |l| l.state(key(1)).is_loaded(),
    )
    .await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    loaded_events += loader.poll().len();
    assert_eq!(loaded_events, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_failures_are_retried() {
    let name = file_name(1, LevelOfDetail::Detailed);
    let mut loader = loader(MockFetcher::new().with_sectors([1]).fail_times(name.clone(), 2));
    loader.request(request(1, LevelOfDetail::Detailed), COST, 0);

    eventually(&mut loader, |l| drop(l.poll()), |l| l.state(key(1)).is_loaded()).await;
    assert_eq!(loader.fetcher().calls(&name), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_fail_until_camera_epoch_changes() {
    let name = file_name(1, LevelOfDetail::Detailed);
    let mut loader = loader(MockFetcher::new().with_sectors([1]).fail_times(name.clone(), 3));
    loader.request(request(1, LevelOfDetail::Detailed), COST, 4);

    let mut events = Vec::new();
    eventually(
        &mut loader,
        |l| events.extend(l.poll()),
        |l| matches!(l.state(key(1)), SectorState::Failed { .. }),
    )
    .await;
    assert_eq!(loader.fetcher().calls(&name), 3);
    assert!(matches!(
        &events[..],
        [LoaderEvent::Failed { error, .. }] if matches!(error.as_ref(), Error::Fetch(_))
    ));

    // Same epoch: no retry storm.
    assert_eq!(
        loader.request(request(1, LevelOfDetail::Detailed), COST, 4),
        RequestOutcome::SkippedFailed
    );
    // New epoch: try again, and this time it works.
    assert_eq!(
        loader.request(request(1, LevelOfDetail::Detailed), COST, 5),
        RequestOutcome::Started
    );
    eventually(&mut loader, |l| drop(l.poll()), |l| l.state(key(1)).is_loaded()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupt_payload_is_a_parse_failure() {
    let name = file_name(1, LevelOfDetail::Detailed);
    let fetcher = MockFetcher::new().with_file(name.clone(), vec![0xff, 0xff, 0xff]);
    let mut loader = SectorLoader::new(fetcher, settings(2), Handle::current());
    loader.request(request(1, LevelOfDetail::Detailed), COST, 0);

    eventually(
        &mut loader,
        |l| drop(l.poll()),
        |l| matches!(l.state(key(1)), SectorState::Failed { .. }),
    )
    .await;
    let SectorState::Failed { error, .. } = loader.state(key(1)) else {
        unreachable!();
    };
    assert!(matches!(error.as_ref(), Error::SectorParse(_)));
    assert_eq!(loader.fetcher().calls(&name), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_sector_does_not_affect_siblings() {
    let bad = file_name(2, LevelOfDetail::Detailed);
    let fetcher = MockFetcher::new()
        .with_sectors([1])
        .with_file(bad.clone(), vec![1, 2, 3]);
    let mut loader = SectorLoader::new(fetcher, settings(1), Handle::current());
    loader.request(request(1, LevelOfDetail::Detailed), COST, 0);
    loader.request(request(2, LevelOfDetail::Detailed), COST, 0);

    eventually(
        &mut loader,
        |l| drop(l.poll()),
        |l| !l.loading_state().is_loading,
    )
    .await;
    assert!(loader.state(key(1)).is_loaded());
    assert!(matches!(loader.state(key(2)), SectorState::Failed { .. }));
    let state = loader.loading_state();
    assert_eq!(state.items_requested, 2);
    assert_eq!(state.items_loaded, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn upgrade_keeps_previous_level_until_replaced() {
    let fetcher = MockFetcher::new()
        .with_file(file_name(1, LevelOfDetail::Simple), quad_payload(1, 11))
        .with_file(file_name(1, LevelOfDetail::Detailed), quad_payload(1, 22));
    let mut loader = loader(fetcher);
    loader.request(request(1, LevelOfDetail::Simple), COST, 0);
    eventually(&mut loader, |l| drop(l.poll()), |l| l.state(key(1)).is_loaded()).await;

    loader.request(request(1, LevelOfDetail::Detailed), COST, 0);
    let fallback = loader.geometry(key(1)).unwrap();
    assert_eq!(fallback.lod, LevelOfDetail::Simple);

    let mut events = Vec::new();
    eventually(
        &mut loader,
        |l| events.extend(l.poll()),
        |l| matches!(l.state(key(1)), SectorState::Loaded { lod: LevelOfDetail::Detailed }),
    )
    .await;
    let [LoaderEvent::Loaded { replaced, geometry, .. }] = &events[..] else {
        panic!("unexpected events {events:?}");
    };
    assert_eq!(replaced.as_ref().unwrap().lod, LevelOfDetail::Simple);
    assert!(geometry.geometry.tree_indices().contains(&22));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_upgrade_restores_previous_level() {
    let fetcher = MockFetcher::new().with_sectors([1]);
    let mut loader = loader(fetcher);
    loader.request(request(1, LevelOfDetail::Simple), COST, 0);
    eventually(&mut loader, |l| drop(l.poll()), |l| l.state(key(1)).is_loaded()).await;
    let simple = Arc::clone(&loader.geometry(key(1)).unwrap().geometry);

    loader.request(request(1, LevelOfDetail::Detailed), COST, 0);
    assert!(loader.cancel(key(1)));
    assert!(matches!(
        loader.state(key(1)),
        SectorState::Loaded {
            lod: LevelOfDetail::Simple
        }
    ));
    assert!(Arc::ptr_eq(&loader.geometry(key(1)).unwrap().geometry, &simple));
}

#[tokio::test(flavor = "multi_thread")]
async fn evict_releases_geometry() {
    let mut loader = loader(MockFetcher::new().with_sectors([1]));
    loader.request(request(1, LevelOfDetail::Detailed), COST, 0);
    eventually(&mut loader, |l| drop(l.poll()), |l| l.state(key(1)).is_loaded()).await;

    let released = loader.evict(key(1)).unwrap();
    assert_eq!(Arc::strong_count(&released.geometry), 1);
    assert!(matches!(loader.state(key(1)), SectorState::NotLoaded));
    assert!(loader.evict(key(1)).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrency_is_bounded() {
    let fetcher = MockFetcher::gated().with_sectors(1..=6);
    let mut loader = SectorLoader::new(
        fetcher,
        LoaderSettings {
            max_concurrent_loads: 2,
            ..settings(1)
        },
        Handle::current(),
    );
    for id in 1..=6 {
        loader.request(request(id, LevelOfDetail::Detailed), COST, 0);
    }
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert_eq!(loader.fetcher().active(), 2);

    loader.fetcher().release();
    eventually(
        &mut loader,
        |l| drop(l.poll()),
        |l| (1..=6).all(|id| l.state(key(id)).is_loaded()),
    )
    .await;
    assert!(loader.fetcher().max_active() <= 2);
    assert_eq!(loader.fetcher().total_calls(), 6);
}
