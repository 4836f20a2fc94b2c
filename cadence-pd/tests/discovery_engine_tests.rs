//! Discovery engine integration tests against an in-memory store

mod helpers;

use cadence_common::db::SqliteStore;
use cadence_common::models::{ChannelId, DiscoverySource, NewSong, ParticipantId, PreferenceCategory, Reaction};
use cadence_common::store::{PlaybackStore, PreferenceStore, Store};
use cadence_common::RetryPolicy;
use cadence_pd::engine::{DiscoveryProviders, DiscoveryRequest};
use cadence_pd::pools::{CandidatePool, LibraryPool, PoolContext};
use cadence_pd::providers::{ArtistInfo, PlaylistRef, TrackInfo};
use cadence_pd::{DiscoveryEngine, SourceWeights};
use helpers::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

const CHANNEL: ChannelId = ChannelId(100);
const ALICE: ParticipantId = ParticipantId(1);
const BOB: ParticipantId = ParticipantId(2);

struct Fixture {
    store: Arc<SqliteStore>,
    engine: DiscoveryEngine,
}

/// Every pool has something distinct to offer
async fn fully_stocked() -> Fixture {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());

    let played = like_song(&store, ALICE, "liked-played", "Seed Artist").await;
    like_song(&store, ALICE, "liked-fresh", "Seed Artist").await;
    let session = store.create_session(CHANNEL).await.unwrap();
    log_play(&store, CHANNEL, session, &played).await;

    store
        .update_preference(ALICE, PreferenceCategory::Artist, "favourite band", 0.9)
        .await
        .unwrap();
    store
        .update_preference(ALICE, PreferenceCategory::Genre, "pop", 0.8)
        .await
        .unwrap();

    let metadata = ScriptedMetadata {
        related: vec![
            track("related-1", "Other Artist"),
            track("related-2", "Other Artist"),
            track("same-artist", "seed artist"),
        ],
        playlists: vec![PlaylistRef {
            id: "chart-playlist".to_string(),
            title: "Top 100".to_string(),
        }],
        playlist_tracks: vec![track("chart-1", "Chart Star")],
        ..ScriptedMetadata::default()
    };
    let catalog = ScriptedCatalog {
        artist: Some(ArtistInfo {
            id: "artist-1".to_string(),
            name: "Favourite Band".to_string(),
            genres: vec!["rock".to_string()],
            popularity: Some(0.6),
        }),
        tracks: vec![
            TrackInfo {
                title: "Big Hit".to_string(),
                artist: "Favourite Band".to_string(),
                ..TrackInfo::default()
            },
            TrackInfo {
                title: "Unplayable B-Side".to_string(),
                artist: "Favourite Band".to_string(),
                ..TrackInfo::default()
            },
        ],
        fail: false,
    };
    let normalizer = ScriptedNormalizer {
        resolutions: HashMap::from([("Big Hit".to_string(), "artist-hit".to_string())]),
    };

    let dyn_store: Arc<dyn Store> = store.clone();
    let engine = DiscoveryEngine::new(
        dyn_store,
        DiscoveryProviders {
            metadata: Arc::new(metadata),
            catalog: Arc::new(catalog),
            normalizer: Arc::new(normalizer),
        },
        fast_config(),
        RetryPolicy::none(),
    );

    Fixture { store, engine }
}

#[tokio::test]
async fn test_single_participant_gets_exactly_one_fresh_pick() {
    let fixture = fully_stocked().await;
    let cooldown = fixture
        .engine
        .cooldown_set(CHANNEL, Duration::from_secs(7200))
        .await;
    assert!(cooldown.contains("liked-played"));

    let request = DiscoveryRequest::new(CHANNEL, vec![ALICE], Duration::from_secs(7200))
        .excluding(vec!["related-2".to_string()]);
    let song = fixture.engine.select(request).await.expect("a pick");

    let allowed: HashSet<&str> = ["liked-fresh", "related-1", "artist-hit", "chart-1"].into();
    assert!(allowed.contains(song.content_id.as_str()), "unexpected pick {}", song.content_id);
    assert!(!cooldown.contains(&song.content_id));
    assert_eq!(song.for_user, ALICE);
    assert!(!song.reason.is_empty());

    // a lone participant keeps the turn after it advances
    assert_eq!(fixture.engine.turn_position(CHANNEL), Some(0));
    assert_eq!(fixture.engine.current_turn(CHANNEL), Some(ALICE));
}

#[tokio::test]
async fn test_picks_never_repeat_cooldown_or_unresolvable_tracks() {
    let fixture = fully_stocked().await;
    for _ in 0..40 {
        let song = fixture
            .engine
            .get_next_song(CHANNEL, &[ALICE], None, 7200)
            .await
            .expect("a pick");
        assert_ne!(song.content_id, "liked-played");
        assert_ne!(song.content_id, "same-artist");
        assert_ne!(song.content_id, "");
        match song.source {
            DiscoverySource::Artist => {
                assert_eq!(song.content_id, "artist-hit");
                assert_eq!(song.reason, "From an artist you enjoy: Favourite Band");
            }
            DiscoverySource::Similar => assert!(song.reason.starts_with("Similar to ")),
            DiscoverySource::Wildcard => assert!(
                song.reason == "Popular in US charts" || song.reason == "Popular in UK charts",
                "unexpected reason {}",
                song.reason
            ),
            DiscoverySource::Library => assert_eq!(song.reason, "From your library"),
            DiscoverySource::UserRequest => panic!("discovery never yields user requests"),
        }
    }
}

#[tokio::test]
async fn test_turn_advances_between_participants() {
    let fixture = fully_stocked().await;
    let first = fixture
        .engine
        .get_next_song(CHANNEL, &[ALICE, BOB], None, 7200)
        .await;
    assert_eq!(first.map(|s| s.for_user), Some(ALICE));
    assert_eq!(fixture.engine.turn_position(CHANNEL), Some(1));

    // Bob has no history of his own, but charts still answer for him
    let second = fixture
        .engine
        .get_next_song(CHANNEL, &[ALICE, BOB], None, 7200)
        .await;
    assert_eq!(second.map(|s| s.for_user), Some(BOB));
    assert_eq!(fixture.engine.turn_position(CHANNEL), Some(0));
}

#[tokio::test]
async fn test_all_pools_failing_yields_no_selection_and_still_advances() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let pools: Vec<Arc<dyn CandidatePool>> = vec![
        Arc::new(FailingPool(DiscoverySource::Library)),
        Arc::new(FailingPool(DiscoverySource::Similar)),
        Arc::new(HangingPool(DiscoverySource::Artist)),
        Arc::new(HangingPool(DiscoverySource::Wildcard)),
    ];
    let dyn_store: Arc<dyn Store> = store.clone();
    let engine = DiscoveryEngine::with_pools(
        dyn_store,
        Arc::new(ScriptedMetadata::failing()),
        pools,
        fast_config(),
    );

    let start = Instant::now();
    let result = engine.get_next_song(CHANNEL, &[ALICE, BOB], None, 7200).await;
    assert!(result.is_none());
    assert!(start.elapsed() < Duration::from_secs(5), "hanging pools must be cut off");
    assert_eq!(engine.turn_position(CHANNEL), Some(1));
    assert_eq!(engine.current_turn(CHANNEL), Some(BOB));
}

#[tokio::test]
async fn test_failing_providers_degrade_to_remaining_pools() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    like_song(&store, ALICE, "only-liked", "Someone").await;

    let dyn_store: Arc<dyn Store> = store.clone();
    let engine = DiscoveryEngine::new(
        dyn_store,
        DiscoveryProviders {
            metadata: Arc::new(ScriptedMetadata::failing()),
            catalog: Arc::new(ScriptedCatalog {
                fail: true,
                ..ScriptedCatalog::default()
            }),
            normalizer: Arc::new(ScriptedNormalizer::default()),
        },
        fast_config(),
        RetryPolicy::none(),
    );

    let song = engine
        .get_next_song(CHANNEL, &[ALICE], None, 7200)
        .await
        .expect("library pool still answers");
    assert_eq!(song.content_id, "only-liked");
    assert_eq!(song.source, DiscoverySource::Library);
}

#[tokio::test]
async fn test_no_participants_means_no_selection() {
    let fixture = fully_stocked().await;
    assert!(fixture.engine.get_next_song(CHANNEL, &[], None, 7200).await.is_none());
    assert_eq!(fixture.engine.turn_position(CHANNEL), None);
}

#[tokio::test]
async fn test_zero_weight_pools_are_not_consulted() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    like_song(&store, ALICE, "liked", "Someone").await;
    let metadata = Arc::new(ScriptedMetadata {
        related: vec![track("related", "Other")],
        ..ScriptedMetadata::default()
    });

    let dyn_store: Arc<dyn Store> = store.clone();
    let engine = DiscoveryEngine::new(
        dyn_store,
        DiscoveryProviders {
            metadata: metadata.clone(),
            catalog: Arc::new(ScriptedCatalog::default()),
            normalizer: Arc::new(ScriptedNormalizer::default()),
        },
        fast_config(),
        RetryPolicy::none(),
    );

    let library_only = SourceWeights {
        library: 1,
        similar: 0,
        artist: 0,
        wildcard: 0,
    };
    for _ in 0..5 {
        let song = engine
            .get_next_song(CHANNEL, &[ALICE], Some(library_only), 7200)
            .await
            .expect("library pick");
        assert_eq!(song.source, DiscoverySource::Library);
    }
    // library songs already carry genres and a duration, so nothing calls out
    assert_eq!(metadata.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_duration_is_backfilled() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let mut chart_track = track("chart-no-duration", "Star");
    chart_track.duration_seconds = None;
    let mut details = track("chart-no-duration", "Star");
    details.duration_seconds = Some(321);

    let metadata = ScriptedMetadata {
        playlists: vec![PlaylistRef {
            id: "p".to_string(),
            title: "Top".to_string(),
        }],
        playlist_tracks: vec![chart_track],
        details: HashMap::from([("chart-no-duration".to_string(), details)]),
        ..ScriptedMetadata::default()
    };
    let dyn_store: Arc<dyn Store> = store.clone();
    let engine = DiscoveryEngine::new(
        dyn_store,
        DiscoveryProviders {
            metadata: Arc::new(metadata),
            catalog: Arc::new(ScriptedCatalog::default()),
            normalizer: Arc::new(ScriptedNormalizer::default()),
        },
        fast_config(),
        RetryPolicy::none(),
    );

    let song = engine
        .get_next_song(CHANNEL, &[ALICE], None, 7200)
        .await
        .expect("chart pick");
    assert_eq!(song.content_id, "chart-no-duration");
    assert_eq!(song.duration_seconds, Some(321));
}

#[tokio::test]
async fn test_duration_backfill_retries_failed_lookup() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let mut chart_track = track("chart-flaky", "Star");
    chart_track.duration_seconds = None;
    let mut details = track("chart-flaky", "Star");
    details.duration_seconds = Some(245);

    let metadata = Arc::new(ScriptedMetadata {
        playlists: vec![PlaylistRef {
            id: "p".to_string(),
            title: "Top".to_string(),
        }],
        playlist_tracks: vec![chart_track],
        details: HashMap::from([("chart-flaky".to_string(), details)]),
        details_failures: 1,
        ..ScriptedMetadata::default()
    });
    let retry = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(10),
        jitter: Duration::ZERO,
    };
    let dyn_store: Arc<dyn Store> = store.clone();
    let engine = DiscoveryEngine::new(
        dyn_store,
        DiscoveryProviders {
            metadata: metadata.clone(),
            catalog: Arc::new(ScriptedCatalog::default()),
            normalizer: Arc::new(ScriptedNormalizer::default()),
        },
        fast_config(),
        retry,
    );

    let song = engine
        .get_next_song(CHANNEL, &[ALICE], None, 7200)
        .await
        .expect("chart pick");
    assert_eq!(song.content_id, "chart-flaky");
    assert_eq!(song.duration_seconds, Some(245));
    assert_eq!(metadata.details_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_library_genre_backfills_run_concurrently() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let mut details = HashMap::new();
    for n in 0..6 {
        let content_id = format!("bare-{n}");
        let song = store
            .upsert_song(&NewSong {
                content_id: content_id.clone(),
                title: format!("Title {content_id}"),
                artist: "Quartet".to_string(),
                duration_seconds: Some(240),
                year: Some(1959),
                genres: Vec::new(),
                ephemeral: false,
            })
            .await
            .unwrap();
        store.add_reaction(ALICE, song.id, Reaction::Like).await.unwrap();

        let mut info = track(&content_id, "Quartet");
        info.genres = vec!["jazz".to_string()];
        details.insert(content_id, info);
    }

    let metadata = ScriptedMetadata {
        details,
        details_delay: Duration::from_millis(150),
        ..ScriptedMetadata::default()
    };
    let dyn_store: Arc<dyn Store> = store.clone();
    let pool = LibraryPool::new(dyn_store, Arc::new(metadata), RetryPolicy::none());
    let ctx = PoolContext {
        channel: CHANNEL,
        user: ALICE,
        exclude: Arc::new(HashSet::new()),
        limit: 20,
    };

    let started = Instant::now();
    let candidates = pool.gather(&ctx).await.unwrap();
    // Six sequential lookups would take 900ms
    assert!(started.elapsed() < Duration::from_millis(600), "took {:?}", started.elapsed());

    assert_eq!(candidates.len(), 6);
    assert!(candidates.iter().all(|c| c.genres == vec!["jazz".to_string()]));

    let stored = store.song_by_content_id("bare-3").await.unwrap().unwrap();
    assert_eq!(stored.genres, vec!["jazz".to_string()]);
}
