use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use reelfeed::backend::Backend;
use reelfeed::carousel::{Carousel, SimulatedFactory};
use reelfeed::feed::{Feed, FeedSettings, FeedState};
use reelfeed::fetch::{video_path, NearbyPostSource, LOCATIONS_COLLECTION, POSTS_COLLECTION};
use reelfeed::geo;
use reelfeed::memory::MemoryBackend;
use reelfeed::model::{Coordinates, FilterCriteria, Label, NotFoundMode, PostKind};
use reelfeed::player::PlayerSettings;
use reelfeed::telemetry::RecordingSink;

const CENTER: Coordinates = Coordinates {
    lat: 53.3244,
    lng: -6.2532,
};
const WAIT: Duration = Duration::from_secs(5);

/// One location and one post per step north of the centre.
fn seeded(count: usize) -> Arc<MemoryBackend> {
    let memory = Arc::new(MemoryBackend::new());
    for i in 0..count {
        let at = Coordinates::new(CENTER.lat + 0.001 * (i as f64 + 1.0), CENTER.lng);
        let location_id = format!("l{i:02}");
        memory
            .insert(
                LOCATIONS_COLLECTION,
                &location_id,
                json!({
                    "ID": location_id,
                    "name": format!("Spot {i}"),
                    "type": "restaurant",
                    "isVerified": true,
                    "lat": at.lat,
                    "lng": at.lng,
                    "geohash": geo::geohash_for_location(at),
                }),
            )
            .unwrap();
        let post_id = format!("p{i:02}");
        memory
            .insert(
                POSTS_COLLECTION,
                &post_id,
                json!({ "ID": post_id, "locationID": location_id }),
            )
            .unwrap();
        memory.insert_blob(&video_path(&post_id), &format!("https://cdn.test/{post_id}.mp4"));
    }
    memory
}

fn nearby_feed(memory: Arc<MemoryBackend>, page_size: usize) -> Feed {
    let source = NearbyPostSource::new(Backend::in_memory(memory), None, PostKind::Restaurant);
    Feed::new(
        Arc::new(source),
        FeedSettings {
            page_size,
            ..FeedSettings::default()
        },
    )
}

#[test]
fn nearby_feed_loads_then_paginates_once_per_request() {
    let mut feed = nearby_feed(seeded(7), 3);
    assert_eq!(feed.state(), &FeedState::Initializing);

    feed.set_location(CENTER);
    assert_eq!(feed.state(), &FeedState::Loading);
    assert!(feed.wait(WAIT));
    assert_eq!(feed.state(), &FeedState::Populated);
    assert_eq!(feed.window().len(), 3);
    assert_eq!(feed.current_post().unwrap().id, "p00");

    feed.select(2);
    assert_eq!(feed.state(), &FeedState::LoadingMore);
    assert!(!feed.load_more(), "second trigger must coalesce");
    assert!(feed.wait(WAIT));
    assert_eq!(feed.window().len(), 6);
    assert_eq!(feed.current_index(), 2);

    feed.select(5);
    assert!(feed.wait(WAIT));
    assert_eq!(feed.window().len(), 7);
    assert!(!feed.has_more());
    assert!(!feed.load_more());
}

#[test]
fn empty_area_reports_page_or_filter_mode() {
    let mut feed = nearby_feed(Arc::new(MemoryBackend::new()), 5);
    feed.set_location(CENTER);
    feed.wait(WAIT);
    assert_eq!(feed.state(), &FeedState::Empty(NotFoundMode::Page));

    let mut filtered = nearby_feed(seeded(2), 5).with_criteria(FilterCriteria {
        labels: vec![Label::Brunch],
        ..FilterCriteria::default()
    });
    filtered.set_location(CENTER);
    filtered.wait(WAIT);
    assert_eq!(filtered.state(), &FeedState::Empty(NotFoundMode::Filter));

    filtered.set_filter(FilterCriteria::default());
    filtered.wait(WAIT);
    assert_eq!(filtered.state(), &FeedState::Populated);
    assert_eq!(filtered.window().len(), 2);
}

#[test]
fn cancelled_load_leaves_feed_untouched() {
    let mut feed = nearby_feed(seeded(4), 5);
    feed.set_location(CENTER);
    feed.cancel();
    assert_eq!(feed.state(), &FeedState::Initializing);

    std::thread::sleep(Duration::from_millis(200));
    assert!(!feed.poll());
    assert!(feed.window().is_empty());
    assert_eq!(feed.state(), &FeedState::Initializing);
}

#[test]
fn only_the_current_post_plays_while_scrolling() {
    let mut feed = nearby_feed(seeded(5), 5);
    feed.set_location(CENTER);
    assert!(feed.wait(WAIT));

    let sink = Arc::new(RecordingSink::new());
    let mut carousel = Carousel::new(
        Box::new(SimulatedFactory::default()),
        sink.clone(),
        PlayerSettings::default(),
    );

    let mut now = Duration::ZERO;
    for step in 0..5 {
        if step > 0 {
            assert!(feed.next());
        }
        carousel.sync(feed.window(), now);
        for _ in 0..3 {
            now += Duration::from_millis(100);
            carousel.tick(now);
            assert!(carousel.playing_count() <= 1);
        }
        let current = feed.current_post().unwrap().id.clone();
        assert_eq!(carousel.active_id(), Some(current.as_str()));
        assert!(carousel.active_status().unwrap().playing);
        assert!(carousel.mounted_ids().len() <= 3);
    }

    carousel.release_all(now);
    assert_eq!(carousel.playing_count(), 0);
    assert!(sink.count("watch_duration") >= 1);
}
