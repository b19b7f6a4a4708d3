//! Chunked, cancellable reads against the backend and the page sources the
//! feed pulls from.
//!
//! Chunks run concurrently and are merged in chunk order once all of them
//! have settled. A failed chunk contributes nothing; cancellation is checked
//! before and after the work and surfaces as [`FeedError::Cancelled`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backend::{Backend, BlobStore, DocumentStore};
use crate::cancel::CancellationToken;
use crate::error::{FeedError, FeedResult};
use crate::geo;
use crate::model::{Coordinates, FilterCriteria, Location, Post, PostKind, Tag, UserExplore};
use crate::query::{Direction, Query, RangeOp, DOCUMENT_ID};
use crate::storage::Store;

pub const POSTS_COLLECTION: &str = "posts";
pub const LOCATIONS_COLLECTION: &str = "locations";
pub const TAGS_COLLECTION: &str = "tags";
pub const USER_EXPLORE_COLLECTION: &str = "userExplorePosts";
pub const VIDEO_PATH_PREFIX: &str = "tiktokVideos";

pub const POST_CHUNK_SIZE: usize = 10;
pub const TAG_CHUNK_SIZE: usize = 10;
pub const VIDEO_URL_CHUNK_SIZE: usize = 5;

pub fn chunk<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(|part| part.to_vec()).collect()
}

pub fn video_path(post_id: &str) -> String {
    format!("{VIDEO_PATH_PREFIX}/{post_id}.mp4")
}

/// Runs `work` once per chunk on scoped threads. Results come back in chunk
/// order; failed chunks are logged and yield `R::default()`.
fn run_chunks<T, R, F>(
    label: &str,
    chunks: Vec<Vec<T>>,
    token: &CancellationToken,
    work: F,
) -> FeedResult<Vec<R>>
where
    T: Send,
    R: Send + Default,
    F: Fn(Vec<T>) -> FeedResult<R> + Sync,
{
    token.check()?;
    let results: Vec<FeedResult<R>> = thread::scope(|scope| {
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|part| {
                let work = &work;
                scope.spawn(move || {
                    token.check()?;
                    work(part)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(FeedError::Backend("fetch worker panicked".into())))
            })
            .collect()
    });
    token.check()?;

    Ok(results
        .into_iter()
        .enumerate()
        .map(|(index, result)| match result {
            Ok(value) => value,
            Err(err) => {
                warn!(label, chunk = index, error = %err, "chunk failed");
                R::default()
            }
        })
        .collect())
}

fn decode_all<T: serde::de::DeserializeOwned>(docs: Vec<crate::backend::Document>) -> Vec<T> {
    docs.into_iter()
        .filter_map(|doc| match doc.decode() {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(error = %err, "skipping undecodable document");
                None
            }
        })
        .collect()
}

/// Posts by id, in the order the ids were given.
pub fn fetch_posts_by_ids(
    store: &dyn DocumentStore,
    ids: &[String],
    token: &CancellationToken,
) -> FeedResult<Vec<Post>> {
    let chunks = run_chunks("posts", chunk(ids, POST_CHUNK_SIZE), token, |part| {
        let query = Query::collection(POSTS_COLLECTION).where_in(DOCUMENT_ID, part);
        Ok(decode_all::<Post>(store.get_collection(&query)?))
    })?;
    let mut by_id: HashMap<String, Post> = chunks
        .into_iter()
        .flatten()
        .map(|post| (post.id.clone(), post))
        .collect();
    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

/// The user's recommended posts, read from their explore document.
pub fn fetch_recommended_posts(
    store: &dyn DocumentStore,
    user_id: &str,
    token: &CancellationToken,
) -> FeedResult<Vec<Post>> {
    let ids = fetch_explore_ids(store, user_id, token)?;
    fetch_posts_by_ids(store, &ids, token)
}

pub fn fetch_explore_ids(
    store: &dyn DocumentStore,
    user_id: &str,
    token: &CancellationToken,
) -> FeedResult<Vec<String>> {
    token.check()?;
    let Some(doc) = store.get_document(USER_EXPLORE_COLLECTION, user_id)? else {
        return Ok(Vec::new());
    };
    token.check()?;
    let explore: UserExplore = doc.decode()?;
    Ok(explore.posts)
}

pub fn fetch_posts_for_locations(
    store: &dyn DocumentStore,
    location_ids: &[String],
    token: &CancellationToken,
) -> FeedResult<Vec<Post>> {
    let chunks = run_chunks(
        "location posts",
        chunk(location_ids, POST_CHUNK_SIZE),
        token,
        |part| {
            let query = Query::collection(POSTS_COLLECTION).where_in("locationID", part);
            Ok(decode_all::<Post>(store.get_collection(&query)?))
        },
    )?;
    Ok(chunks.into_iter().flatten().collect())
}

pub fn fetch_tags(
    store: &dyn DocumentStore,
    ids: &[String],
    token: &CancellationToken,
) -> FeedResult<HashMap<String, Tag>> {
    let unique: Vec<String> = {
        let mut seen = HashSet::new();
        ids.iter().filter(|id| seen.insert(*id)).cloned().collect()
    };
    let chunks = run_chunks("tags", chunk(&unique, TAG_CHUNK_SIZE), token, |part| {
        let query = Query::collection(TAGS_COLLECTION).where_in(DOCUMENT_ID, part);
        Ok(decode_all::<Tag>(store.get_collection(&query)?))
    })?;
    Ok(chunks
        .into_iter()
        .flatten()
        .map(|tag| (tag.id.clone(), tag))
        .collect())
}

/// Download URLs keyed by post id. Ids whose lookup fails are omitted.
pub fn fetch_video_urls(
    blobs: &dyn BlobStore,
    post_ids: &[String],
    token: &CancellationToken,
) -> FeedResult<HashMap<String, String>> {
    let chunks = run_chunks(
        "video urls",
        chunk(post_ids, VIDEO_URL_CHUNK_SIZE),
        token,
        |part| {
            let mut urls = Vec::with_capacity(part.len());
            for id in part {
                match blobs.download_url(&video_path(&id)) {
                    Ok(url) => urls.push((id, url)),
                    Err(err) => debug!(post_id = %id, error = %err, "video url unavailable"),
                }
            }
            Ok(urls)
        },
    )?;
    Ok(chunks.into_iter().flatten().collect())
}

/// Local memory of resolved download URLs.
pub trait VideoUrlCache: Send + Sync {
    fn cached_url(&self, post_id: &str) -> Option<String>;
    fn remember_url(&self, post_id: &str, url: &str);
}

/// [`VideoUrlCache`] on the SQLite store with a fixed time-to-live.
pub struct SqliteUrlCache {
    store: Arc<Store>,
    ttl: Duration,
}

impl SqliteUrlCache {
    pub fn new(store: Arc<Store>, ttl: Duration) -> Self {
        Self { store, ttl }
    }
}

impl VideoUrlCache for SqliteUrlCache {
    fn cached_url(&self, post_id: &str) -> Option<String> {
        match self.store.get_video_url(post_id, Utc::now()) {
            Ok(entry) => entry.map(|entry| entry.url),
            Err(err) => {
                debug!(post_id, error = %err, "video url cache read failed");
                None
            }
        }
    }

    fn remember_url(&self, post_id: &str, url: &str) {
        if let Err(err) = self.store.put_video_url(post_id, url, self.ttl) {
            debug!(post_id, error = %err, "video url cache write failed");
        }
    }
}

/// Fills in missing video URLs (cache first, then blob storage) and drops
/// posts that still have none.
pub fn resolve_media(
    mut posts: Vec<Post>,
    blobs: &dyn BlobStore,
    cache: Option<&dyn VideoUrlCache>,
    token: &CancellationToken,
) -> FeedResult<Vec<Post>> {
    let mut missing = Vec::new();
    for post in posts.iter_mut().filter(|post| !post.is_playable()) {
        match cache.and_then(|cache| cache.cached_url(&post.id)) {
            Some(url) => post.src.video_url = url,
            None => missing.push(post.id.clone()),
        }
    }

    if !missing.is_empty() {
        let urls = fetch_video_urls(blobs, &missing, token)?;
        for post in posts.iter_mut() {
            if let Some(url) = urls.get(&post.id) {
                post.src.video_url = url.clone();
                if let Some(cache) = cache {
                    cache.remember_url(&post.id, url);
                }
            }
        }
    }

    let before = posts.len();
    posts.retain(Post::is_playable);
    if posts.len() < before {
        debug!(dropped = before - posts.len(), "dropped posts without video");
    }
    Ok(posts)
}

/// Verified locations of `kind` within the criteria's radius of `center`,
/// nearest first. Each geohash range is queried independently; a failed
/// range contributes nothing.
pub fn find_locations_near(
    store: &dyn DocumentStore,
    center: Coordinates,
    criteria: &FilterCriteria,
    kind: PostKind,
    token: &CancellationToken,
) -> FeedResult<Vec<Location>> {
    let radius_m = criteria.distance.radius_m();
    let bounds: Vec<Vec<(String, String)>> = geo::geohash_query_bounds(center, radius_m)
        .into_iter()
        .map(|bound| vec![bound])
        .collect();

    let ranges = run_chunks("location bounds", bounds, token, |bound| {
        let mut found = Vec::new();
        for (start, end) in bound {
            let query = Query::collection(LOCATIONS_COLLECTION)
                .where_eq("type", kind.as_str())
                .where_eq("isVerified", true)
                .where_range("geohash", RangeOp::Ge, start)
                .where_range("geohash", RangeOp::Le, end)
                .order_by("geohash", Direction::Asc);
            found.extend(decode_all::<Location>(store.get_collection(&query)?));
        }
        Ok(found)
    })?;

    let mut seen = HashSet::new();
    let mut locations: Vec<Location> = ranges
        .into_iter()
        .flatten()
        .filter(|location| seen.insert(location.id.clone()))
        .filter_map(|mut location| {
            let distance_km = geo::distance_between(center, location.coordinates());
            if distance_km * 1000.0 > radius_m {
                return None;
            }
            if !criteria.matches(&location.labels, &location.food_types) {
                return None;
            }
            location.distance = Some(distance_km);
            Some(location)
        })
        .collect();
    locations.sort_by(|a, b| {
        a.distance
            .unwrap_or(f64::MAX)
            .total_cmp(&b.distance.unwrap_or(f64::MAX))
    });
    Ok(locations)
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub offset: usize,
    pub page_size: usize,
    pub criteria: FilterCriteria,
    pub center: Option<Coordinates>,
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub posts: Vec<Post>,
    pub tags: HashMap<String, Tag>,
    /// Offset for the following page.
    pub next_offset: usize,
    pub has_more: bool,
}

pub trait PostSource: Send + Sync {
    fn fetch_page(&self, request: &PageRequest, token: &CancellationToken) -> FeedResult<Page>;

    fn name(&self) -> &'static str;
}

fn finish_page(
    backend: &Backend,
    cache: Option<&dyn VideoUrlCache>,
    posts: Vec<Post>,
    next_offset: usize,
    has_more: bool,
    token: &CancellationToken,
) -> FeedResult<Page> {
    let posts = resolve_media(posts, backend.blobs.as_ref(), cache, token)?;
    let tag_ids: Vec<String> = posts.iter().flat_map(|post| post.tags.clone()).collect();
    let tags = match fetch_tags(backend.documents.as_ref(), &tag_ids, token) {
        Ok(tags) => tags,
        Err(FeedError::Cancelled) => return Err(FeedError::Cancelled),
        Err(err) => {
            warn!(error = %err, "tags unavailable");
            HashMap::new()
        }
    };
    Ok(Page {
        posts,
        tags,
        next_offset,
        has_more,
    })
}

type LocationKey = (i64, i64, FilterCriteria);

fn location_key(center: Coordinates, criteria: &FilterCriteria) -> LocationKey {
    (
        (center.lat * 1e6).round() as i64,
        (center.lng * 1e6).round() as i64,
        criteria.clone(),
    )
}

/// Pages through locations near a centre, nearest first, yielding their
/// posts.
pub struct NearbyPostSource {
    backend: Backend,
    cache: Option<Arc<dyn VideoUrlCache>>,
    kind: PostKind,
    locations: Mutex<Option<(LocationKey, Vec<Location>)>>,
}

impl NearbyPostSource {
    pub fn new(backend: Backend, cache: Option<Arc<dyn VideoUrlCache>>, kind: PostKind) -> Self {
        Self {
            backend,
            cache,
            kind,
            locations: Mutex::new(None),
        }
    }

    fn locations_for(
        &self,
        center: Coordinates,
        criteria: &FilterCriteria,
        token: &CancellationToken,
    ) -> FeedResult<Vec<Location>> {
        let key = location_key(center, criteria);
        if let Some((cached_key, locations)) = self.locations.lock().as_ref() {
            if *cached_key == key {
                return Ok(locations.clone());
            }
        }
        let locations =
            find_locations_near(self.backend.documents.as_ref(), center, criteria, self.kind, token)?;
        *self.locations.lock() = Some((key, locations.clone()));
        Ok(locations)
    }
}

impl PostSource for NearbyPostSource {
    fn fetch_page(&self, request: &PageRequest, token: &CancellationToken) -> FeedResult<Page> {
        let center = request
            .center
            .ok_or_else(|| FeedError::InvalidArgument("nearby feed needs a location".into()))?;
        if request.offset == 0 {
            *self.locations.lock() = None;
        }
        let locations = self.locations_for(center, &request.criteria, token)?;
        let end = (request.offset + request.page_size.max(1)).min(locations.len());
        let page_locations = locations.get(request.offset..end).unwrap_or(&[]);
        let ids: Vec<String> = page_locations.iter().map(|l| l.id.clone()).collect();

        let mut posts =
            fetch_posts_for_locations(self.backend.documents.as_ref(), &ids, token)?;
        let rank: HashMap<&str, usize> = ids
            .iter()
            .enumerate()
            .map(|(rank, id)| (id.as_str(), rank))
            .collect();
        let by_id: HashMap<&str, &Location> =
            page_locations.iter().map(|l| (l.id.as_str(), l)).collect();
        for post in posts.iter_mut() {
            if let Some(location) = by_id.get(post.location_id.as_str()) {
                post.attach_location(location, Some(center));
            }
        }
        posts.sort_by_key(|post| rank.get(post.location_id.as_str()).copied().unwrap_or(usize::MAX));

        debug!(
            offset = request.offset,
            locations = page_locations.len(),
            posts = posts.len(),
            "nearby page fetched"
        );
        finish_page(
            &self.backend,
            self.cache.as_deref(),
            posts,
            end,
            end < locations.len(),
            token,
        )
    }

    fn name(&self) -> &'static str {
        "nearby"
    }
}

/// Pages through the user's recommended post list.
pub struct RecommendedPostSource {
    backend: Backend,
    cache: Option<Arc<dyn VideoUrlCache>>,
    user_id: String,
    explore: Mutex<Option<Vec<String>>>,
}

impl RecommendedPostSource {
    pub fn new(
        backend: Backend,
        cache: Option<Arc<dyn VideoUrlCache>>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            cache,
            user_id: user_id.into(),
            explore: Mutex::new(None),
        }
    }
}

impl PostSource for RecommendedPostSource {
    fn fetch_page(&self, request: &PageRequest, token: &CancellationToken) -> FeedResult<Page> {
        if request.offset == 0 {
            *self.explore.lock() = None;
        }
        let cached = self.explore.lock().clone();
        let ids = match cached {
            Some(ids) => ids,
            None => {
                let ids =
                    fetch_explore_ids(self.backend.documents.as_ref(), &self.user_id, token)?;
                *self.explore.lock() = Some(ids.clone());
                ids
            }
        };
        let end = (request.offset + request.page_size.max(1)).min(ids.len());
        let page_ids = ids.get(request.offset..end).unwrap_or(&[]);
        let mut posts = fetch_posts_by_ids(self.backend.documents.as_ref(), page_ids, token)?;
        posts.retain(|post| {
            request
                .criteria
                .matches(&post.metadata.labels, &post.metadata.food_types)
        });
        if let Some(center) = request.center {
            for post in posts.iter_mut() {
                if let Some(point) = post.location {
                    post.distance = Some(geo::distance_between(center, point.into()));
                }
            }
        }
        finish_page(
            &self.backend,
            self.cache.as_deref(),
            posts,
            end,
            end < ids.len(),
            token,
        )
    }

    fn name(&self) -> &'static str {
        "recommended"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::model::{FoodType, Label};
    use serde_json::json;

    const DUBLIN: Coordinates = Coordinates {
        lat: 53.324319,
        lng: -6.253127,
    };

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn seed_post(memory: &MemoryBackend, id: &str, location_id: &str) {
        memory
            .insert(
                POSTS_COLLECTION,
                id,
                json!({ "ID": id, "locationID": location_id, "tags": ["t1"] }),
            )
            .unwrap();
        memory.insert_blob(&video_path(id), &format!("https://cdn.test/{id}.mp4"));
    }

    fn seed_location(memory: &MemoryBackend, id: &str, at: Coordinates, labels: &[&str]) {
        memory
            .insert(
                LOCATIONS_COLLECTION,
                id,
                json!({
                    "ID": id,
                    "name": id,
                    "type": "restaurant",
                    "isVerified": true,
                    "lat": at.lat,
                    "lng": at.lng,
                    "geohash": geo::geohash_for_location(at),
                    "labels": labels,
                    "foodTypes": ["Italian"],
                }),
            )
            .unwrap();
    }

    #[test]
    fn chunking_respects_size() {
        let items: Vec<u32> = (0..23).collect();
        let parts = chunk(&items, 10);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], vec![20, 21, 22]);
        assert_eq!(chunk(&items, 0).len(), 23);
        assert!(chunk::<u32>(&[], 5).is_empty());
    }

    #[test]
    fn posts_by_id_keep_requested_order_across_chunks() {
        let memory = MemoryBackend::new();
        let wanted: Vec<String> = (0..25).rev().map(|i| format!("p{i:02}")).collect();
        for id in &wanted {
            seed_post(&memory, id, "l1");
        }
        let token = CancellationToken::new();
        let posts = fetch_posts_by_ids(&memory, &wanted, &token).unwrap();
        let got: Vec<String> = posts.into_iter().map(|p| p.id).collect();
        assert_eq!(got, wanted);
        assert_eq!(memory.read_count(), 3);
    }

    #[test]
    fn recommended_posts_read_explore_document() {
        let memory = MemoryBackend::new();
        seed_post(&memory, "a", "l1");
        seed_post(&memory, "b", "l1");
        memory
            .insert(USER_EXPLORE_COLLECTION, "u1", json!({ "posts": ["b", "a", "zzz"] }))
            .unwrap();
        let token = CancellationToken::new();
        let posts = fetch_recommended_posts(&memory, "u1", &token).unwrap();
        let got: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(got, vec!["b", "a"]);
        assert!(fetch_recommended_posts(&memory, "nobody", &token)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn cancelled_token_surfaces_as_cancelled() {
        let memory = MemoryBackend::new();
        seed_post(&memory, "a", "l1");
        let token = CancellationToken::new();
        token.cancel();
        let result = fetch_posts_by_ids(&memory, &ids(&["a"]), &token);
        assert_eq!(result, Err(FeedError::Cancelled));
        assert_eq!(memory.read_count(), 0);
    }

    #[test]
    fn failed_video_urls_are_omitted() {
        let memory = MemoryBackend::new();
        for id in ["a", "b", "c", "d", "e", "f"] {
            memory.insert_blob(&video_path(id), &format!("https://cdn.test/{id}.mp4"));
        }
        memory.fail_on(&video_path("c"));
        let token = CancellationToken::new();
        let urls =
            fetch_video_urls(&memory, &ids(&["a", "b", "c", "d", "e", "f", "missing"]), &token)
                .unwrap();
        assert_eq!(urls.len(), 5);
        assert!(!urls.contains_key("c"));
        assert_eq!(urls["f"], "https://cdn.test/f.mp4");
    }

    #[test]
    fn resolve_media_uses_cache_and_drops_unresolved() {
        let memory = MemoryBackend::new();
        memory.insert_blob(&video_path("b"), "https://cdn.test/b.mp4");
        let store = Arc::new(Store::open_in_memory().unwrap());
        let cache = SqliteUrlCache::new(store.clone(), Duration::from_secs(600));
        cache.remember_url("a", "https://cache.test/a.mp4");

        let posts = vec![
            Post {
                id: "a".into(),
                ..Post::default()
            },
            Post {
                id: "b".into(),
                ..Post::default()
            },
            Post {
                id: "c".into(),
                ..Post::default()
            },
        ];
        let token = CancellationToken::new();
        let resolved = resolve_media(posts, &memory, Some(&cache), &token).unwrap();
        let urls: Vec<(&str, &str)> = resolved
            .iter()
            .map(|p| (p.id.as_str(), p.src.video_url.as_str()))
            .collect();
        assert_eq!(
            urls,
            vec![
                ("a", "https://cache.test/a.mp4"),
                ("b", "https://cdn.test/b.mp4")
            ]
        );
        assert_eq!(cache.cached_url("b").as_deref(), Some("https://cdn.test/b.mp4"));
    }

    #[test]
    fn locations_near_filter_radius_and_selected_labels() {
        let memory = MemoryBackend::new();
        seed_location(&memory, "near", Coordinates::new(53.3250, -6.2540), &["Brunch"]);
        seed_location(&memory, "casual", Coordinates::new(53.3260, -6.2500), &["Casual"]);
        seed_location(&memory, "far", Coordinates::new(53.2707, -9.0568), &["Brunch"]);
        let token = CancellationToken::new();

        let all = find_locations_near(
            &memory,
            DUBLIN,
            &FilterCriteria::default(),
            PostKind::Restaurant,
            &token,
        )
        .unwrap();
        let names: Vec<&str> = all.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(names, vec!["near", "casual"]);
        assert!(all[0].distance.unwrap() < all[1].distance.unwrap());

        let brunch = FilterCriteria {
            labels: vec![Label::Brunch],
            food_types: vec![FoodType::Italian],
            ..FilterCriteria::default()
        };
        let filtered =
            find_locations_near(&memory, DUBLIN, &brunch, PostKind::Restaurant, &token).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "near");
    }

    #[test]
    fn nearby_source_pages_by_location() {
        let memory = Arc::new(MemoryBackend::new());
        seed_location(&memory, "l1", Coordinates::new(53.3244, -6.2532), &[]);
        seed_location(&memory, "l2", Coordinates::new(53.3300, -6.2600), &[]);
        seed_post(&memory, "p1", "l1");
        seed_post(&memory, "p2", "l2");
        memory.insert(TAGS_COLLECTION, "t1", json!({ "name": "pasta" })).unwrap();

        let source = NearbyPostSource::new(Backend::in_memory(memory), None, PostKind::Restaurant);
        let token = CancellationToken::new();
        let mut request = PageRequest {
            offset: 0,
            page_size: 1,
            criteria: FilterCriteria::default(),
            center: Some(DUBLIN),
        };
        let first = source.fetch_page(&request, &token).unwrap();
        assert_eq!(first.posts.len(), 1);
        assert_eq!(first.posts[0].id, "p1");
        assert_eq!(first.posts[0].location_name, "l1");
        assert!(first.has_more);
        assert_eq!(first.tags["t1"].name, "pasta");

        request.offset = first.next_offset;
        let second = source.fetch_page(&request, &token).unwrap();
        assert_eq!(second.posts[0].id, "p2");
        assert!(!second.has_more);
    }

    #[test]
    fn nearby_source_requires_location() {
        let source = NearbyPostSource::new(
            Backend::in_memory(Arc::new(MemoryBackend::new())),
            None,
            PostKind::Restaurant,
        );
        let request = PageRequest {
            offset: 0,
            page_size: 5,
            criteria: FilterCriteria::default(),
            center: None,
        };
        assert!(matches!(
            source.fetch_page(&request, &CancellationToken::new()),
            Err(FeedError::InvalidArgument(_))
        ));
    }
}
