//! Ordered, de-duplicated post list with a client-side blacklist overlay and
//! the derived window of indices that get a mounted player.

use std::collections::HashSet;
use std::ops::Range;

use tracing::debug;

use crate::model::Post;

pub const DEFAULT_OVERSCAN: usize = 1;

#[derive(Debug, Clone)]
pub struct PostWindow {
    posts: Vec<Post>,
    seen: HashSet<String>,
    blacklist: HashSet<String>,
    exposed: Vec<usize>,
    current: usize,
    overscan: usize,
}

impl Default for PostWindow {
    fn default() -> Self {
        Self::new(DEFAULT_OVERSCAN)
    }
}

impl PostWindow {
    pub fn new(overscan: usize) -> Self {
        Self {
            posts: Vec::new(),
            seen: HashSet::new(),
            blacklist: HashSet::new(),
            exposed: Vec::new(),
            current: 0,
            overscan,
        }
    }

    pub fn overscan(&self) -> usize {
        self.overscan
    }

    /// Number of posts after the blacklist overlay.
    pub fn len(&self) -> usize {
        self.exposed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exposed.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn get(&self, index: usize) -> Option<&Post> {
        self.exposed.get(index).map(|&slot| &self.posts[slot])
    }

    pub fn current_post(&self) -> Option<&Post> {
        self.get(self.current)
    }

    pub fn posts(&self) -> impl Iterator<Item = &Post> + '_ {
        self.exposed.iter().map(|&slot| &self.posts[slot])
    }

    pub fn index_of(&self, post_id: &str) -> Option<usize> {
        self.posts().position(|post| post.id == post_id)
    }

    /// Clamps `index` into range. Returns whether the current index moved.
    pub fn set_current_index(&mut self, index: usize) -> bool {
        let clamped = index.min(self.len().saturating_sub(1));
        if clamped == self.current {
            return false;
        }
        self.current = clamped;
        true
    }

    /// Appends posts not seen before, in first-seen order. Posts without a
    /// resolved video are skipped. Returns the number accepted.
    pub fn append_posts(&mut self, posts: impl IntoIterator<Item = Post>) -> usize {
        let mut accepted = 0;
        for post in posts {
            if !post.is_playable() {
                debug!(post_id = %post.id, "skipping post without video");
                continue;
            }
            if !self.seen.insert(post.id.clone()) {
                continue;
            }
            self.posts.push(post);
            accepted += 1;
        }
        if accepted > 0 {
            self.rebuild_exposed();
        }
        accepted
    }

    /// Drops everything loaded and starts over at index 0.
    pub fn replace_posts(&mut self, posts: impl IntoIterator<Item = Post>) -> usize {
        self.posts.clear();
        self.seen.clear();
        self.exposed.clear();
        self.current = 0;
        self.append_posts(posts)
    }

    /// Hides the given post ids from the exposed sequence. Loaded posts are
    /// kept. The current post stays current when it is still exposed,
    /// otherwise the index is clamped.
    pub fn apply_blacklist<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let current_id = self.current_post().map(|post| post.id.clone());
        let before = self.blacklist.len();
        self.blacklist.extend(ids.into_iter().map(Into::into));
        if self.blacklist.len() == before {
            return;
        }
        self.rebuild_exposed();
        let followed = current_id.and_then(|id| self.index_of(&id));
        self.current = followed.unwrap_or(self.current).min(self.len().saturating_sub(1));
    }

    pub fn is_blacklisted(&self, post_id: &str) -> bool {
        self.blacklist.contains(post_id)
    }

    /// `current - overscan ..= current + overscan`, clipped to the exposed
    /// sequence. Empty when there are no posts.
    pub fn visible_range(&self) -> Range<usize> {
        if self.is_empty() {
            return 0..0;
        }
        let start = self.current.saturating_sub(self.overscan);
        let end = (self.current + self.overscan + 1).min(self.len());
        start..end
    }

    pub fn visible_window(&self) -> Vec<usize> {
        self.visible_range().collect()
    }

    pub fn is_visible(&self, index: usize) -> bool {
        self.visible_range().contains(&index)
    }

    fn rebuild_exposed(&mut self) {
        self.exposed = self
            .posts
            .iter()
            .enumerate()
            .filter(|(_, post)| !self.blacklist.contains(&post.id))
            .map(|(slot, _)| slot)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaSrc;

    fn post(id: &str) -> Post {
        Post {
            id: id.to_string(),
            src: MediaSrc {
                thumb_url: String::new(),
                video_url: format!("https://cdn.test/{id}.mp4"),
            },
            ..Post::default()
        }
    }

    fn posts(ids: &[&str]) -> Vec<Post> {
        ids.iter().map(|id| post(id)).collect()
    }

    fn ids(window: &PostWindow) -> Vec<String> {
        window.posts().map(|post| post.id.clone()).collect()
    }

    #[test]
    fn window_is_centered_and_clipped() {
        let mut window = PostWindow::new(1);
        window.append_posts(posts(&["a", "b", "c", "d", "e"]));
        assert_eq!(window.visible_window(), vec![0, 1]);
        window.set_current_index(2);
        assert_eq!(window.visible_window(), vec![1, 2, 3]);
        window.set_current_index(4);
        assert_eq!(window.visible_window(), vec![3, 4]);

        for current in 0..5 {
            window.set_current_index(current);
            let visible = window.visible_window();
            assert!(visible.len() <= 2 * window.overscan() + 1);
            assert!(visible.contains(&current));
        }
    }

    #[test]
    fn empty_and_single_post_windows() {
        let mut window = PostWindow::default();
        assert!(window.visible_window().is_empty());
        assert!(!window.set_current_index(3));
        window.append_posts(posts(&["only"]));
        assert_eq!(window.visible_window(), vec![0]);
    }

    #[test]
    fn set_current_index_clamps_and_reports_change() {
        let mut window = PostWindow::default();
        window.append_posts(posts(&["a", "b", "c"]));
        assert!(window.set_current_index(10));
        assert_eq!(window.current_index(), 2);
        assert!(!window.set_current_index(2));
    }

    #[test]
    fn append_deduplicates_and_is_idempotent() {
        let mut window = PostWindow::default();
        assert_eq!(window.append_posts(posts(&["a", "b", "a"])), 2);
        assert_eq!(window.append_posts(posts(&["b", "c"])), 1);
        let snapshot = ids(&window);
        assert_eq!(window.append_posts(posts(&["a", "b", "c"])), 0);
        assert_eq!(ids(&window), snapshot);
        assert_eq!(snapshot, vec!["a", "b", "c"]);
    }

    #[test]
    fn unplayable_posts_are_skipped() {
        let mut window = PostWindow::default();
        let mut broken = post("x");
        broken.src.video_url.clear();
        assert_eq!(window.append_posts(vec![broken, post("y")]), 1);
        assert_eq!(ids(&window), vec!["y"]);
    }

    #[test]
    fn blacklist_filters_and_reclamps() {
        let mut window = PostWindow::default();
        window.append_posts(posts(&["p1", "p2", "p3"]));
        window.set_current_index(2);
        window.apply_blacklist(["p2"]);
        assert_eq!(ids(&window), vec!["p1", "p3"]);
        assert_eq!(window.current_index(), 1);
        assert_eq!(window.current_post().map(|p| p.id.as_str()), Some("p3"));

        window.apply_blacklist(["p3"]);
        assert_eq!(window.current_index(), 0);
        assert_eq!(ids(&window), vec!["p1"]);
    }

    #[test]
    fn blacklisting_current_post_moves_to_next() {
        let mut window = PostWindow::default();
        window.append_posts(posts(&["p1", "p2", "p3"]));
        window.set_current_index(1);
        window.apply_blacklist(["p2"]);
        assert_eq!(window.current_post().map(|p| p.id.as_str()), Some("p3"));
    }

    #[test]
    fn replace_resets_index() {
        let mut window = PostWindow::default();
        window.append_posts(posts(&["a", "b"]));
        window.set_current_index(1);
        window.replace_posts(posts(&["c", "a"]));
        assert_eq!(window.current_index(), 0);
        assert_eq!(ids(&window), vec!["c", "a"]);
    }
}
