//! Maps scroll progress onto post indices and decides when the end of the
//! loaded range has been reached.

use std::time::Duration;

use crate::scheduler::Debouncer;

pub const DEFAULT_SCROLL_DEBOUNCE: Duration = Duration::from_millis(8);

/// Index of the snap point closest to `progress`. Exact ties keep the lower
/// index. `None` when there are no snap points.
pub fn nearest_snap(progress: f64, snaps: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, snap) in snaps.iter().enumerate() {
        let distance = (snap - progress).abs();
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((index, distance)),
        }
    }
    best.map(|(index, _)| index)
}

/// Evenly spaced snap points for `count` full-height pages.
pub fn even_snaps(count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..count)
            .map(|index| index as f64 / (count - 1) as f64)
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollSample {
    /// Scroll position in `[0, 1]`.
    pub progress: f64,
    pub can_scroll_next: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapOutcome {
    /// Set only when the index differs from the last one reported.
    pub index: Option<usize>,
    pub paginate: bool,
}

#[derive(Debug)]
pub struct SnapSynchronizer {
    snaps: Vec<f64>,
    last_reported: Option<usize>,
    debouncer: Debouncer<ScrollSample>,
}

impl Default for SnapSynchronizer {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLL_DEBOUNCE)
    }
}

impl SnapSynchronizer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            snaps: Vec::new(),
            last_reported: None,
            debouncer: Debouncer::new(debounce),
        }
    }

    pub fn set_snaps(&mut self, snaps: Vec<f64>) {
        self.snaps = snaps;
    }

    pub fn snaps(&self) -> &[f64] {
        &self.snaps
    }

    pub fn last_reported(&self) -> Option<usize> {
        self.last_reported
    }

    /// Records an index set from elsewhere so it is not reported back.
    pub fn sync_index(&mut self, index: usize) {
        self.last_reported = Some(index);
    }

    pub fn reset(&mut self) {
        self.last_reported = None;
        self.debouncer.cancel();
    }

    /// Continuous scroll: only the last sample of a burst is processed, once
    /// the debounce delay has passed. See [`SnapSynchronizer::poll`].
    pub fn on_scroll(&mut self, now: Duration, sample: ScrollSample) {
        self.debouncer.trigger(now, sample);
    }

    /// Settle and select events are processed at once and supersede any
    /// pending scroll sample.
    pub fn on_settle(
        &mut self,
        sample: ScrollSample,
        post_count: usize,
        fetched_count: usize,
    ) -> SnapOutcome {
        self.debouncer.cancel();
        self.process(sample, post_count, fetched_count)
    }

    pub fn poll(
        &mut self,
        now: Duration,
        post_count: usize,
        fetched_count: usize,
    ) -> Option<SnapOutcome> {
        let sample = self.debouncer.poll(now)?;
        Some(self.process(sample, post_count, fetched_count))
    }

    pub fn has_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    fn process(
        &mut self,
        sample: ScrollSample,
        post_count: usize,
        fetched_count: usize,
    ) -> SnapOutcome {
        if post_count == 0 {
            return SnapOutcome::default();
        }
        let Some(nearest) = nearest_snap(sample.progress, &self.snaps) else {
            return SnapOutcome::default();
        };
        let bounded = nearest.min(post_count - 1);

        let index = if self.last_reported != Some(bounded) {
            self.last_reported = Some(bounded);
            Some(bounded)
        } else {
            None
        };
        let paginate = !sample.can_scroll_next && bounded >= fetched_count.saturating_sub(1);
        SnapOutcome { index, paginate }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPS: [f64; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn sample(progress: f64) -> ScrollSample {
        ScrollSample {
            progress,
            can_scroll_next: true,
        }
    }

    #[test]
    fn nearest_snap_prefers_lower_index_on_ties() {
        assert_eq!(nearest_snap(0.26, &SNAPS), Some(1));
        assert_eq!(nearest_snap(0.375, &SNAPS), Some(1));
        assert_eq!(nearest_snap(0.125, &SNAPS), Some(0));
        assert_eq!(nearest_snap(0.99, &SNAPS), Some(4));
        assert_eq!(nearest_snap(0.5, &[]), None);
    }

    #[test]
    fn even_snaps_cover_unit_interval() {
        assert_eq!(even_snaps(5), SNAPS.to_vec());
        assert_eq!(even_snaps(1), vec![0.0]);
        assert!(even_snaps(0).is_empty());
    }

    #[test]
    fn reports_only_changes_and_bounds_to_post_count() {
        let mut sync = SnapSynchronizer::default();
        sync.set_snaps(SNAPS.to_vec());
        assert_eq!(sync.on_settle(sample(0.26), 5, 5).index, Some(1));
        assert_eq!(sync.on_settle(sample(0.3), 5, 5).index, None);
        assert_eq!(sync.on_settle(sample(1.0), 3, 3).index, Some(2));
        assert_eq!(sync.on_settle(sample(0.5), 0, 0), SnapOutcome::default());
    }

    #[test]
    fn scroll_bursts_are_debounced() {
        let mut sync = SnapSynchronizer::new(ms(8));
        sync.set_snaps(SNAPS.to_vec());
        sync.on_scroll(ms(0), sample(0.1));
        sync.on_scroll(ms(3), sample(0.3));
        sync.on_scroll(ms(6), sample(0.55));
        assert_eq!(sync.poll(ms(10), 5, 5), None);
        let outcome = sync.poll(ms(14), 5, 5).unwrap();
        assert_eq!(outcome.index, Some(2));
        assert!(!sync.has_pending());
    }

    #[test]
    fn settle_supersedes_pending_scroll() {
        let mut sync = SnapSynchronizer::new(ms(8));
        sync.set_snaps(SNAPS.to_vec());
        sync.on_scroll(ms(0), sample(0.75));
        assert_eq!(sync.on_settle(sample(0.25), 5, 5).index, Some(1));
        assert_eq!(sync.poll(ms(20), 5, 5), None);
    }

    #[test]
    fn paginates_at_the_end_when_scrolling_is_exhausted() {
        let mut sync = SnapSynchronizer::default();
        sync.set_snaps(SNAPS.to_vec());
        let at_end = ScrollSample {
            progress: 1.0,
            can_scroll_next: false,
        };
        assert!(sync.on_settle(at_end, 5, 5).paginate);
        assert!(!sync.on_settle(sample(1.0), 5, 5).paginate);
        let before_end = ScrollSample {
            progress: 0.75,
            can_scroll_next: false,
        };
        assert!(!sync.on_settle(before_end, 5, 5).paginate);
    }
}
