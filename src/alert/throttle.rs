use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Per-track and global alert cooldowns.
///
/// An alert passes when the global window since the last alert of any track
/// has elapsed and the per-track window since that track's last alert has
/// elapsed. Entries for tracks that no longer exist are dropped by [`prune`].
///
/// [`prune`]: AlertThrottle::prune
pub struct AlertThrottle {
    per_track: Duration,
    global: Duration,
    last_global: Option<Instant>,
    last_by_track: HashMap<u64, Instant>,
}

impl AlertThrottle {
    pub fn new(per_track: Duration, global: Duration) -> Self {
        Self {
            per_track,
            global,
            last_global: None,
            last_by_track: HashMap::new(),
        }
    }

    pub fn allow(&mut self, track_id: u64, now: Instant) -> bool {
        let elapsed = |since: Option<&Instant>, window: Duration| {
            since.map_or(true, |at| now.saturating_duration_since(*at) >= window)
        };
        if !elapsed(self.last_global.as_ref(), self.global)
            || !elapsed(self.last_by_track.get(&track_id), self.per_track)
        {
            return false;
        }
        self.last_global = Some(now);
        self.last_by_track.insert(track_id, now);
        true
    }

    /// Forget cooldowns of tracks not in `live`.
    pub fn prune(&mut self, live: impl IntoIterator<Item = u64>) {
        let live: HashSet<u64> = live.into_iter().collect();
        self.last_by_track.retain(|id, _| live.contains(id));
    }

    pub fn tracked(&self) -> usize {
        self.last_by_track.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_track_window() {
        let mut t = AlertThrottle::new(Duration::from_secs(5), Duration::ZERO);
        let start = Instant::now();
        assert!(t.allow(1, start));
        assert!(!t.allow(1, start + Duration::from_secs(4)));
        assert!(t.allow(2, start + Duration::from_secs(4)));
        assert!(t.allow(1, start + Duration::from_secs(5)));
    }

    #[test]
    fn global_window_spans_tracks() {
        let mut t = AlertThrottle::new(Duration::ZERO, Duration::from_secs(1));
        let start = Instant::now();
        assert!(t.allow(1, start));
        assert!(!t.allow(2, start + Duration::from_millis(500)));
        assert!(t.allow(2, start + Duration::from_secs(1)));
    }

    #[test]
    fn prune_drops_deleted_tracks() {
        let mut t = AlertThrottle::new(Duration::from_secs(60), Duration::ZERO);
        let start = Instant::now();
        t.allow(1, start);
        t.allow(2, start);
        t.prune([2]);
        assert_eq!(t.tracked(), 1);
        // Cooldown for track 1 was forgotten.
        assert!(t.allow(1, start + Duration::from_secs(1)));
        assert!(!t.allow(2, start + Duration::from_secs(1)));
    }
}
