//! Per-(camera, detection type) event deduplication.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use crate::taxonomy::DetectionType;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CooldownKey {
    pub camera: String,
    pub detection_type: DetectionType,
}

impl CooldownKey {
    pub fn new(camera: impl Into<String>, detection_type: DetectionType) -> Self {
        Self {
            camera: camera.into(),
            detection_type,
        }
    }
}

/// Last-emit times shared by all camera workers.
///
/// `should_emit` is a single check-and-set under the lock, so two callers
/// racing on the same key can never both emit inside one window.
#[derive(Debug)]
pub struct CooldownTracker {
    window: Duration,
    last_emit: Mutex<HashMap<CooldownKey, SystemTime>>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emit: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns true and records `now` when the key is outside its window.
    ///
    /// A clock that moved backwards (`now` earlier than the last emit) counts
    /// as no time elapsed.
    pub fn should_emit(&self, camera: &str, detection_type: DetectionType, now: SystemTime) -> bool {
        let key = CooldownKey::new(camera, detection_type);
        let mut map = self.lock();
        if let Some(last) = map.get(&key) {
            let elapsed = now.duration_since(*last).unwrap_or(Duration::ZERO);
            if elapsed < self.window {
                return false;
            }
        }
        map.insert(key, now);
        true
    }

    pub fn last_emit(&self, camera: &str, detection_type: DetectionType) -> Option<SystemTime> {
        self.lock()
            .get(&CooldownKey::new(camera, detection_type))
            .copied()
    }

    /// Copy of the current state, sorted by key.
    pub fn snapshot(&self) -> Vec<(CooldownKey, SystemTime)> {
        let mut entries: Vec<_> = self
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Drop keys whose window has fully elapsed at `now`.
    ///
    /// Such keys would emit anyway, so pruning never changes a decision.
    /// Returns the number of keys removed.
    pub fn prune(&self, now: SystemTime) -> usize {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, last| match now.duration_since(*last) {
            Ok(elapsed) => elapsed < self.window,
            Err(_) => true,
        });
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panicking holder cannot leave the map half-updated: every mutation
    // is a single insert or retain.
    fn lock(&self) -> MutexGuard<'_, HashMap<CooldownKey, SystemTime>> {
        self.last_emit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    #[test]
    fn first_detection_always_emits() {
        let tracker = CooldownTracker::default();
        assert!(tracker.should_emit("Front-Door", DetectionType::Person, at(0)));
        assert_eq!(
            tracker.last_emit("Front-Door", DetectionType::Person),
            Some(at(0))
        );
    }

    #[test]
    fn suppresses_inside_window_and_reopens_at_boundary() {
        let tracker = CooldownTracker::default();
        assert!(tracker.should_emit("cam", DetectionType::Person, at(0)));
        assert!(!tracker.should_emit("cam", DetectionType::Person, at(10)));
        assert!(!tracker.should_emit("cam", DetectionType::Person, at(59)));
        assert!(tracker.should_emit("cam", DetectionType::Person, at(60)));
        // Suppressed attempts never move the window.
        assert_eq!(tracker.last_emit("cam", DetectionType::Person), Some(at(60)));
    }

    #[test]
    fn keys_are_independent() {
        let tracker = CooldownTracker::default();
        assert!(tracker.should_emit("a", DetectionType::Person, at(0)));
        assert!(tracker.should_emit("a", DetectionType::Vehicle, at(1)));
        assert!(tracker.should_emit("b", DetectionType::Person, at(2)));
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn backwards_clock_suppresses() {
        let tracker = CooldownTracker::default();
        assert!(tracker.should_emit("cam", DetectionType::Animal, at(100)));
        assert!(!tracker.should_emit("cam", DetectionType::Animal, at(20)));
    }

    #[test]
    fn prune_drops_only_expired_keys() {
        let tracker = CooldownTracker::new(Duration::from_secs(30));
        tracker.should_emit("old", DetectionType::Person, at(0));
        tracker.should_emit("new", DetectionType::Person, at(50));
        assert_eq!(tracker.prune(at(60)), 1);
        let keys: Vec<_> = tracker
            .snapshot()
            .into_iter()
            .map(|(k, _)| k.camera)
            .collect();
        assert_eq!(keys, vec!["new".to_string()]);
    }

    #[test]
    fn concurrent_callers_emit_once_per_window() {
        let tracker = Arc::new(CooldownTracker::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || tracker.should_emit("cam", DetectionType::Person, at(5)))
            })
            .collect();
        let emitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|emitted| *emitted)
            .count();
        assert_eq!(emitted, 1);
    }
}
