//! Ordered deletion candidates plus the set of protected message ids.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};

/// A deletion candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveMessage {
    pub id: String,
    pub posted_at: DateTime<Utc>,
}

impl LiveMessage {
    pub fn new(id: impl Into<String>, posted_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            posted_at,
        }
    }
}

/// Candidates ordered oldest first, and the keep-set that exempts ids from
/// deletion.
///
/// Entries are only ever appended at the tail and popped from the head, so
/// `posted_at` stays non-decreasing front to back. The one exception,
/// [`LiveSet::remove`], deletes in place and cannot break the order.
#[derive(Debug, Default)]
pub struct LiveSet {
    messages: VecDeque<LiveMessage>,
    keep: HashSet<String>,
}

impl LiveSet {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn front(&self) -> Option<&LiveMessage> {
        self.messages.front()
    }

    pub fn back(&self) -> Option<&LiveMessage> {
        self.messages.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiveMessage> {
        self.messages.iter()
    }

    pub fn is_kept(&self, id: &str) -> bool {
        self.keep.contains(id)
    }

    pub fn keep_len(&self) -> usize {
        self.keep.len()
    }

    /// Rebuild both sets from scratch.
    ///
    /// Candidates that are in `keep` are dropped; the rest are ordered by
    /// posting time (stable, so equal timestamps keep their input order).
    pub fn rebuild(&mut self, mut candidates: Vec<LiveMessage>, keep: HashSet<String>) {
        candidates.retain(|m| !keep.contains(&m.id));
        candidates.sort_by_key(|m| m.posted_at);
        self.messages = candidates.into();
        self.keep = keep;
    }

    /// Swap in a new keep-set, returning the ids that are no longer kept,
    /// sorted for deterministic re-injection.
    pub fn replace_keep(&mut self, keep: HashSet<String>) -> Vec<String> {
        let mut released: Vec<String> = self
            .keep
            .iter()
            .filter(|id| !keep.contains(*id))
            .cloned()
            .collect();
        released.sort();
        self.keep = keep;
        released
    }

    /// Append at the tail.
    ///
    /// A `posted_at` older than the current tail is clamped up to the tail's
    /// time so the ordering invariant holds even with clock skew between the
    /// platform and this process. Returns the time actually recorded.
    pub fn push(&mut self, id: impl Into<String>, posted_at: DateTime<Utc>) -> DateTime<Utc> {
        let posted_at = match self.messages.back() {
            Some(tail) if tail.posted_at > posted_at => tail.posted_at,
            _ => posted_at,
        };
        self.messages.push_back(LiveMessage::new(id, posted_at));
        posted_at
    }

    pub fn pop_front(&mut self) -> Option<LiveMessage> {
        self.messages.pop_front()
    }

    /// Pop head entries that have since joined the keep-set.
    pub fn drop_kept_head(&mut self) -> usize {
        let mut dropped = 0;
        while self
            .messages
            .front()
            .is_some_and(|m| self.keep.contains(&m.id))
        {
            self.messages.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Whether `id` is a candidate (linear scan).
    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// Remove a candidate by id (linear scan).
    pub fn remove(&mut self, id: &str) -> Option<LiveMessage> {
        let idx = self.messages.iter().position(|m| m.id == id)?;
        self.messages.remove(idx)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.keep.clear();
    }

    /// Whether posting times are non-decreasing front to back.
    pub fn is_ordered(&self) -> bool {
        self.messages
            .iter()
            .zip(self.messages.iter().skip(1))
            .all(|(a, b)| a.posted_at <= b.posted_at)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::TimeDelta};

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(20_000) + TimeDelta::seconds(secs)
    }

    fn ids(set: &LiveSet) -> Vec<&str> {
        set.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn rebuild_sorts_and_excludes_kept() {
        let mut set = LiveSet::default();
        set.rebuild(
            vec![
                LiveMessage::new("c", t(3)),
                LiveMessage::new("a", t(1)),
                LiveMessage::new("pinned", t(2)),
                LiveMessage::new("b", t(2)),
            ],
            HashSet::from(["pinned".to_string()]),
        );
        assert_eq!(ids(&set), ["a", "b", "c"]);
        assert!(set.is_kept("pinned"));
        assert!(set.is_ordered());
    }

    #[test]
    fn push_clamps_to_tail() {
        let mut set = LiveSet::default();
        set.push("a", t(10));
        let recorded = set.push("b", t(5));
        assert_eq!(recorded, t(10));
        assert!(set.is_ordered());
        assert_eq!(set.back().unwrap().id, "b");
    }

    #[test]
    fn replace_keep_reports_released() {
        let mut set = LiveSet::default();
        set.rebuild(
            Vec::new(),
            HashSet::from(["x".to_string(), "y".to_string(), "z".to_string()]),
        );
        let released = set.replace_keep(HashSet::from(["y".to_string(), "w".to_string()]));
        assert_eq!(released, ["x", "z"]);
        assert!(set.is_kept("w"));
        assert!(!set.is_kept("x"));
    }

    #[test]
    fn drop_kept_head_stops_at_first_candidate() {
        let mut set = LiveSet::default();
        set.rebuild(
            vec![
                LiveMessage::new("a", t(1)),
                LiveMessage::new("b", t(2)),
                LiveMessage::new("c", t(3)),
            ],
            HashSet::new(),
        );
        set.replace_keep(HashSet::from(["a".to_string(), "c".to_string()]));
        assert_eq!(set.drop_kept_head(), 1);
        assert_eq!(ids(&set), ["b", "c"]);
    }

    #[test]
    fn remove_by_id() {
        let mut set = LiveSet::default();
        set.push("a", t(1));
        set.push("b", t(2));
        set.push("c", t(3));
        assert_eq!(set.remove("b").unwrap().id, "b");
        assert!(set.remove("missing").is_none());
        assert_eq!(ids(&set), ["a", "c"]);
        assert!(set.is_ordered());
    }
}
