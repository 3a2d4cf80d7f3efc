//! Retention evaluation: when is the next deletion due, and what goes.

use {
    autodelete_common::time::{saturating_add, saturating_sub},
    autodelete_config::RetentionTuning,
    chrono::{DateTime, Utc},
};

use crate::{live_set::LiveMessage, state::ChannelState};

/// Outcome of [`crate::ManagedChannel::collect_deletable`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collected {
    /// Ids to hand to the deletion executor, oldest first.
    pub ids: Vec<String>,
    /// The pass emptied a large part of a full backlog window; older messages
    /// beyond the window may exist and a backlog load is worth queueing.
    pub should_resync: bool,
    /// The channel was disabled and must be dropped by the scheduler.
    pub disabled: bool,
}

impl ChannelState {
    pub(crate) fn next_deletion_time(
        &mut self,
        now: DateTime<Utc>,
        tuning: &RetentionTuning,
    ) -> DateTime<Utc> {
        let idle = saturating_add(now, tuning.idle_horizon());

        self.live.drop_kept_head();
        let Some(head) = self.live.front() else {
            return idle;
        };

        if self.policy.count_active() && self.live.len() > self.policy.max_messages {
            return self.min_next_delete;
        }
        if self.policy.age_active() {
            let due = saturating_add(head.posted_at, self.policy.live_time);
            return due.max(self.min_next_delete);
        }
        idle
    }

    pub(crate) fn collect_deletable(
        &mut self,
        now: DateTime<Utc>,
        tuning: &RetentionTuning,
    ) -> Collected {
        self.min_next_delete = saturating_add(now, tuning.min_delete_interval());

        if self.killed {
            return Collected {
                disabled: true,
                ..Collected::default()
            };
        }

        let live_before = self.live.len();
        let mut batch = Batch::default();

        if self.policy.count_active() {
            while self.live.len() > self.policy.max_messages {
                let Some(message) = self.live.pop_front() else {
                    break;
                };
                batch.take(message, &self.live);
            }
        }

        if self.policy.age_active() {
            let cutoff = saturating_sub(now, self.policy.live_time);
            let mut expired = 0;
            while let Some(message) = self.pop_front_before(cutoff) {
                if batch.take(message, &self.live) {
                    expired += 1;
                }
            }

            // Messages posted in a burst expire together.
            if expired > 0
                && let Some(anchor) = batch.oldest
            {
                let window_end = saturating_add(anchor, tuning.coalesce_window());
                while let Some(message) = self.pop_front_before(window_end) {
                    batch.take(message, &self.live);
                }
            }
        }

        let should_resync = live_before as f64 >= tuning.reload_live_threshold()
            && batch.ids.len() as f64 > tuning.reload_delete_threshold();

        Collected {
            ids: batch.ids,
            should_resync,
            disabled: false,
        }
    }

    fn pop_front_before(&mut self, cutoff: DateTime<Utc>) -> Option<LiveMessage> {
        if self.live.front()?.posted_at < cutoff {
            self.live.pop_front()
        } else {
            None
        }
    }
}

#[derive(Default)]
struct Batch {
    ids: Vec<String>,
    oldest: Option<DateTime<Utc>>,
}

impl Batch {
    /// Collect a popped entry unless it is kept. Returns whether it was taken.
    fn take(&mut self, message: LiveMessage, live: &crate::live_set::LiveSet) -> bool {
        if live.is_kept(&message.id) {
            return false;
        }
        self.oldest.get_or_insert(message.posted_at);
        self.ids.push(message.id);
        true
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{live_set::LiveMessage, state::RetentionPolicy},
        chrono::TimeDelta,
        std::{collections::HashSet, time::Duration},
    };

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn at_ms(ms: i64) -> DateTime<Utc> {
        base() + TimeDelta::milliseconds(ms)
    }

    fn at_min(min: i64) -> DateTime<Utc> {
        base() + TimeDelta::minutes(min)
    }

    fn state(policy: RetentionPolicy, messages: &[(&str, DateTime<Utc>)]) -> ChannelState {
        let mut state = ChannelState::new(policy, base());
        state.live.rebuild(
            messages
                .iter()
                .map(|(id, ts)| LiveMessage::new(*id, *ts))
                .collect(),
            HashSet::new(),
        );
        state
    }

    fn count_policy(max: usize) -> RetentionPolicy {
        RetentionPolicy {
            max_messages: max,
            ..Default::default()
        }
    }

    fn age_policy(live_time: Duration) -> RetentionPolicy {
        RetentionPolicy {
            live_time,
            ..Default::default()
        }
    }

    #[test]
    fn count_limit_collects_oldest_overflow() {
        let tuning = RetentionTuning::default();
        let mut st = state(count_policy(3), &[
            ("1", at_min(0)),
            ("2", at_min(1)),
            ("3", at_min(2)),
            ("4", at_min(3)),
            ("5", at_min(4)),
        ]);

        let out = st.collect_deletable(at_min(5), &tuning);
        assert_eq!(out.ids, ["1", "2"]);
        assert!(!out.disabled);
        assert_eq!(st.live.len(), 3);
        assert_eq!(st.live.front().unwrap().id, "3");
    }

    #[test]
    fn age_limit_collects_expired_then_later_ones() {
        let tuning = RetentionTuning::default();
        let mut st = state(age_policy(Duration::from_secs(600)), &[
            ("t0", at_min(0)),
            ("t1", at_min(1)),
            ("t2", at_min(2)),
        ]);

        let out = st.collect_deletable(at_min(11), &tuning);
        assert_eq!(out.ids, ["t0"]);

        let out = st.collect_deletable(at_min(12), &tuning);
        assert_eq!(out.ids, ["t1"]);

        let out = st.collect_deletable(at_min(12) + TimeDelta::seconds(1), &tuning);
        assert_eq!(out.ids, ["t2"]);
        assert!(st.live.is_empty());
    }

    #[test]
    fn burst_is_coalesced() {
        let tuning = RetentionTuning::default();
        let mut st = state(age_policy(Duration::from_secs(600)), &[
            ("a", at_ms(0)),
            ("b", at_ms(500)),
            ("c", at_ms(1_400)),
            ("d", at_ms(1_500)),
            ("e", at_ms(5_000)),
        ]);

        // Only "a" is past the cutoff, but b and c fall inside its window.
        let out = st.collect_deletable(at_ms(600_100), &tuning);
        assert_eq!(out.ids, ["a", "b", "c"]);
        assert_eq!(st.live.len(), 2);
    }

    #[test]
    fn no_coalescing_without_age_expiry() {
        let tuning = RetentionTuning::default();
        let mut policy = count_policy(1);
        policy.live_time = Duration::from_secs(600);
        let mut st = state(policy, &[("a", at_ms(0)), ("b", at_ms(100))]);

        let out = st.collect_deletable(at_ms(1_000), &tuning);
        assert_eq!(out.ids, ["a"]);
        assert_eq!(st.live.front().unwrap().id, "b");
    }

    #[test]
    fn kept_ids_are_never_collected() {
        let tuning = RetentionTuning::default();
        let mut st = state(count_policy(1), &[
            ("1", at_min(0)),
            ("2", at_min(1)),
            ("3", at_min(2)),
        ]);
        st.live.replace_keep(HashSet::from(["1".to_string()]));

        let out = st.collect_deletable(at_min(3), &tuning);
        assert_eq!(out.ids, ["2"]);
        assert!(!out.ids.iter().any(|id| st.live.is_kept(id)));
        assert_eq!(st.live.len(), 1);
    }

    #[test]
    fn killed_channel_reports_disabled() {
        let tuning = RetentionTuning::default();
        let mut st = state(count_policy(1), &[("1", at_min(0)), ("2", at_min(1))]);
        st.killed = true;

        let out = st.collect_deletable(at_min(2), &tuning);
        assert!(out.disabled);
        assert!(out.ids.is_empty());
    }

    #[test]
    fn collection_sets_delete_floor() {
        let tuning = RetentionTuning::default();
        let mut st = state(count_policy(1), &[
            ("1", at_min(0)),
            ("2", at_min(1)),
            ("3", at_min(2)),
        ]);
        let now = at_min(3);
        st.collect_deletable(now, &tuning);
        st.live.push("4", now);

        assert_eq!(
            st.next_deletion_time(now, &tuning),
            now + TimeDelta::seconds(5)
        );
    }

    #[test]
    fn next_deletion_age_respects_floor() {
        let tuning = RetentionTuning::default();
        let mut st = state(age_policy(Duration::from_secs(60)), &[("a", at_ms(0))]);

        assert_eq!(
            st.next_deletion_time(at_ms(0), &tuning),
            at_ms(60_000)
        );

        st.collect_deletable(at_ms(59_000), &tuning);
        assert_eq!(
            st.next_deletion_time(at_ms(59_000), &tuning),
            at_ms(64_000)
        );
    }

    #[test]
    fn next_deletion_idle_when_empty_or_inactive() {
        let tuning = RetentionTuning::default();
        let now = at_min(0);
        let idle = now + TimeDelta::hours(240);

        let mut empty = state(count_policy(1), &[]);
        assert_eq!(empty.next_deletion_time(now, &tuning), idle);

        let mut under = state(count_policy(5), &[("a", at_min(0))]);
        assert_eq!(under.next_deletion_time(now, &tuning), idle);

        let mut inactive = state(RetentionPolicy::default(), &[("a", at_min(0))]);
        assert_eq!(inactive.next_deletion_time(now, &tuning), idle);
    }

    #[test]
    fn next_deletion_drops_newly_kept_head() {
        let tuning = RetentionTuning::default();
        let mut st = state(age_policy(Duration::from_secs(60)), &[
            ("pinned", at_ms(0)),
            ("b", at_ms(10_000)),
        ]);
        st.live.replace_keep(HashSet::from(["pinned".to_string()]));

        assert_eq!(
            st.next_deletion_time(at_ms(0), &tuning),
            at_ms(70_000)
        );
        assert_eq!(st.live.len(), 1);
    }

    #[test]
    fn large_pass_over_full_window_suggests_resync() {
        let tuning = RetentionTuning::default();
        let messages: Vec<(String, DateTime<Utc>)> =
            (0..90).map(|i| (format!("m{i}"), at_min(i))).collect();
        let refs: Vec<(&str, DateTime<Utc>)> =
            messages.iter().map(|(id, ts)| (id.as_str(), *ts)).collect();

        let mut full = state(count_policy(10), &refs);
        let out = full.collect_deletable(at_min(100), &tuning);
        assert_eq!(out.ids.len(), 80);
        assert!(out.should_resync);

        let mut partial = state(count_policy(10), &refs[..50]);
        let out = partial.collect_deletable(at_min(100), &tuning);
        assert_eq!(out.ids.len(), 40);
        assert!(!out.should_resync);

        let mut small_pass = state(count_policy(70), &refs);
        let out = small_pass.collect_deletable(at_min(100), &tuning);
        assert_eq!(out.ids.len(), 20);
        assert!(!out.should_resync);
    }

    #[test]
    fn order_survives_collection() {
        let tuning = RetentionTuning::default();
        let mut st = state(count_policy(2), &[
            ("1", at_min(0)),
            ("2", at_min(1)),
            ("3", at_min(2)),
        ]);
        st.collect_deletable(at_min(3), &tuning);
        st.live.push("4", at_min(4));
        st.live.push("5", at_min(4));
        assert!(st.live.is_ordered());
    }
}
