//! Per-subscription revalidation settings.

use std::time::Duration;

use tally_core::AppConfig;

/// How one subscriber wants its key kept fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerPolicy {
    /// Polling period. `Duration::ZERO` disables polling.
    pub refresh_interval: Duration,
    pub revalidate_on_focus: bool,
    pub revalidate_on_reconnect: bool,
    /// Calls completing within this window suppress further automatic calls.
    pub deduping_interval: Duration,
}

impl Default for ConsumerPolicy {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::ZERO,
            revalidate_on_focus: true,
            revalidate_on_reconnect: true,
            deduping_interval: Duration::from_secs(2),
        }
    }
}

impl ConsumerPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            refresh_interval: Duration::from_millis(config.poll_interval_ms),
            deduping_interval: Duration::from_millis(config.dedupe_interval_ms),
            ..Default::default()
        }
    }

    pub fn polling(every: Duration) -> Self {
        Self { refresh_interval: every, ..Default::default() }
    }
}

/// What asked for a revalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// First subscriber attached to a key with no value.
    Mount,
    /// Polling timer.
    Tick,
    Focus,
    Reconnect,
    /// Explicit `mutate(.., true)`. The only trigger that ignores the dedup window.
    Mutate,
}

impl Trigger {
    pub fn respects_dedup(self) -> bool {
        !matches!(self, Trigger::Mutate)
    }
}

/// The effective policy of a key with several subscribers.
///
/// Polls at the shortest non-zero interval, dedups with the longest window,
/// and reacts to focus/reconnect if any subscriber asked for it.
pub(crate) fn merge<'a>(policies: impl IntoIterator<Item = &'a ConsumerPolicy>) -> Option<ConsumerPolicy> {
    policies.into_iter().copied().reduce(|acc, p| ConsumerPolicy {
        refresh_interval: match (acc.refresh_interval.is_zero(), p.refresh_interval.is_zero()) {
            (true, _) => p.refresh_interval,
            (_, true) => acc.refresh_interval,
            _ => acc.refresh_interval.min(p.refresh_interval),
        },
        revalidate_on_focus: acc.revalidate_on_focus || p.revalidate_on_focus,
        revalidate_on_reconnect: acc.revalidate_on_reconnect || p.revalidate_on_reconnect,
        deduping_interval: acc.deduping_interval.max(p.deduping_interval),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = AppConfig { poll_interval_ms: 10_000, dedupe_interval_ms: 1_000, ..Default::default() };
        let policy = ConsumerPolicy::from_config(&config);
        assert_eq!(policy.refresh_interval, Duration::from_secs(10));
        assert_eq!(policy.deduping_interval, Duration::from_secs(1));
        assert!(policy.revalidate_on_focus);
    }

    #[test]
    fn test_merge_policies() {
        let a = ConsumerPolicy {
            refresh_interval: Duration::ZERO,
            revalidate_on_focus: false,
            revalidate_on_reconnect: false,
            deduping_interval: Duration::from_secs(5),
        };
        let b = ConsumerPolicy {
            refresh_interval: Duration::from_secs(30),
            revalidate_on_focus: true,
            revalidate_on_reconnect: false,
            deduping_interval: Duration::from_secs(1),
        };
        let c = ConsumerPolicy::polling(Duration::from_secs(10));

        let merged = merge([&a, &b, &c]).unwrap();
        assert_eq!(merged.refresh_interval, Duration::from_secs(10));
        assert!(merged.revalidate_on_focus);
        assert!(merged.revalidate_on_reconnect);
        assert_eq!(merged.deduping_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_merge_empty() {
        assert!(merge(std::iter::empty()).is_none());
    }

    #[test]
    fn test_only_mutate_skips_dedup() {
        assert!(!Trigger::Mutate.respects_dedup());
        assert!(Trigger::Tick.respects_dedup());
        assert!(Trigger::Focus.respects_dedup());
    }
}
