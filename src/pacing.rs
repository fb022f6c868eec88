use crate::config::HarvestSettings;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseKind {
    ScrollRound,
    CatalogPage,
    Item,
}

/// Politeness delays between requests against the remote catalog.
pub trait Pacer {
    fn pause(&mut self, kind: PauseKind);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub base_ms: u64,
    pub jitter_ms: u64,
}

/// Sleeps `base + uniform(0..=jitter)` for each pause.
#[derive(Debug, Clone)]
pub struct JitterPacer {
    scroll: Interval,
    page: Interval,
    item: Interval,
}

impl JitterPacer {
    pub fn from_settings(settings: &HarvestSettings) -> Self {
        Self {
            scroll: Interval {
                base_ms: settings.scroll_pause_ms,
                jitter_ms: settings.scroll_jitter_ms,
            },
            page: Interval {
                base_ms: settings.page_pause_ms,
                jitter_ms: settings.page_jitter_ms,
            },
            item: Interval {
                base_ms: settings.item_pause_ms,
                jitter_ms: settings.item_jitter_ms,
            },
        }
    }

    pub fn duration_for(&self, kind: PauseKind) -> Duration {
        let interval = match kind {
            PauseKind::ScrollRound => self.scroll,
            PauseKind::CatalogPage => self.page,
            PauseKind::Item => self.item,
        };
        let jitter = if interval.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=interval.jitter_ms)
        };
        Duration::from_millis(interval.base_ms + jitter)
    }
}

impl Pacer for JitterPacer {
    fn pause(&mut self, kind: PauseKind) {
        let d = self.duration_for(kind);
        if !d.is_zero() {
            std::thread::sleep(d);
        }
    }
}

/// Records requested pauses without sleeping.
#[derive(Debug, Clone, Default)]
pub struct NoPause {
    pub pauses: Vec<PauseKind>,
}

impl Pacer for NoPause {
    fn pause(&mut self, kind: PauseKind) {
        self.pauses.push(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_interval() {
        let settings = HarvestSettings {
            scroll_pause_ms: 900,
            scroll_jitter_ms: 700,
            item_pause_ms: 0,
            item_jitter_ms: 0,
            ..HarvestSettings::default()
        };
        let pacer = JitterPacer::from_settings(&settings);
        for _ in 0..50 {
            let d = pacer.duration_for(PauseKind::ScrollRound);
            assert!(d >= Duration::from_millis(900) && d <= Duration::from_millis(1600));
        }
        assert_eq!(pacer.duration_for(PauseKind::Item), Duration::ZERO);
    }

    #[test]
    fn no_pause_records_kinds() {
        let mut pacer = NoPause::default();
        pacer.pause(PauseKind::ScrollRound);
        pacer.pause(PauseKind::Item);
        assert_eq!(pacer.pauses, vec![PauseKind::ScrollRound, PauseKind::Item]);
    }
}
