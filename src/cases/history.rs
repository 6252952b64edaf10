//! Per-member case history summary

use crate::cases::{Case, HistoryBucket};

/// Embed colours, from a clean record to a long one
pub const HISTORY_COLORS: [u32; 7] = [
    8_450_847, 10_870_283, 13_091_073, 14_917_123, 16_152_591, 16_667_430, 16_462_404,
];

/// Counts of a member's cases per display bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistorySummary {
    pub warn: usize,
    pub restriction: usize,
    pub mute: usize,
    pub kick: usize,
    pub ban: usize,
}

impl HistorySummary {
    /// Tally cases into buckets; order does not matter
    pub fn from_cases<'a>(cases: impl IntoIterator<Item = &'a Case>) -> Self {
        let mut summary = Self::default();
        for case in cases {
            if let Some(bucket) = case.action.bucket() {
                *summary.count_mut(bucket) += 1;
            }
        }
        summary
    }

    fn count_mut(&mut self, bucket: HistoryBucket) -> &mut usize {
        match bucket {
            HistoryBucket::Warn => &mut self.warn,
            HistoryBucket::Restriction => &mut self.restriction,
            HistoryBucket::Mute => &mut self.mute,
            HistoryBucket::Kick => &mut self.kick,
            HistoryBucket::Ban => &mut self.ban,
        }
    }

    #[must_use]
    pub fn count(&self, bucket: HistoryBucket) -> usize {
        match bucket {
            HistoryBucket::Warn => self.warn,
            HistoryBucket::Restriction => self.restriction,
            HistoryBucket::Mute => self.mute,
            HistoryBucket::Kick => self.kick,
            HistoryBucket::Ban => self.ban,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.warn + self.restriction + self.mute + self.kick + self.ban
    }

    /// Severity tier, capped at the last colour
    #[must_use]
    pub fn color_index(&self) -> usize {
        self.total().min(HISTORY_COLORS.len() - 1)
    }

    #[must_use]
    pub fn color(&self) -> u32 {
        HISTORY_COLORS[self.color_index()]
    }

    /// `1 warning, 0 restrictions, 0 mutes, 2 kicks, and 1 ban.`
    #[must_use]
    pub fn footer(&self) -> String {
        let part = |bucket: HistoryBucket| {
            let count = self.count(bucket);
            let suffix = if count == 1 { "" } else { "s" };
            format!("{count} {bucket}{suffix}")
        };

        format!(
            "{}, {}, {}, {}, and {}.",
            part(HistoryBucket::Warn),
            part(HistoryBucket::Restriction),
            part(HistoryBucket::Mute),
            part(HistoryBucket::Kick),
            part(HistoryBucket::Ban)
        )
    }
}
