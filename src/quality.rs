//! Batch quality scoring.
//!
//! The score is a 0–100 metric combining validity ratio and warning volume:
//! `max(0, round(valid_pct − min(warnings, 20)))`. An empty batch scores 0;
//! a fully valid batch with no warnings scores 100.

use crate::config::QualityThresholds;

/// Band a score falls into, per the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityBand {
    High,
    Medium,
    Low,
    Poor,
}

/// Compute the quality score for a batch.
pub fn score(valid: usize, invalid: usize, warning_count: usize) -> u8 {
    let total = valid + invalid;
    if total == 0 {
        return 0;
    }
    let valid_pct = valid as f64 / total as f64 * 100.0;
    let penalty = warning_count.min(20) as f64;
    (valid_pct - penalty).round().max(0.0) as u8
}

/// Classify a score against the configured bands.
pub fn band(score: u8, thresholds: &QualityThresholds) -> QualityBand {
    if score >= thresholds.high {
        QualityBand::High
    } else if score >= thresholds.medium {
        QualityBand::Medium
    } else if score >= thresholds.low {
        QualityBand::Low
    } else {
        QualityBand::Poor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_scores_zero() {
        assert_eq!(score(0, 0, 0), 0);
    }

    #[test]
    fn fully_valid_no_warnings_scores_hundred() {
        assert_eq!(score(50, 0, 0), 100);
    }

    #[test]
    fn warnings_penalize_up_to_twenty_points() {
        assert_eq!(score(100, 0, 5), 95);
        assert_eq!(score(100, 0, 20), 80);
        assert_eq!(score(100, 0, 500), 80);
    }

    #[test]
    fn score_never_underflows() {
        assert_eq!(score(1, 99, 20), 0);
    }

    #[test]
    fn half_valid_rounds() {
        // 2/3 valid = 66.67 → 67 after rounding.
        assert_eq!(score(2, 1, 0), 67);
    }

    #[test]
    fn bands_follow_thresholds() {
        let t = QualityThresholds::default();
        assert_eq!(band(95, &t), QualityBand::High);
        assert_eq!(band(75, &t), QualityBand::Medium);
        assert_eq!(band(55, &t), QualityBand::Low);
        assert_eq!(band(10, &t), QualityBand::Poor);
    }
}
