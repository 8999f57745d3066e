//! Fixed-precision timing helpers.
//!
//! Every timing value leaving a prober is a [`Decimal`] number of milliseconds
//! with exactly two fractional digits, so stored and reloaded values compare
//! equal.

use std::time::Duration;

use rust_decimal::{Decimal, RoundingStrategy};

/// Fractional digits kept for timing and ratio values
pub const TIMING_SCALE: u32 = 2;

/// Round to the storage precision, keeping a fixed scale
pub fn fixed(value: Decimal) -> Decimal {
    let mut value = value.round_dp_with_strategy(TIMING_SCALE, RoundingStrategy::MidpointAwayFromZero);
    value.rescale(TIMING_SCALE);
    value
}

pub fn duration_ms(duration: Duration) -> Decimal {
    let micros = i128::try_from(duration.as_micros()).unwrap_or(i128::MAX);
    fixed(Decimal::from_i128_with_scale(micros, 3))
}

pub fn from_f64(value: f64) -> Option<Decimal> {
    Decimal::try_from(value).ok().map(fixed)
}

/// Min / max / mean of a sample set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSummary {
    pub min: Decimal,
    pub max: Decimal,
    pub avg: Decimal,
}

pub fn summarize(samples: &[Decimal]) -> Option<SampleSummary> {
    let first = *samples.first()?;
    let (min, max, sum) = samples.iter().fold((first, first, Decimal::ZERO), |(min, max, sum), s| {
        (min.min(*s), max.max(*s), sum + *s)
    });
    let avg = fixed(sum / Decimal::from(samples.len()));
    Some(SampleSummary { min: fixed(min), max: fixed(max), avg })
}

/// Successful units per second of wall-clock time
pub fn throughput(successful_units: u32, wall: Duration) -> Decimal {
    let micros = wall.as_micros().max(1);
    let micros = Decimal::from_i128_with_scale(i128::try_from(micros).unwrap_or(i128::MAX), 0);
    fixed(Decimal::from(successful_units) * Decimal::from(1_000_000) / micros)
}

/// Percentage with two decimals, `None` when nothing was counted
pub fn percentage(part: u64, whole: u64) -> Option<Decimal> {
    if whole == 0 {
        return None;
    }
    Some(fixed(Decimal::from(part) * Decimal::ONE_HUNDRED / Decimal::from(whole)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_duration_ms_rounds_to_hundredths() {
        assert_eq!(duration_ms(Duration::from_micros(12_345)), dec!(12.35));
        assert_eq!(duration_ms(Duration::from_micros(12_344)), dec!(12.34));
        assert_eq!(duration_ms(Duration::ZERO), dec!(0.00));
        assert_eq!(duration_ms(Duration::from_secs(2)).to_string(), "2000.00");
    }

    #[test]
    fn test_summarize_empty() {
        assert_eq!(summarize(&[]), None);
    }

    #[test]
    fn test_summarize_bounds_average() {
        let samples = [dec!(10.00), dec!(12.50), dec!(11.01), dec!(30.33)];
        let summary = summarize(&samples).unwrap();
        assert_eq!(summary.min, dec!(10.00));
        assert_eq!(summary.max, dec!(30.33));
        assert_eq!(summary.avg, dec!(15.96));
        assert!(summary.min <= summary.avg && summary.avg <= summary.max);
    }

    #[test]
    fn test_throughput_counts_only_successes() {
        assert_eq!(throughput(8, Duration::from_millis(500)), dec!(16.00));
        assert_eq!(throughput(0, Duration::from_millis(500)), dec!(0.00));
        assert!(throughput(1, Duration::ZERO) > Decimal::ZERO);
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(3, 4), Some(dec!(75.00)));
        assert_eq!(percentage(1, 3), Some(dec!(33.33)));
        assert_eq!(percentage(0, 0), None);
    }

    #[test]
    fn test_from_f64() {
        assert_eq!(from_f64(99.876), Some(dec!(99.88)));
        assert_eq!(from_f64(f64::NAN), None);
    }
}
