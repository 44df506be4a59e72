use serde::{Deserialize, Serialize};

/// Descriptive statistics over one sample array. An empty sample yields
/// all zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation.
    pub std: f64,
    pub sum: f64,
    pub count: u64,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn stddev(values: &[f64], mean_value: f64) -> f64 {
    let variance = values
        .iter()
        .map(|v| {
            let diff = *v - mean_value;
            diff * diff
        })
        .sum::<f64>()
        / values.len() as f64;
    variance.sqrt()
}

fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub fn calc_stats(samples: &[f64]) -> SummaryStats {
    let Some(mean_value) = mean(samples) else {
        return SummaryStats::default();
    };
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    SummaryStats {
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean: mean_value,
        median: median(&sorted),
        std: stddev(samples, mean_value),
        sum: samples.iter().sum(),
        count: samples.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sample_is_all_zero() {
        assert_eq!(calc_stats(&[]), SummaryStats::default());
    }

    #[test]
    fn odd_sample() {
        let s = calc_stats(&[6.0, 2.0, 4.0]);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 6.0);
        assert_eq!(s.mean, 4.0);
        assert_eq!(s.median, 4.0);
        assert_eq!(s.sum, 12.0);
        assert_eq!(s.count, 3);
        assert!((s.std - 1.633).abs() < 1e-3);
    }

    #[test]
    fn even_sample_median_averages_middle_pair() {
        let s = calc_stats(&[1.0, 10.0, 3.0, 4.0]);
        assert_eq!(s.median, 3.5);
        assert_eq!(s.count, 4);
    }

    #[test]
    fn single_sample_has_zero_spread() {
        let s = calc_stats(&[7.5]);
        assert_eq!(s.std, 0.0);
        assert_eq!(s.median, 7.5);
        assert_eq!(s.min, s.max);
    }
}
