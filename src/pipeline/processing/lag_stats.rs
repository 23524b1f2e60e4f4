use std::collections::BTreeMap;

use crate::pipeline::processing::enrich::AnnotatedRecord;

/// Submission lag summary for one group of records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LagStats {
    /// Records in the group with a known lag
    pub seq_count: u64,
    pub median: Option<f64>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub q1: Option<f64>,
    pub q3: Option<f64>,
}

impl LagStats {
    pub fn from_lags(mut lags: Vec<i64>) -> Self {
        lags.sort_unstable();
        Self {
            seq_count: lags.len() as u64,
            median: quantile(&lags, 0.5),
            min: lags.first().copied(),
            max: lags.last().copied(),
            q1: quantile(&lags, 0.25),
            q3: quantile(&lags, 0.75),
        }
    }
}

/// Quantile of sorted values with linear interpolation between the two
/// nearest ranks.
pub fn quantile(sorted: &[i64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let low = sorted[lower] as f64;
    let high = sorted[upper] as f64;
    Some(low + (high - low) * (position - lower as f64))
}

/// Lag statistics per group. Records whose key is `None` are skipped;
/// records without a lag still open their group but are not counted.
pub fn lag_stats_by<K, F>(records: &[AnnotatedRecord], key: F) -> BTreeMap<K, LagStats>
where
    K: Ord,
    F: Fn(&AnnotatedRecord) -> Option<K>,
{
    let mut groups: BTreeMap<K, Vec<i64>> = BTreeMap::new();
    for record in records {
        if let Some(k) = key(record) {
            let lags = groups.entry(k).or_default();
            lags.extend(record.lag_days);
        }
    }
    groups
        .into_iter()
        .map(|(k, lags)| (k, LagStats::from_lags(lags)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_quantiles() {
        let values = [1, 2, 3, 4];
        assert_eq!(quantile(&values, 0.5), Some(2.5));
        assert_eq!(quantile(&values, 0.25), Some(1.75));
        assert_eq!(quantile(&values, 0.75), Some(3.25));
        assert_eq!(quantile(&[7], 0.25), Some(7.0));
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_stats_keep_negative_lags() {
        let stats = LagStats::from_lags(vec![10, -3, 4]);
        assert_eq!(stats.seq_count, 3);
        assert_eq!(stats.min, Some(-3));
        assert_eq!(stats.max, Some(10));
        assert_eq!(stats.median, Some(4.0));
        assert_eq!(stats.q1, Some(0.5));
    }

    #[test]
    fn test_empty_group_has_no_values() {
        let stats = LagStats::from_lags(Vec::new());
        assert_eq!(stats.seq_count, 0);
        assert_eq!(stats.median, None);
        assert_eq!(stats.min, None);
    }
}
