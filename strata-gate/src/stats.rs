//! Descriptive statistics over similarity scores
//!
//! All helpers take unsorted slices and return 0.0 for empty input.

use strata_core::OutlierMethod;

/// |z| above which a score is an outlier.
pub const Z_SCORE_LIMIT: f32 = 2.5;
/// MADs below the median at which a score is an outlier.
pub const MAD_LIMIT: f32 = 3.0;
/// IQRs below Q1 at which a score is an outlier.
pub const IQR_LIMIT: f32 = 1.5;

fn sorted(values: &[f32]) -> Vec<f32> {
    let mut v = values.to_vec();
    v.sort_by(f32::total_cmp);
    v
}

pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Population standard deviation.
pub fn std_dev(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / values.len() as f32;
    var.sqrt()
}

pub fn median(values: &[f32]) -> f32 {
    percentile(values, 50.0)
}

/// Median absolute deviation from the median.
pub fn mad(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let m = median(values);
    let deviations: Vec<f32> = values.iter().map(|v| (v - m).abs()).collect();
    median(&deviations)
}

/// Linearly interpolated percentile, `p` in [0, 100].
pub fn percentile(values: &[f32], p: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let v = sorted(values);
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (v.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f32;
    v[lo] + (v[hi] - v[lo]) * frac
}

/// First and third quartiles.
pub fn quartiles(values: &[f32]) -> (f32, f32) {
    (percentile(values, 25.0), percentile(values, 75.0))
}

/// Per-score outlier flags, parallel to `scores`.
///
/// MAD and IQR only flag the low tail. A batch with no spread has no
/// outliers.
pub fn outlier_flags(scores: &[f32], method: OutlierMethod) -> Vec<bool> {
    match method {
        OutlierMethod::ZScore => {
            let m = mean(scores);
            let sd = std_dev(scores);
            if sd <= f32::EPSILON {
                return vec![false; scores.len()];
            }
            scores
                .iter()
                .map(|s| ((s - m) / sd).abs() > Z_SCORE_LIMIT)
                .collect()
        }
        OutlierMethod::Mad => {
            let spread = mad(scores);
            if spread <= f32::EPSILON {
                return vec![false; scores.len()];
            }
            let floor = median(scores) - MAD_LIMIT * spread;
            scores.iter().map(|s| *s < floor).collect()
        }
        OutlierMethod::Iqr => {
            let (q1, q3) = quartiles(scores);
            let iqr = q3 - q1;
            if iqr <= f32::EPSILON {
                return vec![false; scores.len()];
            }
            let floor = q1 - IQR_LIMIT * iqr;
            scores.iter().map(|s| *s < floor).collect()
        }
    }
}

/// Index just after the largest drop in a descending score list.
///
/// Only a drop larger than the mean drop plus one standard deviation
/// counts; otherwise there is no elbow.
pub fn find_elbow(sorted_desc: &[f32]) -> Option<usize> {
    if sorted_desc.len() < 3 {
        return None;
    }
    let diffs: Vec<f32> = sorted_desc.windows(2).map(|w| w[0] - w[1]).collect();
    let (idx, largest) = diffs
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, d)| (i, *d))?;
    if largest > mean(&diffs) + std_dev(&diffs) {
        Some(idx + 1)
    } else {
        None
    }
}

/// Threshold suggested by the spread of `scores` under `method`.
pub fn statistical_threshold(scores: &[f32], method: OutlierMethod) -> f32 {
    match method {
        OutlierMethod::ZScore => mean(scores) - 0.5 * std_dev(scores),
        OutlierMethod::Mad => median(scores) - 1.5 * mad(scores),
        OutlierMethod::Iqr => {
            let (q1, q3) = quartiles(scores);
            q1 - 0.5 * (q3 - q1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn test_basic_moments() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&v) - 5.0).abs() < EPS);
        assert!((std_dev(&v) - 2.0).abs() < EPS);
        assert!((median(&v) - 4.5).abs() < EPS);
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(std_dev(&[1.0]), 0.0);
    }

    #[test]
    fn test_mad() {
        let v = [1.0, 1.0, 2.0, 2.0, 4.0, 6.0, 9.0];
        assert!((mad(&v) - 1.0).abs() < EPS);
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [0.0, 10.0, 20.0, 30.0, 40.0];
        assert!((percentile(&v, 0.0) - 0.0).abs() < EPS);
        assert!((percentile(&v, 100.0) - 40.0).abs() < EPS);
        assert!((percentile(&v, 25.0) - 10.0).abs() < EPS);
        assert!((percentile(&v, 10.0) - 4.0).abs() < EPS);
        assert_eq!(quartiles(&v), (10.0, 30.0));
    }

    #[test]
    fn test_outliers_low_tail() {
        let scores = [0.9, 0.88, 0.87, 0.86, 0.85, 0.1];
        assert_eq!(
            outlier_flags(&scores, OutlierMethod::Mad),
            vec![false, false, false, false, false, true]
        );
        assert_eq!(
            outlier_flags(&scores, OutlierMethod::Iqr),
            vec![false, false, false, false, false, true]
        );
    }

    #[test]
    fn test_z_score_outliers() {
        let mut scores = vec![0.5; 20];
        scores.push(0.99);
        let flags = outlier_flags(&scores, OutlierMethod::ZScore);
        assert!(flags[20]);
        assert!(flags[..20].iter().all(|f| !f));
    }

    #[test]
    fn test_flat_batch_has_no_outliers() {
        let scores = [0.5; 6];
        for method in [OutlierMethod::ZScore, OutlierMethod::Mad, OutlierMethod::Iqr] {
            assert!(outlier_flags(&scores, method).iter().all(|f| !f));
        }
    }

    #[test]
    fn test_elbow() {
        assert_eq!(find_elbow(&[0.95, 0.93, 0.91, 0.4, 0.38, 0.36]), Some(3));
        assert_eq!(find_elbow(&[1.0, 0.75, 0.5, 0.25, 0.0]), None);
        assert_eq!(find_elbow(&[0.9, 0.1]), None);
    }

    #[test]
    fn test_statistical_threshold() {
        let v = [0.2, 0.4, 0.6, 0.8];
        let z = statistical_threshold(&v, OutlierMethod::ZScore);
        assert!((z - (0.5 - 0.5 * std_dev(&v))).abs() < EPS);
        let iqr = statistical_threshold(&v, OutlierMethod::Iqr);
        let (q1, q3) = quartiles(&v);
        assert!((iqr - (q1 - 0.5 * (q3 - q1))).abs() < EPS);
    }
}
