//! Per-target light-curve statistics.

use ndarray::ArrayView1;
use num_traits::Float;

use crate::error::StitchError;

/// Summary of one target's light curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetStatistics {
    /// Number of finite flux samples.
    pub npts: i64,
    /// Inverse-variance weighted mean of the finite samples, NaN when `npts == 0`.
    pub flux_mean: f64,
}

/// Computes `npts` and the `1/err²`-weighted mean flux for one target.
///
/// Only frames whose flux is finite contribute. An error on such a frame that is
/// zero, or squares to zero, is an error instead of an infinite weight. `target`
/// is used only for reporting.
pub fn inverse_variance_mean<T: Float>(
    target: usize,
    flux: ArrayView1<T>,
    err: ArrayView1<T>,
) -> Result<TargetStatistics, StitchError> {
    let mut npts: i64 = 0;
    let mut weighted_sum = T::zero();
    let mut weight_total = T::zero();

    for (frame, (&lc, &sigma)) in flux.iter().zip(err.iter()).enumerate() {
        if !lc.is_finite() {
            continue;
        }
        let weight = T::one() / (sigma * sigma);
        // `sigma` small enough to square to zero is as degenerate as zero itself.
        if weight.is_infinite() {
            return Err(StitchError::DegenerateWeight { target, frame });
        }
        weighted_sum = weighted_sum + lc * weight;
        weight_total = weight_total + weight;
        npts += 1;
    }

    let flux_mean = if npts > 0 {
        (weighted_sum / weight_total).to_f64().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    };

    Ok(TargetStatistics { npts, flux_mean })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_weighted_mean_skips_missing_samples() {
        let flux = array![100.0, f64::NAN, 200.0];
        let err = array![10.0, 5.0, 20.0];

        let stats = inverse_variance_mean(0, flux.view(), err.view()).unwrap();

        let expected = (100.0 / 100.0 + 200.0 / 400.0) / (1.0 / 100.0 + 1.0 / 400.0);
        assert_eq!(stats.npts, 2);
        assert!((stats.flux_mean - expected).abs() < 1e-9);
    }

    #[test]
    fn test_all_missing_gives_nan() {
        let flux = array![f64::NAN, f64::INFINITY, f64::NAN];
        let err = array![1.0, 1.0, 1.0];

        let stats = inverse_variance_mean(3, flux.view(), err.view()).unwrap();
        assert_eq!(stats.npts, 0);
        assert!(stats.flux_mean.is_nan());
    }

    #[test]
    fn test_zero_error_on_valid_frame_is_fatal() {
        let flux = array![1.0, 2.0];
        let err = array![1.0, 0.0];
        let result = inverse_variance_mean(7, flux.view(), err.view());
        assert!(matches!(
            result,
            Err(StitchError::DegenerateWeight { target: 7, frame: 1 })
        ));
    }

    #[test]
    fn test_error_that_squares_to_zero_is_fatal() {
        let flux = array![1.0, 2.0];
        let err = array![1e-200, 1.0];
        let result = inverse_variance_mean(0, flux.view(), err.view());
        assert!(matches!(
            result,
            Err(StitchError::DegenerateWeight { target: 0, frame: 0 })
        ));
    }

    #[test]
    fn test_zero_error_on_missing_frame_is_ignored() {
        let flux = array![f64::NAN, 4.0];
        let err = array![0.0, 2.0];
        let stats = inverse_variance_mean(0, flux.view(), err.view()).unwrap();
        assert_eq!(stats.npts, 1);
        assert_eq!(stats.flux_mean, 4.0);
    }

    #[test]
    fn test_single_precision_input() {
        let flux = array![2.0f32, 4.0f32];
        let err = array![1.0f32, 1.0f32];
        let stats = inverse_variance_mean(0, flux.view(), err.view()).unwrap();
        assert_eq!(stats.flux_mean, 3.0);
    }
}
