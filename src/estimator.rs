use anyhow::Result;

use crate::frame::FrameMeta;

/// Value returned by the shipped estimators when no pixel qualifies.
pub const NO_PEAK: f64 = f64::NAN;

/// Multiple of the dark mean a pixel must reach to count as signal.
pub const DARK_THRESHOLD_FACTOR: f64 = 3.0;

/// Reduction of the filtered samples to one scalar measurement.
pub trait Estimator<C: ?Sized = ()> {
    /// Estimator identifier, used in log lines.
    fn name(&self) -> &'static str {
        "custom"
    }

    fn estimate(&self, meta: &FrameMeta, filtered: &[u16], ctx: &mut C) -> Result<f64>;
}

fn dark_threshold(meta: &FrameMeta) -> f64 {
    DARK_THRESHOLD_FACTOR * f64::from(meta.dark_mean)
}

/// Default estimator: intensity-weighted centroid of the pixels at or above
/// three times the dark mean. Returns [`NO_PEAK`] when nothing qualifies.
#[derive(Clone, Copy, Debug, Default)]
pub struct CentroidEstimator;

impl<C: ?Sized> Estimator<C> for CentroidEstimator {
    fn name(&self) -> &'static str {
        "centroid"
    }

    fn estimate(&self, meta: &FrameMeta, filtered: &[u16], _ctx: &mut C) -> Result<f64> {
        let threshold = dark_threshold(meta);
        let (weighted, total) = filtered
            .iter()
            .enumerate()
            .map(|(i, &v)| (i as f64, f64::from(v)))
            .filter(|&(_, v)| v >= threshold)
            .fold((0.0, 0.0), |(ws, s), (i, v)| (ws + i * v, s + v));

        if total <= 0.0 {
            return Ok(NO_PEAK);
        }
        Ok(weighted / total)
    }
}

/// Brightest pixel refined with a three-point parabola fit.
///
/// Returns [`NO_PEAK`] when the maximum does not reach the dark threshold.
#[derive(Clone, Copy, Debug, Default)]
pub struct PeakEstimator;

impl<C: ?Sized> Estimator<C> for PeakEstimator {
    fn name(&self) -> &'static str {
        "peak"
    }

    fn estimate(&self, meta: &FrameMeta, filtered: &[u16], _ctx: &mut C) -> Result<f64> {
        // max_by_key keeps the last maximum; we want the first.
        let Some((idx, &peak)) = filtered
            .iter()
            .enumerate()
            .rev()
            .max_by_key(|&(_, &v)| v)
        else {
            return Ok(NO_PEAK);
        };
        if peak == 0 || f64::from(peak) < dark_threshold(meta) {
            return Ok(NO_PEAK);
        }
        if idx == 0 || idx + 1 >= filtered.len() {
            return Ok(idx as f64);
        }

        let left = f64::from(filtered[idx - 1]);
        let center = f64::from(peak);
        let right = f64::from(filtered[idx + 1]);
        let denom = left - 2.0 * center + right;
        if denom.abs() < f64::EPSILON {
            return Ok(idx as f64);
        }
        let offset = 0.5 * (left - right) / denom;
        Ok(idx as f64 + offset.clamp(-0.5, 0.5))
    }
}

/// Adapter turning a closure into an [`Estimator`].
pub struct FnEstimator<F>(pub F);

impl<C: ?Sized, F> Estimator<C> for FnEstimator<F>
where
    F: Fn(&FrameMeta, &[u16], &mut C) -> Result<f64>,
{
    fn estimate(&self, meta: &FrameMeta, filtered: &[u16], ctx: &mut C) -> Result<f64> {
        (self.0)(meta, filtered, ctx)
    }
}

/// The estimator currently installed on a session. Never empty.
pub(crate) enum EstimatorSlot<C> {
    Default,
    Custom(Box<dyn Estimator<C> + Send>),
}

impl<C> EstimatorSlot<C> {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            EstimatorSlot::Default => Estimator::<C>::name(&CentroidEstimator),
            EstimatorSlot::Custom(estimator) => estimator.name(),
        }
    }
}
