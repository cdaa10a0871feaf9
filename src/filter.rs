use anyhow::Result;

use crate::frame::FrameMeta;

/// In-place transform from the raw samples to the filtered samples.
///
/// The session hands the filter a `filtered` slice that already holds a fresh
/// copy of `raw`, so implementations may either overwrite every sample or
/// only touch the ones they care about. `raw` is read-only by construction.
///
/// `C` is a caller-owned context value threaded through every call.
pub trait Filter<C: ?Sized = ()> {
    /// Filter identifier, used in log lines.
    fn name(&self) -> &'static str {
        "custom"
    }

    fn apply(&self, meta: &FrameMeta, raw: &[u16], filtered: &mut [u16], ctx: &mut C)
        -> Result<()>;
}

/// Default filter: subtract the dark-pixel mean, clamping at zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct DarkSubtraction;

impl<C: ?Sized> Filter<C> for DarkSubtraction {
    fn name(&self) -> &'static str {
        "dark-subtraction"
    }

    fn apply(
        &self,
        meta: &FrameMeta,
        raw: &[u16],
        filtered: &mut [u16],
        _ctx: &mut C,
    ) -> Result<()> {
        for (out, &sample) in filtered.iter_mut().zip(raw) {
            *out = sample.saturating_sub(meta.dark_mean);
        }
        Ok(())
    }
}

/// Dark subtraction followed by zeroing everything below `level`.
#[derive(Clone, Copy, Debug)]
pub struct ThresholdFilter {
    pub level: u16,
}

impl ThresholdFilter {
    pub fn new(level: u16) -> Self {
        Self { level }
    }
}

impl<C: ?Sized> Filter<C> for ThresholdFilter {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn apply(
        &self,
        meta: &FrameMeta,
        raw: &[u16],
        filtered: &mut [u16],
        _ctx: &mut C,
    ) -> Result<()> {
        for (out, &sample) in filtered.iter_mut().zip(raw) {
            let value = sample.saturating_sub(meta.dark_mean);
            *out = if value < self.level { 0 } else { value };
        }
        Ok(())
    }
}

/// Adapter turning a closure into a [`Filter`].
pub struct FnFilter<F>(pub F);

impl<C: ?Sized, F> Filter<C> for FnFilter<F>
where
    F: Fn(&FrameMeta, &[u16], &mut [u16], &mut C) -> Result<()>,
{
    fn apply(
        &self,
        meta: &FrameMeta,
        raw: &[u16],
        filtered: &mut [u16],
        ctx: &mut C,
    ) -> Result<()> {
        (self.0)(meta, raw, filtered, ctx)
    }
}

/// The filter currently installed on a session.
pub(crate) enum FilterSlot<C> {
    Default,
    Custom(Box<dyn Filter<C> + Send>),
    Disabled,
}

impl<C> FilterSlot<C> {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            FilterSlot::Default => Filter::<C>::name(&DarkSubtraction),
            FilterSlot::Custom(filter) => filter.name(),
            FilterSlot::Disabled => "disabled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(dark_mean: u16) -> FrameMeta {
        FrameMeta {
            timestamp: 0,
            dark_mean,
            sequence: 1,
        }
    }

    #[test]
    fn dark_subtraction_clamps_at_zero() {
        let raw = [5u16, 20, 200, 3];
        let mut filtered = raw;
        DarkSubtraction
            .apply(&meta(5), &raw, &mut filtered, &mut ())
            .unwrap();
        assert_eq!(filtered, [0, 15, 195, 0]);
        assert_eq!(raw, [5, 20, 200, 3]);
    }

    #[test]
    fn threshold_filter_zeroes_weak_samples() {
        let raw = [10u16, 30, 60, 500];
        let mut filtered = raw;
        ThresholdFilter::new(40)
            .apply(&meta(10), &raw, &mut filtered, &mut ())
            .unwrap();
        assert_eq!(filtered, [0, 0, 50, 490]);
    }

    #[test]
    fn closure_filter_sees_context() {
        let filter = FnFilter(
            |_: &FrameMeta, raw: &[u16], out: &mut [u16], gain: &mut u16| -> Result<()> {
                for (o, &r) in out.iter_mut().zip(raw) {
                    *o = r * *gain;
                }
                *gain += 1;
                Ok(())
            },
        );
        let raw = [1u16, 2, 3];
        let mut filtered = [0u16; 3];
        let mut gain = 2u16;
        filter.apply(&meta(0), &raw, &mut filtered, &mut gain).unwrap();
        assert_eq!(filtered, [2, 4, 6]);
        assert_eq!(gain, 3);
    }
}
