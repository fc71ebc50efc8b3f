// Time slicing: turns an irregular per-host series into exactly one value per
// fixed-width slice of a window, filling empty slices by metric kind.
// Pure; no I/O.

use std::collections::BTreeMap;

use crate::models::{MetricKind, TimeSeries};

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlice {
    pub start: i64,
    pub end: i64,
}

impl TimeSlice {
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

/// Partitions `[window_start, window_end)` into contiguous slices of `width` ms.
/// A trailing remainder shorter than `width` is not sliced.
pub fn time_slices(window_start: i64, window_end: i64, width: i64) -> Vec<TimeSlice> {
    if width <= 0 || window_end <= window_start {
        return Vec::new();
    }
    let n = (window_end - window_start) / width;
    (0..n)
        .map(|i| {
            let start = window_start + i * width;
            TimeSlice {
                start,
                end: start + width,
            }
        })
        .collect()
}

/// Convenience wrapper: slice `series` over `[window_start, window_end)`.
pub fn slice_window(
    series: &TimeSeries,
    window_start: i64,
    window_end: i64,
    width: i64,
) -> BTreeMap<i64, f64> {
    slice_series(series, &time_slices(window_start, window_end, width))
}

/// One value per slice, keyed by slice end timestamp.
///
/// Samples inside a slice: the latest one wins. Empty slices are filled by the
/// series kind (see [`gauge_fill`] and [`counter_fill`]). When no sample falls
/// inside the window at all, every slice is painted with the latest sample
/// before the window, or failing that the earliest one after it. A series with
/// no usable samples produces an empty map.
pub fn slice_series(series: &TimeSeries, slices: &[TimeSlice]) -> BTreeMap<i64, f64> {
    let mut out = BTreeMap::new();
    let (Some(first), Some(last)) = (slices.first(), slices.last()) else {
        return out;
    };
    let window_start = first.start;
    let window_end = last.end;
    let width = first.end - first.start;

    let mut known: Vec<Option<f64>> = vec![None; slices.len()];
    let mut before: Option<(i64, f64)> = None;
    let mut after: Option<(i64, f64)> = None;
    let mut points: Vec<(i64, f64)> = Vec::with_capacity(series.points.len());

    for &(ts, value) in &series.points {
        if !value.is_finite() {
            continue;
        }
        match points.last_mut() {
            Some(prev) if prev.0 == ts => prev.1 = value,
            _ => points.push((ts, value)),
        }
        if ts < window_start {
            before = Some((ts, value));
        } else if ts >= window_end {
            if after.is_none() {
                after = Some((ts, value));
            }
        } else {
            let idx = ((ts - window_start) / width) as usize;
            known[idx] = Some(value);
        }
    }

    if known.iter().all(Option::is_none) {
        if let Some((_, value)) = before.or(after) {
            for s in slices {
                out.insert(s.end, value);
            }
        }
        return out;
    }

    let ctx = FillContext {
        slices,
        known: &known,
        before,
        after,
        points: &points,
    };
    let fill = filler(series.kind);
    for (i, slice) in slices.iter().enumerate() {
        let value = match known[i] {
            Some(v) => Some(v),
            None => fill(&ctx, i),
        };
        if let Some(v) = value {
            out.insert(slice.end, v);
        }
    }
    out
}

/// What a fill rule may look at when estimating one empty slice.
pub struct FillContext<'a> {
    pub slices: &'a [TimeSlice],
    /// Per-slice value from samples inside the slice.
    pub known: &'a [Option<f64>],
    /// Latest sample strictly before the window.
    pub before: Option<(i64, f64)>,
    /// Earliest sample at or after the window end.
    pub after: Option<(i64, f64)>,
    /// Every finite sample of the series, deduplicated by timestamp.
    pub points: &'a [(i64, f64)],
}

impl FillContext<'_> {
    fn prev_known(&self, index: usize) -> Option<(i64, f64)> {
        (0..index)
            .rev()
            .find_map(|j| self.known[j].map(|v| (self.slices[j].end, v)))
    }

    fn next_known(&self, index: usize) -> Option<(i64, f64)> {
        (index + 1..self.slices.len()).find_map(|j| self.known[j].map(|v| (self.slices[j].end, v)))
    }
}

pub type FillFn = fn(&FillContext<'_>, usize) -> Option<f64>;

/// Fill rule for a metric kind; chosen once per series.
pub fn filler(kind: MetricKind) -> FillFn {
    match kind {
        MetricKind::Gauge => gauge_fill,
        MetricKind::Counter => counter_fill,
    }
}

/// Gauges: an interior gap takes the mean of the nearest known slices on each
/// side. A gap touching the window edge takes the single nearest value, where
/// samples outside the window also compete (positioned at their own timestamp,
/// known slices at their end). Ties go to the earlier value.
pub fn gauge_fill(ctx: &FillContext<'_>, index: usize) -> Option<f64> {
    match (ctx.prev_known(index), ctx.next_known(index)) {
        (Some((_, p)), Some((_, n))) => Some((p + n) / 2.0),
        (prev, next) => nearest(
            ctx.slices[index].end,
            prev.or(ctx.before),
            next.or(ctx.after),
        ),
    }
}

fn nearest(at: i64, prev: Option<(i64, f64)>, next: Option<(i64, f64)>) -> Option<f64> {
    match (prev, next) {
        (Some((pt, pv)), Some((nt, nv))) => {
            if (at - pt).abs() <= (nt - at).abs() {
                Some(pv)
            } else {
                Some(nv)
            }
        }
        (Some((_, v)), None) | (None, Some((_, v))) => Some(v),
        (None, None) => None,
    }
}

/// Counters: estimate from the whole trend, not one neighbour. Piecewise-linear
/// through every sample of the series, evaluated at the slice end; beyond the
/// first or last sample the edge segment is extended.
pub fn counter_fill(ctx: &FillContext<'_>, index: usize) -> Option<f64> {
    linear_estimate(ctx.points, ctx.slices[index].end)
}

/// `points` must be sorted by timestamp with unique timestamps.
pub fn linear_estimate(points: &[(i64, f64)], at: i64) -> Option<f64> {
    match points {
        [] => None,
        [(_, v)] => Some(*v),
        _ => {
            let seg = match points.partition_point(|(t, _)| *t <= at) {
                0 => 0,
                k if k >= points.len() => points.len() - 2,
                k => k - 1,
            };
            let (t1, v1) = points[seg];
            let (t2, v2) = points[seg + 1];
            let slope = (v2 - v1) / (t2 - t1) as f64;
            Some(v1 + slope * (at - t1) as f64)
        }
    }
}
