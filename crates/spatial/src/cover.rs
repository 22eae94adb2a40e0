use std::collections::BTreeSet;

use foundation::viewport::{LngLat, Viewport};

use crate::cell::CellId;
use crate::codec::{CellCodec, CodecError};

const KM_PER_DEGREE: f64 = 111.32;

/// Sampling density relative to the average cell edge length.
const SAMPLES_PER_EDGE: f64 = 3.0;

/// Upper bound on point samples for one covering request.
pub const MAX_COVER_SAMPLES: u64 = 4_000_000;

/// Cells at `resolution` that together cover `viewport`, grown by `k` rings.
///
/// The bounds are sampled on a grid several times denser than the cell edge
/// length (both edges of the box included), so every point in the viewport
/// lies in a sampled cell or in a direct neighbour of one. A ring radius of at
/// least one therefore closes the gap left by the sampling.
pub fn covering_cells(
    codec: &dyn CellCodec,
    viewport: &Viewport,
    resolution: u8,
    k: u32,
) -> Result<BTreeSet<CellId>, CodecError> {
    let edge_km = codec.edge_length_km(resolution)?;
    let (south, north) = viewport.lat_range();

    let lat_step = edge_km / KM_PER_DEGREE / SAMPLES_PER_EDGE;
    // A degree of longitude is longest at the latitude closest to the equator.
    let equator_lat = if south <= 0.0 && north >= 0.0 {
        0.0
    } else {
        south.abs().min(north.abs())
    };
    let lng_step = lat_step / equator_lat.to_radians().cos().max(1e-6);

    let lng_ranges = viewport.lng_ranges();
    let lat_count = axis_len(south, north, lat_step);
    let samples = lng_ranges.iter().fold(0u64, |acc, (w, e)| {
        acc.saturating_add(axis_len(*w, *e, lng_step).saturating_mul(lat_count))
    });
    if samples > MAX_COVER_SAMPLES {
        return Err(CodecError::ViewportTooLarge {
            samples,
            resolution,
            limit: MAX_COVER_SAMPLES,
        });
    }

    let lats = sample_axis(south, north, lat_step);
    let lng_axes: Vec<Vec<f64>> = lng_ranges
        .into_iter()
        .map(|(w, e)| sample_axis(w, e, lng_step))
        .collect();

    let mut base: BTreeSet<CellId> = BTreeSet::new();
    for axis in &lng_axes {
        for &lat in &lats {
            for &lng in axis {
                base.insert(codec.cell_at(LngLat::new(lng, lat), resolution)?);
            }
        }
    }

    if k == 0 {
        return Ok(base);
    }

    let mut out = BTreeSet::new();
    for cell in base {
        out.extend(codec.k_ring(cell, k)?);
    }
    Ok(out)
}

fn intervals(lo: f64, hi: f64, step: f64) -> u64 {
    let span = hi - lo;
    if span <= 0.0 || step <= 0.0 {
        return 0;
    }
    let n = (span / step).ceil().max(1.0);
    if n >= u64::MAX as f64 { u64::MAX } else { n as u64 }
}

fn axis_len(lo: f64, hi: f64, step: f64) -> u64 {
    intervals(lo, hi, step).saturating_add(1)
}

/// Evenly spaced samples from `lo` to `hi` inclusive, never further apart than `step`.
fn sample_axis(lo: f64, hi: f64, step: f64) -> Vec<f64> {
    let n = intervals(lo, hi, step);
    if n == 0 {
        return vec![lo];
    }
    let span = hi - lo;
    (0..=n).map(|i| lo + span * (i as f64) / (n as f64)).collect()
}
