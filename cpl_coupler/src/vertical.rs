//! Surface mixed layer: depth of its base and depth-weighted means over it.

/// Outcome of a mixed-layer scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixedLayerScan {
    /// 1-based level, counted from the surface, of the mixed layer base.
    pub level: usize,
    /// Whether a level deeper than the threshold was found; `false` means
    /// the scan stopped at the lowest level.
    pub reached_threshold: bool,
}

/// Scan level depths from the surface down for the first level below
/// `threshold` (depths are negative, e.g. `-10.0` m).
///
/// The result is clamped to `[1, N]`; an empty column yields level 0.
pub fn scan_mixed_layer(z_surface_down: &[f64], threshold: f64) -> MixedLayerScan {
    match z_surface_down.iter().position(|&z| z < threshold) {
        Some(idx) => MixedLayerScan {
            level: idx + 1,
            reached_threshold: true,
        },
        None => MixedLayerScan {
            level: z_surface_down.len(),
            reached_threshold: false,
        },
    }
}

/// `Σ vₖ·hₖ / Σ hₖ`; zero when the total thickness is not positive.
pub fn depth_weighted_mean(values: &[f64], thickness: &[f64]) -> f64 {
    let (weighted, total) = values
        .iter()
        .zip(thickness)
        .fold((0.0, 0.0), |(w, t), (&v, &h)| (w + v * h, t + h));
    if total > 0.0 { weighted / total } else { 0.0 }
}

/// Depth-weighted mean of `values` over the mixed layer defined by
/// `z` and `threshold`. All slices run from the surface down.
pub fn mixed_layer_mean(values: &[f64], z: &[f64], thickness: &[f64], threshold: f64) -> f64 {
    let scan = scan_mixed_layer(z, threshold);
    let n = scan.level.min(values.len()).min(thickness.len());
    depth_weighted_mean(&values[..n], &thickness[..n])
}
