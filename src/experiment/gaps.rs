//! Vertical slit gap sizing.
//!
//! The physics of gap sizing is instrument specific; the orchestration layer
//! only needs "gaps for this angle". [`FootprintGapCalculator`] is the default.

use super::axes::AxisValueMap;
use super::constants::InstrumentConstants;
use super::sample::Sample;

/// Computes vertical gaps for a sample at an angle.
pub trait SlitGapCalculator: Send + Sync {
    /// Vertical gaps (`S1VG`, `S2VG`, ...) for `angle` in degrees.
    fn vertical_gaps(
        &self,
        angle: f64,
        sample: &Sample,
        constants: &InstrumentConstants,
    ) -> AxisValueMap;
}

/// Sizes slits 1 and 2 from the sample footprint and resolution; slits 3 and 4
/// scale with the fraction of the maximum theta.
///
/// With `dθ = resolution * θ`, the collimation pair satisfies
/// `s1 + s2 = 2 * s1s2 * tan(dθ)` and the penumbra at the sample,
/// `s2 + (s1 + s2) * s2sa / s1s2`, equals the projected footprint
/// `footprint * sin(θ)`. Infeasible geometries clamp `s2` at zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct FootprintGapCalculator;

impl SlitGapCalculator for FootprintGapCalculator {
    fn vertical_gaps(
        &self,
        angle: f64,
        sample: &Sample,
        constants: &InstrumentConstants,
    ) -> AxisValueMap {
        let theta = angle.to_radians();
        let dtheta = (sample.resolution * angle).to_radians();
        let projected = sample.footprint * theta.sin();

        let sum = 2.0 * constants.s1s2 * dtheta.tan();
        let s2 = (projected - sum * constants.s2sa / constants.s1s2).max(0.0);
        let s1 = (sum - s2).max(0.0);

        let fraction = if constants.max_theta > 0.0 {
            (angle.abs() / constants.max_theta).min(1.0)
        } else {
            1.0
        };

        let mut gaps = AxisValueMap::new();
        gaps.insert("S1VG", s1);
        gaps.insert("S2VG", s2);
        gaps.insert("S3VG", constants.s3max * fraction);
        if let Some(s4max) = constants.s4max {
            gaps.insert("S4VG", s4max * fraction);
        }
        gaps
    }
}
