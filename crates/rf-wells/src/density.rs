//! Segmented well-bore density model.
//!
//! Perforations are ordered top to bottom. The fluid passing a perforation
//! is the sum of what enters the bore below it, so its mix follows from a
//! bottom-up accumulation of perforation rates. Pressure differences to the
//! bhp datum accumulate top-down.

use crate::topology::Wells;
use rf_core::Real;

const OIL: usize = 1;
const GAS: usize = 2;

/// Fluid properties at perforation conditions, `n_comp` entries per
/// perforation for `b` and `surface_density`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PerforationProperties {
    pub n_comp: usize,
    /// Inverse formation-volume factors.
    pub b: Vec<Real>,
    pub rs_max: Vec<Real>,
    pub rv_max: Vec<Real>,
    pub surface_density: Vec<Real>,
}

/// Mixture density at each perforation.
///
/// `perf_rates` holds `n_comp` surface rates per perforation.
pub fn connection_densities(
    wells: &Wells,
    perf_rates: &[Real],
    props: &PerforationProperties,
) -> Vec<Real> {
    let nc = props.n_comp;
    let nperf = wells.num_perforations();
    let mut q_out = vec![0.0; nperf * nc];

    for w in 0..wells.len() {
        let range = wells.perf_range(w);
        for perf in range.clone().rev() {
            for c in 0..nc {
                let from_below = if perf + 1 == range.end {
                    0.0
                } else {
                    q_out[(perf + 1) * nc + c]
                };
                q_out[perf * nc + c] = from_below - perf_rates[perf * nc + c];
            }
        }
    }

    let mut dens = vec![0.0; nperf];
    let mut mix = vec![0.0; nc];
    for w in 0..wells.len() {
        let comp_frac = wells.get(w).comp_frac;
        for perf in wells.perf_range(w) {
            let q = &q_out[perf * nc..(perf + 1) * nc];
            let total: Real = q.iter().sum();
            if total != 0.0 {
                for (m, qc) in mix.iter_mut().zip(q) {
                    *m = (qc / total).abs();
                }
            } else {
                mix.iter_mut().for_each(|m| *m = 0.0);
                mix[..3].copy_from_slice(&comp_frac);
            }

            let mut x = mix.clone();
            let mut rs = 0.0;
            let mut rv = 0.0;
            if mix[OIL] > 0.0 {
                rs = (mix[GAS] / mix[OIL]).min(props.rs_max[perf]);
            }
            if mix[GAS] > 0.0 {
                rv = (mix[OIL] / mix[GAS]).min(props.rv_max[perf]);
            }
            if rs != 0.0 {
                x[GAS] = (mix[GAS] - mix[OIL] * rs) / (1.0 - rs * rv);
            }
            if rv != 0.0 {
                x[OIL] = (mix[OIL] - mix[GAS] * rv) / (1.0 - rs * rv);
            }

            let b = &props.b[perf * nc..(perf + 1) * nc];
            let volrat: Real = x.iter().zip(b).map(|(xc, bc)| xc / bc).sum();
            let surf = &props.surface_density[perf * nc..(perf + 1) * nc];
            let mass: Real = surf.iter().zip(&mix).map(|(s, m)| s * m).sum();
            dens[perf] = mass / volrat;
        }
    }
    dens
}

/// Cumulative pressure difference between each perforation and the bhp
/// reference depth.
pub fn connection_pressure_delta(wells: &Wells, densities: &[Real], gravity: Real) -> Vec<Real> {
    let mut dp = vec![0.0; wells.num_perforations()];
    for w in 0..wells.len() {
        let well = wells.get(w);
        let mut z_above = well.reference_depth;
        let mut acc = 0.0;
        for (perf, perforation) in wells.perforations(w) {
            let dz = perforation.depth - z_above;
            acc += dz * densities[perf] * gravity;
            dp[perf] = acc;
            z_above = perforation.depth;
        }
    }
    dp
}

/// Pressure correction between a VFP table datum and the well's bhp
/// reference depth.
pub fn hydrostatic_correction(
    well_ref_depth: Real,
    vfp_ref_depth: Real,
    rho: Real,
    gravity: Real,
) -> Real {
    rho * gravity * (vfp_ref_depth - well_ref_depth)
}
