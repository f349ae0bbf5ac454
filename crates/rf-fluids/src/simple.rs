//! Analytic black-oil model.
//!
//! Linear compressibility for water and oil, gas inverse formation-volume
//! factor proportional to pressure, Corey relative permeabilities and
//! pressure-proportional saturated Rs/Rv. Good enough to drive the nonlinear
//! machinery with realistic coupling; not a substitute for table PVT.

use crate::error::{FluidError, FluidResult};
use crate::model::{BlackOilPvt, FluidSystem};
use crate::state::{CellFluidState, CellPrimary};
use rf_core::{Eval, HydroCarbonState, Phase, PhaseUsage, PrimaryVar, Real};

#[derive(Clone, Debug)]
pub struct SimpleBlackOil {
    pub phase_usage: PhaseUsage,
    /// Pressure at which `inv_b_ref` applies (Pa).
    pub reference_pressure: Real,
    /// Inverse formation-volume factors at the reference pressure.
    pub inv_b_ref: [Real; 3],
    /// Water and oil compressibility (1/Pa).
    pub compressibility: [Real; 2],
    /// Oil shrinkage per unit of dissolved gas.
    pub oil_swelling: Real,
    /// Phase viscosities (Pa·s).
    pub viscosity: [Real; 3],
    pub surface_density: [Real; 3],
    pub corey_exponent: [Real; 3],
    pub residual_saturation: [Real; 3],
    /// Saturated Rs per pascal.
    pub rs_per_pa: Real,
    /// Saturated Rv per pascal.
    pub rv_per_pa: Real,
    pub solvent_viscosity: Real,
    pub solvent_surface_density: Real,
    /// Water viscosity grows as `1 + polymer_viscosity_slope * c`.
    pub polymer_viscosity_slope: Real,
}

impl Default for SimpleBlackOil {
    fn default() -> Self {
        Self {
            phase_usage: PhaseUsage::black_oil(),
            reference_pressure: 2.0e7,
            inv_b_ref: [1.0 / 1.01, 1.0 / 1.2, 200.0],
            compressibility: [4.0e-10, 1.0e-9],
            oil_swelling: 0.003,
            viscosity: [5.0e-4, 2.0e-3, 2.0e-5],
            surface_density: [1000.0, 800.0, 1.0],
            corey_exponent: [2.0, 2.0, 2.0],
            residual_saturation: [0.0, 0.0, 0.0],
            rs_per_pa: 5.0e-6,
            rv_per_pa: 5.0e-12,
            solvent_viscosity: 2.0e-5,
            solvent_surface_density: 1.5,
            polymer_viscosity_slope: 2.0,
        }
    }
}

impl SimpleBlackOil {
    pub fn new(phase_usage: PhaseUsage) -> Self {
        Self {
            phase_usage,
            ..Self::default()
        }
    }

    fn inv_b_water_eval(&self, p: Eval) -> Eval {
        (1.0 + (p - self.reference_pressure) * self.compressibility[0]) * self.inv_b_ref[0]
    }

    fn inv_b_oil_eval(&self, p: Eval, rs: Eval) -> Eval {
        (1.0 + (p - self.reference_pressure) * self.compressibility[1]) * self.inv_b_ref[1]
            / (1.0 + rs * self.oil_swelling)
    }

    fn inv_b_gas_eval(&self, p: Eval) -> Eval {
        p * (self.inv_b_ref[2] / self.reference_pressure)
    }

    fn rs_sat_eval(&self, p: Eval) -> Eval {
        if self.phase_usage.has_disgas {
            p.max_const(0.0) * self.rs_per_pa
        } else {
            Eval::constant(0.0)
        }
    }

    fn rv_sat_eval(&self, p: Eval) -> Eval {
        if self.phase_usage.has_vapoil {
            p.max_const(0.0) * self.rv_per_pa
        } else {
            Eval::constant(0.0)
        }
    }

    fn rel_perm(&self, phase: Phase, s: Eval) -> Eval {
        let i = phase.index();
        let sr_total: Real = self.residual_saturation.iter().sum();
        let se = ((s - self.residual_saturation[i]) / (1.0 - sr_total)).max_const(0.0);
        let n = self.corey_exponent[i];
        if n == 2.0 {
            se * se
        } else {
            // Non-integer exponent: chain rule by hand.
            let v = se.value().powf(n);
            let dv = if se.value() > 0.0 {
                n * se.value().powf(n - 1.0)
            } else {
                0.0
            };
            let mut e = se * dv;
            e.set_value(v);
            e
        }
    }
}

impl BlackOilPvt for SimpleBlackOil {
    fn b_water(&self, p: Real) -> Real {
        self.inv_b_water_eval(Eval::constant(p)).value()
    }

    fn b_oil(&self, p: Real, rs: Real) -> Real {
        self.inv_b_oil_eval(Eval::constant(p), Eval::constant(rs))
            .value()
    }

    fn b_gas(&self, p: Real, _rv: Real) -> Real {
        self.inv_b_gas_eval(Eval::constant(p)).value()
    }

    fn b_solvent(&self, p: Real) -> Real {
        self.b_gas(p, 0.0)
    }

    fn rs_sat(&self, p: Real) -> Real {
        self.rs_sat_eval(Eval::constant(p)).value()
    }

    fn rv_sat(&self, p: Real) -> Real {
        self.rv_sat_eval(Eval::constant(p)).value()
    }
}

impl FluidSystem for SimpleBlackOil {
    fn name(&self) -> &str {
        "simple-black-oil"
    }

    fn phase_usage(&self) -> PhaseUsage {
        self.phase_usage
    }

    fn surface_density(&self, phase: Phase) -> Real {
        self.surface_density[phase.index()]
    }

    fn solvent_surface_density(&self) -> Real {
        self.solvent_surface_density
    }

    fn pvt(&self) -> &dyn BlackOilPvt {
        self
    }

    fn evaluate(&self, cell: usize, primary: &CellPrimary) -> FluidResult<CellFluidState> {
        if !primary.pressure.is_finite() || primary.pressure <= 0.0 {
            return Err(FluidError::NonPhysical {
                what: "pressure",
                cell,
            });
        }
        if !primary.water_saturation.is_finite() || !primary.composition_switch.is_finite() {
            return Err(FluidError::NonPhysical {
                what: "saturation",
                cell,
            });
        }

        let pu = self.phase_usage;
        let slot = |pv: PrimaryVar| pu.pv_index(pv).unwrap_or(usize::MAX);

        let p = Eval::variable(primary.pressure, slot(PrimaryVar::Pressure));
        let sw = Eval::variable(primary.water_saturation, slot(PrimaryVar::WaterSaturation));
        let ss = if pu.has_solvent {
            Eval::variable(
                primary.solvent_saturation,
                slot(PrimaryVar::SolventSaturation),
            )
        } else {
            Eval::constant(0.0)
        };
        let c = if pu.has_polymer {
            Eval::variable(
                primary.polymer_concentration,
                slot(PrimaryVar::PolymerConcentration),
            )
        } else {
            Eval::constant(0.0)
        };

        let x = Eval::variable(primary.composition_switch, slot(PrimaryVar::CompositionSwitch));
        let (sg, rs, rv) = match primary.hydrocarbon_state {
            HydroCarbonState::GasAndOil => (x, self.rs_sat_eval(p), self.rv_sat_eval(p)),
            HydroCarbonState::OilOnly => (Eval::constant(0.0), x, Eval::constant(0.0)),
            HydroCarbonState::GasOnly => (1.0 - sw - ss, Eval::constant(0.0), x),
        };
        let so = match primary.hydrocarbon_state {
            HydroCarbonState::GasOnly => Eval::constant(0.0),
            _ => 1.0 - sw - sg - ss,
        };

        let inv_b = [
            self.inv_b_water_eval(p),
            self.inv_b_oil_eval(p, rs),
            self.inv_b_gas_eval(p),
        ];
        let saturation = [sw, so, sg];
        let mut mobility = [Eval::constant(0.0); 3];
        for phase in Phase::ALL {
            let i = phase.index();
            mobility[i] = self.rel_perm(phase, saturation[i]) / self.viscosity[i];
        }

        let rho = self.surface_density;
        let density = [
            inv_b[0] * rho[0],
            inv_b[1] * (rs * rho[2] + rho[1]),
            inv_b[2] * (rv * rho[1] + rho[2]),
        ];

        let solvent_mobility = if pu.has_solvent {
            ss * ss / self.solvent_viscosity
        } else {
            Eval::constant(0.0)
        };

        Ok(CellFluidState {
            pressure: p,
            saturation,
            inv_b,
            mobility,
            density,
            rs,
            rv,
            solvent_saturation: ss,
            solvent_inv_b: self.inv_b_gas_eval(p),
            solvent_mobility,
            polymer_concentration: c,
            polymer_viscosity_multiplier: 1.0 + c * self.polymer_viscosity_slope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primary(state: HydroCarbonState, x: Real) -> CellPrimary {
        CellPrimary {
            pressure: 2.0e7,
            water_saturation: 0.2,
            composition_switch: x,
            hydrocarbon_state: state,
            solvent_saturation: 0.0,
            polymer_concentration: 0.0,
        }
    }

    #[test]
    fn saturations_sum_to_one() {
        let fluid = SimpleBlackOil::default();
        let fs = fluid
            .evaluate(0, &primary(HydroCarbonState::GasAndOil, 0.3))
            .unwrap();
        let sum: Real = fs.saturation.iter().map(|s| s.value()).sum();
        assert!((sum - 1.0).abs() < 1e-14);
        assert!((fs.rs.value() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn oil_only_uses_rs_as_unknown() {
        let fluid = SimpleBlackOil::default();
        let fs = fluid
            .evaluate(0, &primary(HydroCarbonState::OilOnly, 50.0))
            .unwrap();
        assert_eq!(fs.saturation_of(Phase::Gas).value(), 0.0);
        assert_eq!(fs.rs.value(), 50.0);
        assert_eq!(fs.rs.derivative(2), 1.0);
        // Oil b depends on rs.
        assert!(fs.inv_b_of(Phase::Oil).derivative(2) < 0.0);
    }

    #[test]
    fn mobility_derivative_matches_finite_difference() {
        let fluid = SimpleBlackOil::default();
        let base = primary(HydroCarbonState::GasAndOil, 0.3);
        let fs = fluid.evaluate(0, &base).unwrap();

        let h = 1e-7;
        let mut bumped = base;
        bumped.water_saturation += h;
        let fs2 = fluid.evaluate(0, &bumped).unwrap();

        for phase in Phase::ALL {
            let fd = (fs2.mobility_of(phase).value() - fs.mobility_of(phase).value()) / h;
            let ad = fs.mobility_of(phase).derivative(1);
            assert!(
                (fd - ad).abs() <= 1e-4 * ad.abs().max(1.0),
                "{phase}: fd={fd} ad={ad}"
            );
        }
    }

    #[test]
    fn non_positive_pressure_is_rejected() {
        let fluid = SimpleBlackOil::default();
        let mut p = primary(HydroCarbonState::GasAndOil, 0.1);
        p.pressure = -1.0;
        assert!(matches!(
            fluid.evaluate(3, &p),
            Err(FluidError::NonPhysical { cell: 3, .. })
        ));
    }

    #[test]
    fn saturated_b_uses_saturated_rs() {
        let fluid = SimpleBlackOil::default();
        let p = 1.5e7;
        let expected = fluid.b_oil(p, fluid.rs_sat(p));
        assert_eq!(fluid.b_oil_saturated(p), expected);
    }
}
