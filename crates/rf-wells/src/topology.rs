//! Well topology: wells, perforations and their control lists.
//!
//! A [`Wells`] value is immutable for a report step except for control
//! targets, which group control rewrites through explicit setters.

use crate::error::{WellError, WellResult};
use rf_core::Real;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WellType {
    Injector,
    Producer,
}

impl WellType {
    pub fn is_injector(self) -> bool {
        matches!(self, WellType::Injector)
    }

    pub fn is_producer(self) -> bool {
        matches!(self, WellType::Producer)
    }
}

/// Kind of control, without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlMode {
    Bhp,
    Thp,
    SurfaceRate,
    ReservoirRate,
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlMode::Bhp => "BHP",
            ControlMode::Thp => "THP",
            ControlMode::SurfaceRate => "SURFACE_RATE",
            ControlMode::ReservoirRate => "RESERVOIR_RATE",
        };
        f.write_str(s)
    }
}

/// One entry of a well's control list.
///
/// Rate targets follow the sign of the flow: positive for injection,
/// negative for production. `distr` weights the phases (water, oil, gas)
/// that make up the controlled rate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WellControl {
    Bhp {
        target: Real,
    },
    Thp {
        target: Real,
        vfp_table: usize,
        #[serde(default)]
        alq: Real,
    },
    SurfaceRate {
        target: Real,
        distr: [Real; 3],
    },
    ReservoirRate {
        target: Real,
        distr: [Real; 3],
    },
}

impl WellControl {
    pub fn mode(&self) -> ControlMode {
        match self {
            WellControl::Bhp { .. } => ControlMode::Bhp,
            WellControl::Thp { .. } => ControlMode::Thp,
            WellControl::SurfaceRate { .. } => ControlMode::SurfaceRate,
            WellControl::ReservoirRate { .. } => ControlMode::ReservoirRate,
        }
    }

    pub fn target(&self) -> Real {
        match self {
            WellControl::Bhp { target }
            | WellControl::Thp { target, .. }
            | WellControl::SurfaceRate { target, .. }
            | WellControl::ReservoirRate { target, .. } => *target,
        }
    }

    pub fn set_target(&mut self, value: Real) {
        match self {
            WellControl::Bhp { target }
            | WellControl::Thp { target, .. }
            | WellControl::SurfaceRate { target, .. }
            | WellControl::ReservoirRate { target, .. } => *target = value,
        }
    }

    /// Phase distribution of rate controls.
    pub fn distr(&self) -> Option<&[Real; 3]> {
        match self {
            WellControl::SurfaceRate { distr, .. } | WellControl::ReservoirRate { distr, .. } => {
                Some(distr)
            }
            WellControl::Bhp { .. } | WellControl::Thp { .. } => None,
        }
    }

    pub fn is_rate(&self) -> bool {
        self.distr().is_some()
    }

    pub fn is_pressure(&self) -> bool {
        !self.is_rate()
    }
}

/// Connection between a well and a reservoir cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Perforation {
    pub cell: usize,
    /// Connection transmissibility factor (well index).
    pub transmissibility: Real,
    /// Depth of the connected cell centre (m).
    pub depth: Real,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Well {
    pub name: String,
    pub well_type: WellType,
    /// Depth the bottom-hole pressure refers to (m).
    pub reference_depth: Real,
    /// Ordered top to bottom.
    pub perforations: Vec<Perforation>,
    pub controls: Vec<WellControl>,
    pub allow_cross_flow: bool,
    /// Surface composition of injected fluid (water, oil, gas).
    pub comp_frac: [Real; 3],
    pub efficiency_factor: Real,
    /// Owning group in the well collection.
    pub group: Option<usize>,
    /// Control entry driven by group control.
    pub group_control_index: Option<usize>,
    /// Solvent share of injected gas.
    pub solvent_fraction: Real,
    /// Polymer concentration of injected water.
    pub polymer_concentration: Real,
}

impl Well {
    pub fn injector(name: impl Into<String>, comp_frac: [Real; 3]) -> Self {
        Self::new(name, WellType::Injector, comp_frac)
    }

    /// Producer; `comp_frac` only seeds the density mix of a shut-in bore.
    pub fn producer(name: impl Into<String>) -> Self {
        Self::new(name, WellType::Producer, [1.0 / 3.0; 3])
    }

    fn new(name: impl Into<String>, well_type: WellType, comp_frac: [Real; 3]) -> Self {
        Self {
            name: name.into(),
            well_type,
            reference_depth: 0.0,
            perforations: Vec::new(),
            controls: Vec::new(),
            allow_cross_flow: true,
            comp_frac,
            efficiency_factor: 1.0,
            group: None,
            group_control_index: None,
            solvent_fraction: 0.0,
            polymer_concentration: 0.0,
        }
    }

    pub fn with_perforation(mut self, cell: usize, transmissibility: Real, depth: Real) -> Self {
        self.perforations.push(Perforation {
            cell,
            transmissibility,
            depth,
        });
        self
    }

    pub fn with_control(mut self, control: WellControl) -> Self {
        self.controls.push(control);
        self
    }

    pub fn with_reference_depth(mut self, depth: Real) -> Self {
        self.reference_depth = depth;
        self
    }

    pub fn with_cross_flow(mut self, allow: bool) -> Self {
        self.allow_cross_flow = allow;
        self
    }

    pub fn with_efficiency_factor(mut self, factor: Real) -> Self {
        self.efficiency_factor = factor;
        self
    }

    pub fn with_group(mut self, group: usize, group_control_index: usize) -> Self {
        self.group = Some(group);
        self.group_control_index = Some(group_control_index);
        self
    }

    pub fn with_solvent_fraction(mut self, fraction: Real) -> Self {
        self.solvent_fraction = fraction;
        self
    }

    pub fn with_polymer_concentration(mut self, c: Real) -> Self {
        self.polymer_concentration = c;
        self
    }

    pub fn has_thp_constraint(&self) -> bool {
        self.controls
            .iter()
            .any(|c| matches!(c, WellControl::Thp { .. }))
    }
}

/// Arena of wells addressed by index, with a flat perforation numbering.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Wells {
    wells: Vec<Well>,
    perf_offsets: Vec<usize>,
}

impl Wells {
    pub fn new(wells: Vec<Well>) -> WellResult<Self> {
        let mut perf_offsets = Vec::with_capacity(wells.len() + 1);
        perf_offsets.push(0);
        for well in &wells {
            if well.perforations.is_empty() {
                return Err(WellError::InvalidConfig {
                    what: format!("well {} has no perforations", well.name),
                });
            }
            if well.controls.is_empty() {
                return Err(WellError::InvalidConfig {
                    what: format!("well {} has no controls", well.name),
                });
            }
            if let Some(g) = well.group_control_index {
                if g >= well.controls.len() {
                    return Err(WellError::InvalidConfig {
                        what: format!("group control index {g} out of range for well {}", well.name),
                    });
                }
            }
            for control in &well.controls {
                if let Some(distr) = control.distr() {
                    if distr.iter().all(|d| *d <= 0.0) {
                        return Err(WellError::InvalidConfig {
                            what: format!("rate control of well {} weights no phase", well.name),
                        });
                    }
                }
            }
            let last = perf_offsets.last().copied().unwrap_or(0);
            perf_offsets.push(last + well.perforations.len());
        }
        Ok(Self {
            wells,
            perf_offsets,
        })
    }

    pub fn len(&self) -> usize {
        self.wells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wells.is_empty()
    }

    pub fn get(&self, w: usize) -> &Well {
        &self.wells[w]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Well> {
        self.wells.iter()
    }

    pub fn num_perforations(&self) -> usize {
        self.perf_offsets.last().copied().unwrap_or(0)
    }

    /// Global perforation indices of well `w`.
    pub fn perf_range(&self, w: usize) -> Range<usize> {
        self.perf_offsets[w]..self.perf_offsets[w + 1]
    }

    /// Well `w`'s perforations with their global indices.
    pub fn perforations(&self, w: usize) -> impl Iterator<Item = (usize, &Perforation)> {
        self.perf_range(w).zip(self.wells[w].perforations.iter())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.wells.iter().position(|w| w.name == name)
    }

    pub fn control(&self, w: usize, ctrl: usize) -> &WellControl {
        &self.wells[w].controls[ctrl]
    }

    pub fn set_control_target(&mut self, w: usize, ctrl: usize, target: Real) {
        if let Some(c) = self.wells.get_mut(w).and_then(|well| well.controls.get_mut(ctrl)) {
            c.set_target(target);
        }
    }

    pub fn set_control_distr(&mut self, w: usize, ctrl: usize, new_distr: [Real; 3]) {
        if let Some(
            WellControl::SurfaceRate { distr, .. } | WellControl::ReservoirRate { distr, .. },
        ) = self.wells.get_mut(w).and_then(|well| well.controls.get_mut(ctrl))
        {
            *distr = new_distr;
        }
    }
}
