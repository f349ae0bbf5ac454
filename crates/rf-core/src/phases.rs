//! Phase, component and primary-variable layout.
//!
//! The three flowing phases always occupy slots 0..3 (water, oil, gas).
//! Solvent and polymer, when enabled, append one conserved component each.
//! Reservoir equations, well equations and well unknowns all share the
//! component count.

use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Phase {
    Water,
    Oil,
    Gas,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Water, Phase::Oil, Phase::Gas];

    pub fn index(self) -> usize {
        match self {
            Phase::Water => 0,
            Phase::Oil => 1,
            Phase::Gas => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Water => "WATER",
            Phase::Oil => "OIL",
            Phase::Gas => "GAS",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Conserved quantity, one per reservoir equation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    Water,
    Oil,
    Gas,
    Solvent,
    Polymer,
}

impl Component {
    pub fn name(self) -> &'static str {
        match self {
            Component::Water => "WATER",
            Component::Oil => "OIL",
            Component::Gas => "GAS",
            Component::Solvent => "SOLVENT",
            Component::Polymer => "POLYMER",
        }
    }
}

/// Which of {Sg, Rs, Rv} is the third primary variable of a cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HydroCarbonState {
    /// Free gas and oil present; unknown is Sg.
    #[default]
    GasAndOil,
    /// Undersaturated oil, no free gas; unknown is Rs.
    OilOnly,
    /// Dry gas, no oil; unknown is Rv.
    GasOnly,
}

/// Reservoir primary variables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimaryVar {
    Pressure,
    WaterSaturation,
    CompositionSwitch,
    SolventSaturation,
    PolymerConcentration,
}

/// Enabled fluid features.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseUsage {
    /// Gas may dissolve in oil (Rs is live).
    pub has_disgas: bool,
    /// Oil may vaporize into gas (Rv is live).
    pub has_vapoil: bool,
    pub has_solvent: bool,
    pub has_polymer: bool,
}

impl Default for PhaseUsage {
    fn default() -> Self {
        Self::black_oil()
    }
}

impl PhaseUsage {
    /// Three-phase black-oil with live oil and wet gas.
    pub fn black_oil() -> Self {
        Self {
            has_disgas: true,
            has_vapoil: true,
            has_solvent: false,
            has_polymer: false,
        }
    }

    /// Three-phase with immiscible oil and gas.
    pub fn dead_oil() -> Self {
        Self {
            has_disgas: false,
            has_vapoil: false,
            ..Self::black_oil()
        }
    }

    pub fn with_solvent(mut self) -> Self {
        self.has_solvent = true;
        self
    }

    pub fn with_polymer(mut self) -> Self {
        self.has_polymer = true;
        self
    }

    /// Number of flowing phases.
    pub fn num_phases(&self) -> usize {
        3
    }

    /// Number of conserved components (= reservoir equations = well equations).
    pub fn num_components(&self) -> usize {
        3 + self.has_solvent as usize + self.has_polymer as usize
    }

    pub fn num_eq(&self) -> usize {
        self.num_components()
    }

    pub fn solvent_index(&self) -> Option<usize> {
        self.has_solvent.then_some(3)
    }

    pub fn polymer_index(&self) -> Option<usize> {
        self.has_polymer.then_some(3 + self.has_solvent as usize)
    }

    pub fn component_index(&self, c: Component) -> Option<usize> {
        match c {
            Component::Water => Some(0),
            Component::Oil => Some(1),
            Component::Gas => Some(2),
            Component::Solvent => self.solvent_index(),
            Component::Polymer => self.polymer_index(),
        }
    }

    pub fn component(&self, idx: usize) -> Option<Component> {
        match idx {
            0 => Some(Component::Water),
            1 => Some(Component::Oil),
            2 => Some(Component::Gas),
            _ if self.solvent_index() == Some(idx) => Some(Component::Solvent),
            _ if self.polymer_index() == Some(idx) => Some(Component::Polymer),
            _ => None,
        }
    }

    pub fn component_name(&self, idx: usize) -> &'static str {
        self.component(idx).map(Component::name).unwrap_or("?")
    }

    /// Slot of a reservoir primary variable in the cell's derivative vector.
    pub fn pv_index(&self, pv: PrimaryVar) -> Option<usize> {
        match pv {
            PrimaryVar::Pressure => Some(0),
            PrimaryVar::WaterSaturation => Some(1),
            PrimaryVar::CompositionSwitch => Some(2),
            PrimaryVar::SolventSaturation => self.solvent_index(),
            PrimaryVar::PolymerConcentration => self.polymer_index(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_layout_follows_features() {
        let pu = PhaseUsage::black_oil();
        assert_eq!(pu.num_components(), 3);
        assert_eq!(pu.solvent_index(), None);

        let pu = PhaseUsage::black_oil().with_polymer();
        assert_eq!(pu.polymer_index(), Some(3));

        let pu = PhaseUsage::black_oil().with_solvent().with_polymer();
        assert_eq!(pu.num_components(), 5);
        assert_eq!(pu.solvent_index(), Some(3));
        assert_eq!(pu.polymer_index(), Some(4));
        assert_eq!(pu.component_name(4), "POLYMER");
    }
}
