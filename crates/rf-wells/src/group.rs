//! Group control arena.
//!
//! Groups and well nodes live in flat vectors; wells refer to their group
//! by index only. Group state changes through the batch functions on
//! [`WellCollection`], which rewrite the targets of the wells' group-control
//! entries in [`Wells`].

use crate::error::{WellError, WellResult};
use crate::topology::{WellControl, WellType, Wells};
use rf_core::Real;
use serde::{Deserialize, Serialize};

/// Relative mismatch accepted between a group's rate and its target.
const GROUP_TARGET_TOLERANCE: Real = 1.0e-6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupTarget {
    /// Weighted surface rate of the group's wells.
    SurfaceRate { target: Real, distr: [Real; 3] },
    /// Inject `fraction` of the reservoir voidage of all producers.
    Vrep { fraction: Real },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupNode {
    pub name: String,
    #[serde(default = "unit")]
    pub efficiency_factor: Real,
    #[serde(default)]
    pub production: Option<GroupTarget>,
    #[serde(default)]
    pub injection: Option<GroupTarget>,
}

fn unit() -> Real {
    1.0
}

impl GroupNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            efficiency_factor: 1.0,
            production: None,
            injection: None,
        }
    }

    pub fn with_production(mut self, target: GroupTarget) -> Self {
        self.production = Some(target);
        self
    }

    pub fn with_injection(mut self, target: GroupTarget) -> Self {
        self.injection = Some(target);
        self
    }

    fn target_for(&self, well_type: WellType) -> Option<&GroupTarget> {
        match well_type {
            WellType::Injector => self.injection.as_ref(),
            WellType::Producer => self.production.as_ref(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WellNode {
    pub well: usize,
    pub well_type: WellType,
    pub group: Option<usize>,
    pub group_control_index: Option<usize>,
    /// False while the well runs on its group-control entry.
    pub individual_control: bool,
    pub guide_rate: Real,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WellCollection {
    groups: Vec<GroupNode>,
    nodes: Vec<WellNode>,
    group_control_applied: bool,
}

impl WellCollection {
    /// Collection without groups: every well is individually controlled.
    pub fn ungrouped(wells: &Wells) -> Self {
        Self {
            groups: Vec::new(),
            nodes: Self::nodes_for(wells),
            group_control_applied: false,
        }
    }

    pub fn new(groups: Vec<GroupNode>, wells: &Wells) -> WellResult<Self> {
        for well in wells.iter() {
            if let Some(g) = well.group {
                if g >= groups.len() {
                    return Err(WellError::InvalidConfig {
                        what: format!("well {} refers to unknown group {g}", well.name),
                    });
                }
            }
        }
        Ok(Self {
            groups,
            nodes: Self::nodes_for(wells),
            group_control_applied: false,
        })
    }

    fn nodes_for(wells: &Wells) -> Vec<WellNode> {
        wells
            .iter()
            .enumerate()
            .map(|(w, well)| WellNode {
                well: w,
                well_type: well.well_type,
                group: well.group,
                group_control_index: well.group_control_index,
                individual_control: true,
                guide_rate: 1.0,
            })
            .collect()
    }

    pub fn groups(&self) -> &[GroupNode] {
        &self.groups
    }

    pub fn nodes(&self) -> &[WellNode] {
        &self.nodes
    }

    pub fn node(&self, w: usize) -> Option<&WellNode> {
        self.nodes.get(w)
    }

    fn group_target(&self, node: &WellNode) -> Option<&GroupTarget> {
        node.group
            .and_then(|g| self.groups.get(g))
            .and_then(|g| g.target_for(node.well_type))
    }

    /// Some well can run under a group target.
    pub fn group_control_active(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| n.group_control_index.is_some() && self.group_target(n).is_some())
    }

    pub fn group_control_applied(&self) -> bool {
        self.group_control_applied
    }

    /// Guide rates come from well potentials.
    pub fn require_well_potentials(&self) -> bool {
        self.group_control_active()
    }

    pub fn having_vrep_groups(&self) -> bool {
        self.groups
            .iter()
            .any(|g| matches!(g.injection, Some(GroupTarget::Vrep { .. })))
    }

    pub fn set_individual_control(&mut self, w: usize, individual: bool) {
        if let Some(n) = self.nodes.get_mut(w) {
            n.individual_control = individual;
        }
    }

    /// Well efficiency times the efficiency of its group.
    pub fn accumulative_efficiency_factor(&self, wells: &Wells, w: usize) -> Real {
        let group_factor = wells
            .get(w)
            .group
            .and_then(|g| self.groups.get(g))
            .map(|g| g.efficiency_factor)
            .unwrap_or(1.0);
        wells.get(w).efficiency_factor * group_factor
    }

    /// Guide rates from absolute phase potentials (three per well).
    pub fn set_guide_rates_with_potentials(&mut self, wells: &Wells, potentials: &[Real]) {
        for n in 0..self.nodes.len() {
            let w = self.nodes[n].well;
            let pot = &potentials[3 * w..3 * w + 3];
            let weights = match self.group_target(&self.nodes[n]) {
                Some(GroupTarget::SurfaceRate { distr, .. }) => *distr,
                _ => wells.get(w).comp_frac,
            };
            self.nodes[n].guide_rate = weights.iter().zip(pot).map(|(d, p)| d * p).sum();
        }
    }

    /// Members of group `g` of type `well_type` running on group control.
    fn controlled_members(&self, g: usize, well_type: WellType) -> Vec<usize> {
        self.nodes
            .iter()
            .filter(|n| {
                n.group == Some(g)
                    && n.well_type == well_type
                    && n.group_control_index.is_some()
                    && !n.individual_control
            })
            .map(|n| n.well)
            .collect()
    }

    fn share(&self, members: &[usize], w: usize) -> Real {
        let total: Real = members.iter().map(|m| self.nodes[*m].guide_rate).sum();
        if total > 0.0 {
            self.nodes[w].guide_rate / total
        } else {
            1.0 / members.len() as Real
        }
    }

    fn distribute(&self, wells: &mut Wells, members: &[usize], amount: Real) {
        for &w in members {
            let share = self.share(members, w);
            if let Some(ctrl) = self.nodes[w].group_control_index {
                wells.set_control_target(w, ctrl, amount * share);
            }
        }
    }

    /// First distribution of surface-rate group targets by guide rate.
    pub fn apply_group_controls(&mut self, wells: &mut Wells) {
        for g in 0..self.groups.len() {
            for well_type in [WellType::Injector, WellType::Producer] {
                if let Some(GroupTarget::SurfaceRate { target, .. }) =
                    self.groups[g].target_for(well_type).cloned()
                {
                    let members = self.controlled_members(g, well_type);
                    self.distribute(wells, &members, target);
                }
            }
        }
        self.group_control_applied = true;
    }

    /// Redistribute what individually controlled members leave of each
    /// surface-rate group target.
    pub fn update_well_targets(&mut self, wells: &mut Wells, well_rates: &[Real]) {
        for g in 0..self.groups.len() {
            for well_type in [WellType::Injector, WellType::Producer] {
                if let Some(GroupTarget::SurfaceRate { target, distr }) =
                    self.groups[g].target_for(well_type).cloned()
                {
                    let individual: Real = self
                        .nodes
                        .iter()
                        .filter(|n| {
                            n.group == Some(g) && n.well_type == well_type && n.individual_control
                        })
                        .map(|n| weighted_rate(&distr, well_rates, n.well))
                        .sum();
                    let members = self.controlled_members(g, well_type);
                    self.distribute(wells, &members, target - individual);
                }
            }
        }
    }

    /// Surface-rate group targets are met by their members.
    pub fn group_target_converged(&self, well_rates: &[Real]) -> bool {
        for (g, group) in self.groups.iter().enumerate() {
            for well_type in [WellType::Injector, WellType::Producer] {
                if let Some(GroupTarget::SurfaceRate { target, distr }) =
                    group.target_for(well_type)
                {
                    if self.controlled_members(g, well_type).is_empty() {
                        continue;
                    }
                    let rate: Real = self
                        .nodes
                        .iter()
                        .filter(|n| n.group == Some(g) && n.well_type == well_type)
                        .map(|n| weighted_rate(distr, well_rates, n.well))
                        .sum();
                    if (rate - target).abs() > GROUP_TARGET_TOLERANCE * target.abs() {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Set reservoir-rate targets of VREP injectors from producer voidage.
    ///
    /// `conversion_coeffs` holds three surface-to-reservoir coefficients per
    /// well; the group-control entry of each member must be a reservoir-rate
    /// control.
    pub fn apply_vrep_group_controls(
        &mut self,
        wells: &mut Wells,
        voidage_rates: &[Real],
        conversion_coeffs: &[Real],
    ) -> WellResult<()> {
        let total_voidage: Real = self
            .nodes
            .iter()
            .filter(|n| n.well_type.is_producer())
            .map(|n| voidage_rates[n.well])
            .sum();
        for g in 0..self.groups.len() {
            let Some(GroupTarget::Vrep { fraction }) = self.groups[g].injection.clone() else {
                continue;
            };
            let members = self.controlled_members(g, WellType::Injector);
            for &w in &members {
                let Some(ctrl) = self.nodes[w].group_control_index else {
                    continue;
                };
                if !matches!(wells.control(w, ctrl), WellControl::ReservoirRate { .. }) {
                    return Err(WellError::InvalidConfig {
                        what: format!(
                            "VREP group control of well {} needs a reservoir rate entry",
                            wells.get(w).name
                        ),
                    });
                }
                let comp_frac = wells.get(w).comp_frac;
                let mut distr = [0.0; 3];
                for p in 0..3 {
                    distr[p] = comp_frac[p] * conversion_coeffs[3 * w + p];
                }
                wells.set_control_distr(w, ctrl, distr);
                wells.set_control_target(w, ctrl, fraction * total_voidage * self.share(&members, w));
            }
        }
        Ok(())
    }
}

fn weighted_rate(distr: &[Real; 3], well_rates: &[Real], w: usize) -> Real {
    distr
        .iter()
        .zip(&well_rates[3 * w..3 * w + 3])
        .map(|(d, q)| d * q)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Well;

    fn producers() -> Wells {
        let mk = |name: &str, cell| {
            Well::producer(name)
                .with_perforation(cell, 1e-12, 1000.0)
                .with_control(WellControl::Bhp { target: 1.0e7 })
                .with_control(WellControl::SurfaceRate {
                    target: -1.0,
                    distr: [0.0, 1.0, 0.0],
                })
                .with_group(0, 1)
        };
        Wells::new(vec![mk("P1", 0), mk("P2", 1)]).unwrap()
    }

    fn collection(wells: &Wells) -> WellCollection {
        let group = GroupNode::new("FIELD").with_production(GroupTarget::SurfaceRate {
            target: -0.03,
            distr: [0.0, 1.0, 0.0],
        });
        let mut c = WellCollection::new(vec![group], wells).unwrap();
        c.set_individual_control(0, false);
        c.set_individual_control(1, false);
        c
    }

    #[test]
    fn guide_rates_split_group_target() {
        let mut wells = producers();
        let mut c = collection(&wells);
        assert!(c.group_control_active());
        c.set_guide_rates_with_potentials(&wells, &[0.0, 2.0, 0.0, 0.0, 1.0, 0.0]);
        c.apply_group_controls(&mut wells);
        assert!((wells.control(0, 1).target() + 0.02).abs() < 1e-15);
        assert!((wells.control(1, 1).target() + 0.01).abs() < 1e-15);
        assert!(c.group_control_applied());
    }

    #[test]
    fn individual_members_reduce_remaining_target() {
        let mut wells = producers();
        let mut c = collection(&wells);
        c.set_individual_control(0, true);
        let rates = [0.0, -0.01, 0.0, 0.0, -0.005, 0.0];
        c.update_well_targets(&mut wells, &rates);
        assert!((wells.control(1, 1).target() + 0.02).abs() < 1e-15);
        assert!(!c.group_target_converged(&rates));
        let met = [0.0, -0.01, 0.0, 0.0, -0.02, 0.0];
        assert!(c.group_target_converged(&met));
    }

    #[test]
    fn unknown_group_is_rejected() {
        let w = Well::producer("P")
            .with_perforation(0, 1.0, 0.0)
            .with_control(WellControl::Bhp { target: 1.0e7 })
            .with_group(3, 0);
        let wells = Wells::new(vec![w]).unwrap();
        assert!(WellCollection::new(Vec::new(), &wells).is_err());
    }
}
