//! Vertical flow performance oracle.

use crate::error::{WellError, WellResult};
use rf_core::{Eval, Real};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Relates surface rates and tubing-head pressure to bottom-hole pressure.
///
/// Rates are signed surface rates (water, oil, gas). Tables are looked up
/// by id; `datum_depth` is the depth the tabulated bhp refers to.
pub trait VfpProperties: Send + Sync {
    fn bhp(
        &self,
        table: usize,
        water: Eval,
        oil: Eval,
        gas: Eval,
        thp: Real,
        alq: Real,
    ) -> WellResult<Eval>;

    /// Inverse of [`VfpProperties::bhp`] in the thp argument.
    fn thp(
        &self,
        table: usize,
        water: Real,
        oil: Real,
        gas: Real,
        bhp: Real,
        alq: Real,
    ) -> WellResult<Real>;

    fn datum_depth(&self, table: usize) -> WellResult<Real>;

    fn bhp_value(
        &self,
        table: usize,
        rates: [Real; 3],
        thp: Real,
        alq: Real,
    ) -> WellResult<Real> {
        self.bhp(
            table,
            Eval::constant(rates[0]),
            Eval::constant(rates[1]),
            Eval::constant(rates[2]),
            thp,
            alq,
        )
        .map(|e| e.value())
    }
}

/// Which rate a table is tabulated against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VfpFlowType {
    #[default]
    Oil,
    Liquid,
    Gas,
    Water,
}

/// Quadratic-in-rate tubing model:
/// `bhp = thp + offset + linear·q + quadratic·q² − alq_coefficient·alq`
/// with `q` the absolute flow rate selected by `flow`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VfpTable {
    pub datum_depth: Real,
    #[serde(default)]
    pub flow: VfpFlowType,
    /// Hydrostatic and friction offset at zero rate (Pa).
    pub offset: Real,
    #[serde(default)]
    pub linear: Real,
    #[serde(default)]
    pub quadratic: Real,
    #[serde(default)]
    pub alq_coefficient: Real,
}

impl VfpTable {
    fn flo(&self, water: Eval, oil: Eval, gas: Eval) -> Eval {
        let q = match self.flow {
            VfpFlowType::Oil => oil,
            VfpFlowType::Liquid => water + oil,
            VfpFlowType::Gas => gas,
            VfpFlowType::Water => water,
        };
        q.abs()
    }

    fn pressure_loss(&self, flo: Eval, alq: Real) -> Eval {
        flo * self.linear + flo * flo * self.quadratic + self.offset - self.alq_coefficient * alq
    }
}

/// Table set keyed by id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VfpTables {
    tables: BTreeMap<usize, VfpTable>,
}

impl VfpTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, id: usize, table: VfpTable) -> Self {
        self.tables.insert(id, table);
        self
    }

    pub fn table(&self, id: usize) -> WellResult<&VfpTable> {
        self.tables
            .get(&id)
            .ok_or(WellError::UnknownVfpTable { table: id })
    }
}

impl VfpProperties for VfpTables {
    fn bhp(
        &self,
        table: usize,
        water: Eval,
        oil: Eval,
        gas: Eval,
        thp: Real,
        alq: Real,
    ) -> WellResult<Eval> {
        let t = self.table(table)?;
        Ok(t.pressure_loss(t.flo(water, oil, gas), alq) + thp)
    }

    fn thp(
        &self,
        table: usize,
        water: Real,
        oil: Real,
        gas: Real,
        bhp: Real,
        alq: Real,
    ) -> WellResult<Real> {
        let t = self.table(table)?;
        let flo = t.flo(
            Eval::constant(water),
            Eval::constant(oil),
            Eval::constant(gas),
        );
        Ok(bhp - t.pressure_loss(flo, alq).value())
    }

    fn datum_depth(&self, table: usize) -> WellResult<Real> {
        Ok(self.table(table)?.datum_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> VfpTables {
        VfpTables::new().with_table(
            1,
            VfpTable {
                datum_depth: 1000.0,
                flow: VfpFlowType::Liquid,
                offset: 5.0e6,
                linear: 1.0e8,
                quadratic: 1.0e9,
                alq_coefficient: 0.0,
            },
        )
    }

    #[test]
    fn thp_inverts_bhp() {
        let t = tables();
        let bhp = t.bhp_value(1, [-0.001, -0.002, -0.5], 2.0e6, 0.0).unwrap();
        let thp = t.thp(1, -0.001, -0.002, -0.5, bhp, 0.0).unwrap();
        assert!((thp - 2.0e6).abs() < 1e-6);
    }

    #[test]
    fn bhp_carries_rate_derivatives() {
        let t = tables();
        let oil = Eval::variable(-0.002, 5);
        let bhp = t
            .bhp(1, Eval::constant(0.0), oil, Eval::constant(0.0), 2.0e6, 0.0)
            .unwrap();
        // d|q|/dq = -1 for negative q
        let expected = -(1.0e8 + 2.0 * 1.0e9 * 0.002);
        assert!((bhp.derivative(5) - expected).abs() < 1e-3);
    }

    #[test]
    fn unknown_table_is_an_error() {
        assert!(matches!(
            tables().datum_depth(9),
            Err(WellError::UnknownVfpTable { table: 9 })
        ));
    }
}
