//! Accumulated iteration counts and timings.

use core::fmt;
use core::ops::AddAssign;

/// Counters and timings collected over Newton iterations, substeps and
/// report steps. Records merge additively with `+=`.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimulatorReport {
    pub pressure_time: f64,
    pub transport_time: f64,
    pub total_time: f64,
    pub solver_time: f64,
    pub assemble_time: f64,
    pub linear_solve_time: f64,
    pub update_time: f64,
    pub output_write_time: f64,
    pub total_well_iterations: usize,
    pub total_linearizations: usize,
    pub total_newton_iterations: usize,
    pub total_linear_iterations: usize,
    pub converged: bool,
}

impl AddAssign<&SimulatorReport> for SimulatorReport {
    fn add_assign(&mut self, sr: &SimulatorReport) {
        self.pressure_time += sr.pressure_time;
        self.transport_time += sr.transport_time;
        self.total_time += sr.total_time;
        self.solver_time += sr.solver_time;
        self.assemble_time += sr.assemble_time;
        self.linear_solve_time += sr.linear_solve_time;
        self.update_time += sr.update_time;
        self.output_write_time += sr.output_write_time;
        self.total_well_iterations += sr.total_well_iterations;
        self.total_linearizations += sr.total_linearizations;
        self.total_newton_iterations += sr.total_newton_iterations;
        self.total_linear_iterations += sr.total_linear_iterations;
    }
}

impl AddAssign for SimulatorReport {
    fn add_assign(&mut self, sr: SimulatorReport) {
        *self += &sr;
    }
}

impl fmt::Display for SimulatorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total time (seconds):         {:.3}", self.total_time)?;
        writeln!(f, "Solver time (seconds):        {:.3}", self.solver_time)?;
        writeln!(f, " Assembly time (seconds):     {:.3}", self.assemble_time)?;
        writeln!(f, " Linear solve time (seconds): {:.3}", self.linear_solve_time)?;
        writeln!(f, " Update time (seconds):       {:.3}", self.update_time)?;
        writeln!(f, " Output write time (seconds): {:.3}", self.output_write_time)?;
        writeln!(f, "Overall Well Iterations:      {}", self.total_well_iterations)?;
        writeln!(f, "Overall Linearizations:       {}", self.total_linearizations)?;
        writeln!(f, "Overall Newton Iterations:    {}", self.total_newton_iterations)?;
        write!(f, "Overall Linear Iterations:    {}", self.total_linear_iterations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_additive() {
        let mut a = SimulatorReport {
            total_newton_iterations: 3,
            total_linear_iterations: 20,
            assemble_time: 0.5,
            ..Default::default()
        };
        let b = SimulatorReport {
            total_newton_iterations: 2,
            total_linear_iterations: 7,
            total_well_iterations: 4,
            assemble_time: 0.25,
            converged: true,
            ..Default::default()
        };
        a += &b;
        assert_eq!(a.total_newton_iterations, 5);
        assert_eq!(a.total_linear_iterations, 27);
        assert_eq!(a.total_well_iterations, 4);
        assert!((a.assemble_time - 0.75).abs() < 1e-15);
        assert!(!a.converged);
    }

    #[test]
    fn display_lists_iterations() {
        let r = SimulatorReport {
            total_newton_iterations: 12,
            ..Default::default()
        };
        assert!(r.to_string().contains("Overall Newton Iterations:    12"));
    }
}
