// rf-core/src/units.rs
//
// Values cross crate boundaries as plain SI `f64`; uom handles the field
// unit conversions.

use uom::si::f64::{Pressure as UomPressure, Time as UomTime, Volume as UomVolume};

// Public canonical unit types (SI, f64)
pub type Pressure = UomPressure;
pub type Time = UomTime;
pub type Volume = UomVolume;

#[inline]
pub fn bar(v: f64) -> Pressure {
    use uom::si::pressure::bar;
    Pressure::new::<bar>(v)
}

#[inline]
pub fn s(v: f64) -> Time {
    use uom::si::time::second;
    Time::new::<second>(v)
}

#[inline]
pub fn days(v: f64) -> Time {
    use uom::si::time::day;
    Time::new::<day>(v)
}

/// Seconds to days, for log output.
#[inline]
pub fn to_days(seconds: f64) -> f64 {
    use uom::si::time::day;
    s(seconds).get::<day>()
}

/// Days to seconds.
#[inline]
pub fn days_to_seconds(d: f64) -> f64 {
    use uom::si::time::second;
    days(d).get::<second>()
}

/// Bar to pascal.
#[inline]
pub fn bar_to_pa(v: f64) -> f64 {
    use uom::si::pressure::pascal;
    bar(v).get::<pascal>()
}

/// Surface rate given in m³/day, returned in m³/s.
#[inline]
pub fn m3_per_day(v: f64) -> f64 {
    v / days_to_seconds(1.0)
}

pub mod constants {
    use super::*;

    /// Standard gravity (m/s²).
    pub const G0_MPS2: f64 = 9.806_65;

    /// Well-bore storage volume of the well accumulation term (0.1 ft³).
    #[inline]
    pub fn well_storage_volume_m3() -> f64 {
        use uom::si::volume::{cubic_foot, cubic_meter};
        Volume::new::<cubic_foot>(0.1).get::<cubic_meter>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_conversions() {
        assert!((days_to_seconds(1.0) - 86_400.0).abs() < 1e-9);
        assert!((to_days(43_200.0) - 0.5).abs() < 1e-12);
        assert!((bar_to_pa(200.0) - 2.0e7).abs() < 1e-6);
        assert!((m3_per_day(500.0) * 86_400.0 - 500.0).abs() < 1e-9);
    }

    #[test]
    fn storage_volume_is_tenth_cubic_foot() {
        assert!((constants::well_storage_volume_m3() - 0.002_831_684_659_2).abs() < 1e-12);
    }
}
