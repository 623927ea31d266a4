//! Length unit helpers
//!
//! Board lengths are integer nanometres; documents and logs use millimetres.

/// Nanometres per millimetre
pub const NM_PER_MM: f64 = 1_000_000.0;

/// Nanometres per mil (thousandth of an inch)
pub const NM_PER_MIL: f64 = 25_400.0;

/// Fixed-point scale for ratio-valued constraints (parts per million)
pub const PPM: f64 = 1_000_000.0;

/// Convert millimetres to nanometres, rounding to the nearest nanometre
pub fn mm(value: f64) -> i32 {
    (value * NM_PER_MM).round() as i32
}

/// Convert mils to nanometres
pub fn mils(value: f64) -> i32 {
    (value * NM_PER_MIL).round() as i32
}

/// Convert nanometres back to millimetres
pub fn to_mm(value: i32) -> f64 {
    f64::from(value) / NM_PER_MM
}

/// Convert a plain ratio (1.0 = 100%) to parts per million
pub fn ratio_to_ppm(value: f64) -> i32 {
    (value * PPM).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mm_round_trip() {
        assert_eq!(mm(0.15), 150_000);
        assert_eq!(mm(0.2), 200_000);
        assert!((to_mm(300_000) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_mils() {
        assert_eq!(mils(6.0), 152_400);
    }
}
