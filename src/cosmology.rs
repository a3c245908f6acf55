//! Cosmological scale factors for the lensing estimators
//!
//! The crate never computes angular-diameter distances itself; they are read
//! from the catalog and only combined here into the arcsecond-to-Mpc scale
//! and the critical surface density.

use std::f64::consts::PI;

/// Speed of light [m.s-1]
pub const CVEL: f64 = 299_792_458.;
/// Gravitational constant [m3.kg-1.s-2]
pub const G: f64 = 6.670e-11;
/// 1 parsec [m]
pub const PC: f64 = 3.085678e16;
/// Solar mass [kg]
pub const MSUN: f64 = 1.989e30;

#[derive(thiserror::Error, Debug)]
pub enum CosmologyError {
    #[error("expected a positive source distance (DS = {0} Mpc)")]
    SourceDistance(f64),
    #[error("expected a positive lens distance (DL = {0} Mpc)")]
    LensDistance(f64),
}

/// Background cosmology parameters
///
/// Passed explicitly to every profile construction, there is no process-wide
/// default cosmology.
#[derive(Debug, Clone, Copy)]
pub struct Cosmology {
    /// Dimensionless Hubble parameter
    pub h: f64,
}
impl Default for Cosmology {
    fn default() -> Self {
        Self { h: 0.7 }
    }
}

/// Returns the arcsecond-to-Mpc conversion factor at the lens
/// angular-diameter distance `dl` [Mpc]
pub fn mpc_scale(dl: f64) -> f64 {
    dl * (1f64 / 3600.).to_radians()
}

/// Returns the critical surface density [h.Msun.pc-2] for a lens at `dl`,
/// a source at `ds` and a lens-source distance `dls`, all in Mpc
pub fn sigma_critic(dl: f64, ds: f64, dls: f64) -> Result<f64, CosmologyError> {
    if !(ds > 0.) {
        return Err(CosmologyError::SourceDistance(ds));
    }
    if !(dl > 0.) {
        return Err(CosmologyError::LensDistance(dl));
    }
    let beta = dls / ds;
    Ok(CVEL * CVEL / (4. * PI * G * (dl * 1e6 * PC)) / beta * (PC * PC / MSUN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arcsec_scale() {
        let scale = mpc_scale(1000.);
        assert!((scale - 1000. * PI / 180. / 3600.).abs() < 1e-12);
    }

    #[test]
    fn sigma_critic_value() {
        // beta = 0.5 doubles the geometric factor
        let full = sigma_critic(1000., 1000., 500.).unwrap();
        let half = sigma_critic(1000., 1000., 1000.).unwrap();
        assert!((full / half - 2.).abs() < 1e-12);
        assert!(full.is_finite() && full > 0.);
    }

    #[test]
    fn degenerate_source_distance() {
        assert!(matches!(
            sigma_critic(1000., 0., 500.),
            Err(CosmologyError::SourceDistance(_))
        ));
        assert!(matches!(
            sigma_critic(0., 1000., 500.),
            Err(CosmologyError::LensDistance(_))
        ));
    }
}
