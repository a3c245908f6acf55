//! Stacked radial shear profile estimator
//!
//! Bins the source galaxies by projected radius around the lens center and
//! computes the weighted tangential and cross excess surface mass density
//! per bin, with a multiplicative calibration correction, an analytic
//! shape-noise error and a bootstrap error.

use std::{collections::BTreeMap, fs::OpenOptions, io::Write, path::Path, time::Instant};

use chrono::Local;
use itertools::Itertools;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    cosmology::{self, Cosmology, CosmologyError},
    sky,
    SourceCatalog,
};

#[derive(thiserror::Error, Debug)]
pub enum ProfileError {
    #[error("expected at least one radial bin")]
    NoBins,
    #[error("expected strictly increasing finite bin edges: {0:?}")]
    Edges(Vec<f64>),
    #[error("expected a positive radial range ({0}, {1})")]
    RadialRange(f64, f64),
    #[error("Invalid critical surface density")]
    Cosmology(#[from] CosmologyError),
    #[error("Failed to write the profile table")]
    Io(#[from] std::io::Error),
}

/// Radial bin edges [h-1.Mpc]
#[derive(Debug, Clone)]
pub struct RadialBins(Vec<f64>);
impl RadialBins {
    /// Returns `nbin` geometrically spaced bins between `rin` and `rout`
    pub fn geometric(rin: f64, rout: f64, nbin: usize) -> Result<Self, ProfileError> {
        if nbin < 1 {
            return Err(ProfileError::NoBins);
        }
        if !(rin > 0. && rout > rin) {
            return Err(ProfileError::RadialRange(rin, rout));
        }
        let ratio = rout / rin;
        Self::from_edges(
            (0..=nbin)
                .map(|i| rin * ratio.powf(i as f64 / nbin as f64))
                .collect(),
        )
    }
    /// Returns `nbin` linearly spaced bins between `rin` and `rout`
    pub fn linear(rin: f64, rout: f64, nbin: usize) -> Result<Self, ProfileError> {
        if nbin < 1 {
            return Err(ProfileError::NoBins);
        }
        if !(rout > rin) {
            return Err(ProfileError::RadialRange(rin, rout));
        }
        Self::from_edges(
            (0..=nbin)
                .map(|i| rin + (rout - rin) * i as f64 / nbin as f64)
                .collect(),
        )
    }
    /// Returns user-supplied bin edges, which must be finite and strictly
    /// increasing
    pub fn from_edges(edges: Vec<f64>) -> Result<Self, ProfileError> {
        if edges.len() < 2 {
            return Err(ProfileError::NoBins);
        }
        if edges.iter().any(|e| !e.is_finite())
            || edges.iter().tuple_windows().any(|(a, b)| b <= a)
        {
            return Err(ProfileError::Edges(edges));
        }
        Ok(Self(edges))
    }
    /// Returns the number of bins
    pub fn nbin(&self) -> usize {
        self.0.len() - 1
    }
    /// Returns the bin edges
    pub fn edges(&self) -> &[f64] {
        &self.0
    }
    /// Returns the bin center radii
    pub fn centers(&self) -> Vec<f64> {
        self.0
            .iter()
            .tuple_windows()
            .map(|(a, b)| 0.5 * (a + b))
            .collect()
    }
    /// Returns the right-open bin index of `r`, or `None` when `r` falls
    /// outside the radial range (a galaxy exactly at the outer edge is
    /// excluded)
    fn index_of(&self, r: f64) -> Option<usize> {
        match self.0.iter().position(|&edge| r < edge) {
            Some(0) | None => None,
            Some(i) => Some(i - 1),
        }
    }
}

/// Radial shear profile builder
///
/// Defaults: 10 geometrically spaced bins over 0.1-10 h-1.Mpc, 100 bootstrap
/// resamples with seed 1 and `h = 0.7`.
#[derive(Debug, Clone)]
pub struct ProfileBuilder {
    rin_hmpc: f64,
    rout_hmpc: f64,
    nbin: usize,
    log_spaced: bool,
    edges: Option<Vec<f64>>,
    boot_n: Option<usize>,
    seed: u64,
    cosmo: Cosmology,
}
impl Default for ProfileBuilder {
    fn default() -> Self {
        Self {
            rin_hmpc: 0.1,
            rout_hmpc: 10.,
            nbin: 10,
            log_spaced: true,
            edges: None,
            boot_n: Some(100),
            seed: 1,
            cosmo: Cosmology::default(),
        }
    }
}
impl ProfileBuilder {
    /// Sets the radial range [h-1.Mpc]
    pub fn radial_range(self, rin_hmpc: f64, rout_hmpc: f64) -> Self {
        Self {
            rin_hmpc,
            rout_hmpc,
            ..self
        }
    }
    /// Sets the number of radial bins
    pub fn bins(self, nbin: usize) -> Self {
        Self { nbin, ..self }
    }
    /// Switches to linearly spaced bins
    pub fn linear_spacing(self) -> Self {
        Self {
            log_spaced: false,
            ..self
        }
    }
    /// Sets user-supplied bin edges, overriding the radial range and spacing
    pub fn edges(self, edges: Vec<f64>) -> Self {
        Self {
            edges: Some(edges),
            ..self
        }
    }
    /// Sets the number of bootstrap resamples
    pub fn bootstrap(self, boot_n: usize) -> Self {
        Self {
            boot_n: Some(boot_n),
            ..self
        }
    }
    /// Disables the bootstrap error estimation
    pub fn no_bootstrap(self) -> Self {
        Self {
            boot_n: None,
            ..self
        }
    }
    /// Sets the bootstrap resampling seed
    pub fn seed(self, seed: u64) -> Self {
        Self { seed, ..self }
    }
    /// Sets the background cosmology
    pub fn cosmology(self, cosmo: Cosmology) -> Self {
        Self { cosmo, ..self }
    }
    /// Builds the radial profile from a source catalog
    pub fn build(self, cat: &SourceCatalog) -> Result<RadialProfile, ProfileError> {
        let now = Instant::now();
        let bins = match self.edges {
            Some(edges) => RadialBins::from_edges(edges)?,
            None if self.log_spaced => {
                RadialBins::geometric(self.rin_hmpc, self.rout_hmpc, self.nbin)?
            }
            None => RadialBins::linear(self.rin_hmpc, self.rout_hmpc, self.nbin)?,
        };
        let nbin = bins.nbin();

        // Per-galaxy projected radius [h-1.Mpc] and tangential/cross excess
        // surface density samples, the position angle is offset by 90 deg
        // before the spin-2 rotation
        let mut dist_hmpc = Vec::with_capacity(cat.len());
        let mut delta_t = Vec::with_capacity(cat.len());
        let mut delta_x = Vec::with_capacity(cat.len());
        let mut sigma_c = Vec::with_capacity(cat.len());
        for gal in cat.iter() {
            let sc = cosmology::sigma_critic(gal.dl, gal.ds, gal.dls)?;
            let (dist, theta) = sky::angular_vector(gal.raj2000, gal.decj2000, gal.ra, gal.dec);
            let (et, ex) = sky::polar_rotation(gal.e1, gal.e2, (theta + 90.).to_radians());
            dist_hmpc.push(dist * 3600. * cosmology::mpc_scale(gal.dl) * self.cosmo.h);
            delta_t.push(et * sc);
            delta_x.push(ex * sc);
            sigma_c.push(sc);
        }
        let digit: Vec<Option<usize>> = dist_hmpc.iter().map(|&r| bins.index_of(r)).collect();

        let mut profile = RadialProfile {
            r_hmpc: bins.centers(),
            shear: vec![0.; nbin],
            shear_error: vec![0.; nbin],
            cero: vec![0.; nbin],
            cero_error: vec![0.; nbin],
            stat_error: vec![0.; nbin],
            n: vec![0; nbin],
            bins: bins.0,
        };

        for i in 0..nbin {
            let members: Vec<usize> = digit
                .iter()
                .enumerate()
                .filter_map(|(k, digit)| (*digit == Some(i)).then_some(k))
                .collect();
            profile.n[i] = members.len();
            let weight: Vec<f64> = members
                .iter()
                .map(|&k| cat[k].weight / (sigma_c[k] * sigma_c[k]))
                .collect();
            let wsum: f64 = weight.iter().sum();
            // an empty or zero-weight bin keeps its zeroed statistics
            if !(wsum > 0.) {
                continue;
            }
            let m_cal = 1.
                + members
                    .iter()
                    .zip(&weight)
                    .map(|(&k, w)| cat[k].m * w)
                    .sum::<f64>()
                    / wsum;

            let st: Vec<f64> = members.iter().map(|&k| delta_t[k]).collect();
            let sx: Vec<f64> = members.iter().map(|&k| delta_x[k]).collect();
            profile.shear[i] = weighted_mean(&st, &weight) / m_cal;
            profile.cero[i] = weighted_mean(&sx, &weight) / m_cal;

            // 0.25 models the per-galaxy shape-noise variance
            let stat_num: f64 = members
                .iter()
                .zip(&weight)
                .map(|(&k, w)| (0.25 * w * sigma_c[k]).powi(2))
                .sum();
            profile.stat_error[i] = (stat_num / (wsum * wsum)).sqrt() / m_cal;

            if let Some(boot_n) = self.boot_n {
                let (err_t, err_x) = boot_error(&st, &sx, &weight, boot_n, self.seed);
                profile.shear_error[i] = err_t / m_cal;
                profile.cero_error[i] = err_x / m_cal;
            }
        }
        log::info!(
            "Binned {}/{} galaxies into {} radial bins in {}ms",
            profile.n.iter().sum::<usize>(),
            cat.len(),
            nbin,
            now.elapsed().as_millis()
        );
        Ok(profile)
    }
}

/// Binned excess surface mass density profile
#[derive(Debug, Clone, Default)]
pub struct RadialProfile {
    /// Radial bin edges [h-1.Mpc]
    pub bins: Vec<f64>,
    /// Bin center radius [h-1.Mpc]
    pub r_hmpc: Vec<f64>,
    /// Tangential excess surface density [h.Msun.pc-2]
    pub shear: Vec<f64>,
    /// Bootstrap error on `shear`
    pub shear_error: Vec<f64>,
    /// Cross component, a null test for systematics [h.Msun.pc-2]
    pub cero: Vec<f64>,
    /// Bootstrap error on `cero`
    pub cero_error: Vec<f64>,
    /// Analytic shape-noise error
    pub stat_error: Vec<f64>,
    /// Galaxy count per bin
    pub n: Vec<usize>,
}
impl RadialProfile {
    /// Appends the profile table to `path` with a provenance header
    ///
    /// The optional `header` entries record the sample cut parameters used
    /// to build the catalog, e.g. `z_min = 0.1`.
    pub fn write_to<P: AsRef<Path>>(
        &self,
        path: P,
        header: Option<&BTreeMap<String, String>>,
    ) -> Result<(), ProfileError> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "# {}", "-".repeat(48))?;
        writeln!(file, "# Lensing profile ")?;
        if let Some(header) = header {
            for (key, value) in header {
                writeln!(file, "# {:<14} = {}", key, value)?;
            }
        }
        writeln!(file, "# ")?;
        writeln!(file, "# {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(file, "# {}", "-".repeat(48))?;
        writeln!(file, " r_hMpc, shear, shear_error, cero, cero_error, stat_error ")?;
        for i in 0..self.r_hmpc.len() {
            writeln!(
                file,
                "{:12.6} {:12.6} {:12.6} {:12.6} {:12.6} {:12.6}",
                self.r_hmpc[i],
                self.shear[i],
                self.shear_error[i],
                self.cero[i],
                self.cero_error[i],
                self.stat_error[i]
            )?;
        }
        Ok(())
    }
}

fn weighted_mean(values: &[f64], weight: &[f64]) -> f64 {
    values
        .iter()
        .zip(weight)
        .map(|(v, w)| v * w)
        .sum::<f64>()
        / weight.iter().sum::<f64>()
}

/// Population standard deviation
fn std_dev(values: &[f64]) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    (values
        .iter()
        .map(|v| (v - mean) * (v - mean))
        .sum::<f64>()
        / values.len() as f64)
        .sqrt()
}

/// Bootstrap error on the weighted mean of the tangential and cross samples
///
/// Resamples the in-bin indices with replacement `boot_n` times from a rng
/// seeded per bin, so a given seed reproduces identical errors
fn boot_error(
    delta_t: &[f64],
    delta_x: &[f64],
    weight: &[f64],
    boot_n: usize,
    seed: u64,
) -> (f64, f64) {
    let n = delta_t.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut t_means = Vec::with_capacity(boot_n);
    let mut x_means = Vec::with_capacity(boot_n);
    for _ in 0..boot_n {
        let (mut st, mut sx, mut sw) = (0f64, 0f64, 0f64);
        for _ in 0..n {
            let k = rng.gen_range(0..n);
            st += delta_t[k] * weight[k];
            sx += delta_x[k] * weight[k];
            sw += weight[k];
        }
        t_means.push(st / sw);
        x_means.push(sx / sw);
    }
    (std_dev(&t_means), std_dev(&x_means))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::galaxy;
    use crate::cosmology::sigma_critic;

    fn catalog(galaxies: Vec<crate::Galaxy>) -> SourceCatalog {
        SourceCatalog::from_galaxies(galaxies).unwrap()
    }

    #[test]
    fn bin_centers() {
        let bins = RadialBins::geometric(0.1, 10., 10).unwrap();
        let centers = bins.centers();
        assert_eq!(centers.len(), bins.edges().len() - 1);
        assert!(centers.iter().tuple_windows().all(|(a, b)| b > a));
    }

    #[test]
    fn decreasing_edges() {
        assert!(matches!(
            RadialBins::from_edges(vec![0.1, 1., 0.5]),
            Err(ProfileError::Edges(_))
        ));
        assert!(matches!(
            RadialBins::from_edges(vec![0.1]),
            Err(ProfileError::NoBins)
        ));
    }

    #[test]
    fn single_galaxy_profile() {
        // source due east of the lens on the equator: position angle 90 deg,
        // the 90 deg offset then maps e1 onto the tangential component
        let mut gal = galaxy();
        gal.dec = 0.;
        gal.decj2000 = 0.;
        gal.ra = 150.;
        gal.raj2000 = 150.01;
        let cat = catalog(vec![gal]);
        let profile = ProfileBuilder::default()
            .edges(vec![0.01, 1.0])
            .no_bootstrap()
            .build(&cat)
            .unwrap();
        assert_eq!(profile.n, vec![1]);
        // single galaxy, m = 0: the weighted mean is e1 * sigma_critic
        let expected = 0.1 * sigma_critic(1000., 1000., 500.).unwrap();
        assert!((profile.shear[0] - expected).abs() / expected < 1e-9);
        assert!(profile.cero[0].abs() / expected < 1e-9);
        assert!(profile.stat_error[0] > 0.);
    }

    #[test]
    fn empty_bin_defaults_to_zero() {
        let mut gal = galaxy();
        gal.dec = 0.;
        gal.decj2000 = 0.;
        gal.ra = 150.;
        gal.raj2000 = 150.01;
        let cat = catalog(vec![gal]);
        let profile = ProfileBuilder::default()
            .edges(vec![0.01, 1.0, 2.0])
            .build(&cat)
            .unwrap();
        assert_eq!(profile.n[1], 0);
        assert_eq!(profile.shear[1], 0.);
        assert_eq!(profile.cero[1], 0.);
        assert_eq!(profile.shear_error[1], 0.);
        assert_eq!(profile.cero_error[1], 0.);
        assert_eq!(profile.stat_error[1], 0.);
    }

    #[test]
    fn outer_edge_is_excluded() {
        let bins = RadialBins::from_edges(vec![0.1, 1., 10.]).unwrap();
        assert_eq!(bins.index_of(0.1), Some(0));
        assert_eq!(bins.index_of(1.), Some(1));
        assert_eq!(bins.index_of(10.), None);
        assert_eq!(bins.index_of(0.05), None);
    }

    #[test]
    fn bootstrap_is_reproducible() {
        let galaxies: Vec<_> = (0..20)
            .map(|k| {
                let mut gal = galaxy();
                gal.dec = 0.;
                gal.decj2000 = 0.;
                gal.raj2000 = 150. + 0.002 * (k + 1) as f64;
                gal.e1 = 0.1 + 0.01 * k as f64;
                gal.e2 = -0.05 + 0.004 * k as f64;
                gal
            })
            .collect();
        let cat = catalog(galaxies);
        let builder = ProfileBuilder::default().edges(vec![0.01, 1.0]).seed(42);
        let a = builder.clone().build(&cat).unwrap();
        let b = builder.build(&cat).unwrap();
        assert!(a.shear_error[0] > 0.);
        assert_eq!(a.shear_error, b.shear_error);
        assert_eq!(a.cero_error, b.cero_error);
    }

    #[test]
    fn single_resample_bootstrap_is_degenerate() {
        // the population std of a single resample mean is exactly zero
        let mut gal = galaxy();
        gal.dec = 0.;
        gal.decj2000 = 0.;
        gal.raj2000 = 150.01;
        let cat = catalog(vec![gal]);
        let profile = ProfileBuilder::default()
            .edges(vec![0.01, 1.0])
            .bootstrap(1)
            .build(&cat)
            .unwrap();
        assert_eq!(profile.shear_error[0], 0.);
        assert_eq!(profile.cero_error[0], 0.);
    }

    #[test]
    fn append_twice() {
        let mut gal = galaxy();
        gal.dec = 0.;
        gal.decj2000 = 0.;
        gal.raj2000 = 150.01;
        let cat = catalog(vec![gal]);
        let profile = ProfileBuilder::default()
            .edges(vec![0.01, 1.0])
            .build(&cat)
            .unwrap();
        let path = std::env::temp_dir().join(format!(
            "cluster-lensing-profile-{}.txt",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let mut header = BTreeMap::new();
        header.insert("z_min".to_string(), "0.1".to_string());
        profile.write_to(&path, Some(&header)).unwrap();
        profile.write_to(&path, None).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(contents.matches("# Lensing profile").count(), 2);
        assert_eq!(contents.matches("r_hMpc,").count(), 2);
        assert_eq!(contents.matches("z_min").count(), 1);
        // one data row per bin and per block, each parseable
        let rows: Vec<Vec<f64>> = contents
            .lines()
            .filter(|line| !line.starts_with('#') && !line.contains("r_hMpc"))
            .map(|line| {
                line.split_whitespace()
                    .map(|v| v.parse().unwrap())
                    .collect()
            })
            .collect();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.len() == 6));
    }
}
