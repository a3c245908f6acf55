//! Galaxy cluster weak gravitational lensing
//!
//! Two estimators over measured source galaxy shape distortions:
//!  - [`ProfileBuilder`] bins a [`SourceCatalog`] by projected radius around
//!    the lens center into a [`RadialProfile`] of the excess surface mass
//!    density, with inverse-variance weighting, multiplicative bias
//!    calibration and bootstrap errors,
//!  - [`KappaMap`] reconstructs a 2D convergence (projected mass) map from a
//!    [`ShearGrid`] with the Kaiser-Squires Fourier inversion.
//!
//! ```no_run
//! use cluster_lensing::{ProfileBuilder, SourceCatalog};
//!
//! # fn main() -> anyhow::Result<()> {
//! let catalog = SourceCatalog::load("catalog.csv")?;
//! let profile = ProfileBuilder::default()
//!     .radial_range(0.1, 10.)
//!     .bins(10)
//!     .build(&catalog)?;
//! profile.write_to("profile.txt", None)?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod cosmology;
mod error;
pub mod kappa;
pub mod profile;
pub mod sky;

pub use catalog::{Galaxy, SourceCatalog};
pub use cosmology::Cosmology;
pub use error::Error;
pub use kappa::{KappaMap, ShearGrid};
pub use profile::{ProfileBuilder, RadialBins, RadialProfile};
