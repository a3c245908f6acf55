//! Source galaxy catalog ingestion
//!
//! The catalog is validated once at the ingestion boundary so the binning
//! loops can assume well-formed records.

use std::{fs::File, io, ops::Deref, path::Path};

use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("Failed to open the catalog file")]
    Io(#[from] io::Error),
    #[error("Failed to deserialize the catalog records")]
    Csv(#[from] csv::Error),
    #[error("the catalog is empty")]
    Empty,
    #[error("galaxy #{0}: expected a non-negative weight (weight = {1})")]
    Weight(usize, f64),
    #[error("galaxy #{0}: expected positive distances (DL = {1}, DS = {2}, DLS = {3} Mpc)")]
    Distances(usize, f64, f64, f64),
}

/// Source galaxy record
///
/// Field names and units (degrees for positions, Mpc for distances) are the
/// contract with the upstream ingestion pipeline.
#[derive(Deserialize, Debug, Clone)]
pub struct Galaxy {
    /// Source right ascension [deg]
    #[serde(rename = "RAJ2000")]
    pub raj2000: f64,
    /// Source declination [deg]
    #[serde(rename = "DECJ2000")]
    pub decj2000: f64,
    /// Lens right ascension [deg]
    #[serde(rename = "RA")]
    pub ra: f64,
    /// Lens declination [deg]
    #[serde(rename = "DEC")]
    pub dec: f64,
    /// Ellipticity components
    pub e1: f64,
    pub e2: f64,
    /// Multiplicative shear calibration bias
    pub m: f64,
    /// Statistical weight
    pub weight: f64,
    /// Lens angular-diameter distance [Mpc]
    #[serde(rename = "DL")]
    pub dl: f64,
    /// Source angular-diameter distance [Mpc]
    #[serde(rename = "DS")]
    pub ds: f64,
    /// Lens-source angular-diameter distance [Mpc]
    #[serde(rename = "DLS")]
    pub dls: f64,
}

/// Validated source galaxy catalog
#[derive(Debug, Clone)]
pub struct SourceCatalog(Vec<Galaxy>);
impl Deref for SourceCatalog {
    type Target = Vec<Galaxy>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl SourceCatalog {
    /// Loads the catalog from a CSV file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        Self::from_reader(File::open(path)?)
    }
    /// Loads the catalog from a CSV reader
    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self, CatalogError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut galaxies = Vec::<Galaxy>::new();
        for result in rdr.deserialize() {
            galaxies.push(result?);
        }
        Self::from_galaxies(galaxies)
    }
    /// Builds the catalog from galaxy records
    pub fn from_galaxies(galaxies: Vec<Galaxy>) -> Result<Self, CatalogError> {
        if galaxies.is_empty() {
            return Err(CatalogError::Empty);
        }
        for (k, gal) in galaxies.iter().enumerate() {
            if !(gal.weight >= 0.) {
                return Err(CatalogError::Weight(k, gal.weight));
            }
            if !(gal.dl > 0. && gal.ds > 0. && gal.dls > 0.) {
                return Err(CatalogError::Distances(k, gal.dl, gal.ds, gal.dls));
            }
        }
        Ok(Self(galaxies))
    }
}
