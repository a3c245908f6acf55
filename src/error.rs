use crate::{
    catalog::CatalogError, cosmology::CosmologyError, kappa::KappaError, profile::ProfileError,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the `catalog` module")]
    Catalog(#[from] CatalogError),
    #[error("Error in the `cosmology` module")]
    Cosmology(#[from] CosmologyError),
    #[error("Error in the `profile` module")]
    Profile(#[from] ProfileError),
    #[error("Error in the `kappa` module")]
    Kappa(#[from] KappaError),
}
