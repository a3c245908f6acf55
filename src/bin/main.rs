use std::{collections::BTreeMap, time::Instant};

use cluster_lensing::{Cosmology, ProfileBuilder, SourceCatalog};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "cluster-lensing", about = "Stacked weak lensing shear profiles")]
struct Opt {
    /// Path to the source galaxy catalog (CSV)
    catalog: String,
    /// Inner profile radius [h-1 Mpc]
    #[structopt(long, default_value = "0.1")]
    rin: f64,
    /// Outer profile radius [h-1 Mpc]
    #[structopt(long, default_value = "10.0")]
    rout: f64,
    /// Number of radial bins
    #[structopt(short, long, default_value = "10")]
    bins: usize,
    /// Space the bins linearly instead of geometrically
    #[structopt(long)]
    linear: bool,
    /// Number of bootstrap resamples
    #[structopt(long = "boot-n", default_value = "100")]
    boot_n: usize,
    /// Skip the bootstrap error estimation
    #[structopt(long = "no-boot")]
    no_boot: bool,
    /// Bootstrap resampling seed
    #[structopt(long, default_value = "1")]
    seed: u64,
    /// Dimensionless Hubble parameter
    #[structopt(long, default_value = "0.7")]
    hubble: f64,
    /// Output profile table, appended to
    #[structopt(short, long, default_value = "profile.txt")]
    output: String,
    /// Sample cut parameters recorded in the table header, as `key=value`
    #[structopt(long = "cut")]
    cuts: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let now = Instant::now();
    let catalog = SourceCatalog::load(&opt.catalog)?;
    log::info!(
        "Loaded {} galaxies from {} in {}ms",
        catalog.len(),
        opt.catalog,
        now.elapsed().as_millis()
    );

    let mut builder = ProfileBuilder::default()
        .radial_range(opt.rin, opt.rout)
        .bins(opt.bins)
        .seed(opt.seed)
        .cosmology(Cosmology { h: opt.hubble });
    if opt.linear {
        builder = builder.linear_spacing();
    }
    builder = if opt.no_boot {
        builder.no_bootstrap()
    } else {
        builder.bootstrap(opt.boot_n)
    };
    let profile = builder.build(&catalog)?;

    let header: BTreeMap<String, String> = opt
        .cuts
        .iter()
        .filter_map(|cut| {
            cut.split_once('=')
                .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        })
        .collect();
    profile.write_to(&opt.output, (!header.is_empty()).then_some(&header))?;
    log::info!("Profile appended to {}", opt.output);
    Ok(())
}
