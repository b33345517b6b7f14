use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use clap::Parser;
use incremental_sfm::data_loader::SequenceLoader;
use incremental_sfm::io::object_from_json;
use incremental_sfm::reconstruction::{ReconstructionConfig, output_dir_name, run_pipeline};

#[derive(Parser)]
#[command(version, about, author)]
struct SfmCli {
    /// path to a dataset folder holding K.txt and the ordered images
    path: String,

    /// per-axis downscale factor, a power of two
    #[arg(long)]
    downscale: Option<u32>,

    /// run local bundle adjustment each iteration
    #[arg(long)]
    ba: bool,

    /// RANSAC seed shared by the essential and pnp stages
    #[arg(long)]
    seed: Option<u64>,

    /// JSON config file overriding the defaults
    #[arg(long)]
    config: Option<String>,

    /// output directory, defaults to results/ or results_ba/
    #[arg(long)]
    output: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = SfmCli::parse();

    let mut config = match &cli.config {
        Some(path) => object_from_json::<ReconstructionConfig>(Path::new(path))?,
        None => ReconstructionConfig::default(),
    };
    if let Some(downscale) = cli.downscale {
        config.downscale = downscale;
    }
    if cli.ba {
        config.bundle_adjustment = true;
    }
    if let Some(seed) = cli.seed {
        config.essential.seed = seed;
        config.pnp.seed = seed;
    }

    let loader = SequenceLoader::open(Path::new(&cli.path), config.downscale)?;
    let output_dir = cli
        .output
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(output_dir_name(config.bundle_adjustment)));

    // Typing q stops after the current view; partial results still export.
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        std::thread::spawn(move || {
            let mut line = String::new();
            loop {
                line.clear();
                match std::io::stdin().read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if line.trim().eq_ignore_ascii_case("q") {
                            cancel.store(true, Ordering::Relaxed);
                            break;
                        }
                    }
                }
            }
        });
    }

    let now = Instant::now();
    let report = run_pipeline(&loader, &config, &output_dir, &cancel)?;
    println!("reconstruction took {:.6} sec", now.elapsed().as_secs_f64());
    println!("views: {}", report.views);
    println!("cloud points: {}", report.cloud_points);
    println!("final reprojection error: {:.4} px", report.final_error);
    println!("results in {}", output_dir.display());
    Ok(())
}
