use std::{
    error::Error,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use stereo_tags::{detect, marker::Reflectance, tracker::DetectConfig};

/// Fiducial tag generation and detection.
#[derive(Debug, Parser)]
#[command(author, version, about = "Stereo fiducial tag tools")]
struct Args {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a printable tag image.
    Generate {
        /// Tag identifier, 0..=1023.
        #[arg(long)]
        id: u32,
        /// Width of the 8×8 module grid in pixels.
        #[arg(long, default_value_t = 400)]
        width: usize,
        /// Background padding in modules.
        #[arg(long, default_value_t = 1)]
        border: usize,
        /// Light modules on a dark background.
        #[arg(long)]
        inverted: bool,
        #[arg(long)]
        output: PathBuf,
    },
    /// Detect tags in one image described by a JSON config.
    Detect {
        #[arg(long)]
        config: PathBuf,
    },
}

fn init_logging(verbose: u8) -> Result<(), Box<dyn Error>> {
    #[cfg(feature = "tracing")]
    {
        let _ = verbose;
        stereo_tags::core::init_tracing(false);
        Ok(())
    }
    #[cfg(not(feature = "tracing"))]
    {
        stereo_tags::core::init_with_level(stereo_tags::core::level_from_verbosity(verbose))?;
        Ok(())
    }
}

fn run_detect(config_path: &Path) -> Result<(), Box<dyn Error>> {
    let cfg = DetectConfig::load_json(config_path)?;
    let report = detect::run_detect_config(&cfg, config_path);
    let output = cfg.output_path();
    report.write_json(&output)?;

    if let Some(err) = &report.error {
        return Err(format!("detection failed: {err}").into());
    }
    println!("detected {} tags, report written to {}", report.tags.len(), output.display());
    for tag in &report.tags {
        println!("  id {} ({:?})", tag.id, tag.reflectance);
    }
    Ok(())
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    match args.command {
        Command::Generate {
            id,
            width,
            border,
            inverted,
            output,
        } => {
            let reflectance = if inverted {
                Reflectance::Inverted
            } else {
                Reflectance::Normal
            };
            detect::save_tag_image(&output, id, reflectance, width, border)?;
            println!("wrote tag {id} to {}", output.display());
        }
        Command::Detect { config } => run_detect(&config)?,
    }
    Ok(())
}
