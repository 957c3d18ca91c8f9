//! ocrtrain-prep CLI entry point.

use clap::{Parser, Subcommand};
use ocrtrain_common::cli::{styles, CommonArgs};
use ocrtrain_prep::{convert, inspect, ConvertOptions};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ocrtrain-prep")]
#[command(about = "Prepare raw OCR datasets for ocrtrain")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert ICDAR 2019 MLT ground truth into train/val label files
    Icdar {
        /// Raw dataset directory containing train_gt.txt
        #[arg(long, default_value = "./data/icdar2019_mlt")]
        dataset: PathBuf,

        /// Directory for train.txt and val.txt
        #[arg(short, long, default_value = "./data")]
        output: PathBuf,

        /// Fraction of images held out for validation
        #[arg(long, default_value = "0.1")]
        val_split: f64,

        /// Shuffle seed
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Show which expected dataset directories exist
    Inspect {
        /// Raw dataset root
        #[arg(long, default_value = "./data/icdar2019_mlt")]
        data_path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    ocrtrain_common::logging::init(cli.common.verbosity());

    let result = match cli.command {
        Commands::Icdar { dataset, output, val_split, seed } => {
            convert(&ConvertOptions { dataset, output, val_split, seed }).map(|report| {
                if !cli.common.is_quiet() {
                    println!("{}", styles::header("ICDAR 2019 MLT"));
                    println!("Images:     {}", report.images);
                    println!("{}", styles::success(&format!("{} ({} images)", report.train_path.display(), report.train_images)));
                    println!("{}", styles::success(&format!("{} ({} images)", report.val_path.display(), report.val_images)));
                }
            })
        }
        Commands::Inspect { data_path } => inspect(&data_path).map(|layout| {
            println!("{}", styles::header(&layout.root.display().to_string()));
            for dir in &layout.dirs {
                if dir.exists {
                    println!("{}", styles::success(&format!("{} ({} entries)", dir.path.display(), dir.total)));
                    for name in &dir.preview {
                        println!("    {name}");
                    }
                } else {
                    println!("{}", styles::error(&format!("{} is missing", dir.path.display())));
                }
            }
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", styles::error(&format!("[{}] {e}", e.code())));
            ExitCode::FAILURE
        }
    }
}
