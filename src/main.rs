//! ocrtrain CLI
//!
//! # Usage
//!
//! ```bash
//! # Train from config
//! ocrtrain train -c configs/rec/rec_icdar15.yml
//!
//! # Train with overrides
//! ocrtrain train -c configs/rec/rec_icdar15.yml -o Global.epoch_num=10 -o Global.use_gpu=false
//!
//! # Check reconciliation without building a model
//! ocrtrain check -c configs/rec/rec_icdar15.yml
//! ```

use clap::Parser;
use ocrtrain::cli::{run_command, Cli};
use ocrtrain_common::cli::styles;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    ocrtrain_common::logging::init(cli.common.verbosity());

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", styles::error(&format!("[{}] {e}", e.code())));
            if e.is_user_error() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
