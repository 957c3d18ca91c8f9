//! `ocrtrain check`

use super::ConfigArgs;
use crate::config::load_config;
use crate::error::{Error, Result};
use crate::pipeline;
use ocrtrain_common::cli::styles;

pub fn run_check(args: ConfigArgs, quiet: bool) -> Result<()> {
    let config = load_config(&args.config)?.with_overrides(&args.overrides)?;
    let reconciled = pipeline::check(&config)?;

    if !quiet {
        println!("{}", styles::header("Architecture"));
    }
    let yaml = serde_yaml::to_string(&reconciled.spec().to_value()).map_err(|e| Error::Serialization(e.to_string()))?;
    print!("{yaml}");
    if !quiet {
        let detail = match reconciled.vocabulary_len() {
            Some(n) => format!("Configuration is consistent, vocabulary of {n} symbols"),
            None => "Configuration is consistent".to_string(),
        };
        println!("{}", styles::success(&detail));
    }
    Ok(())
}
