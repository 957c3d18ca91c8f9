//! Command-line arguments

use crate::config::Override;
use clap::{Args, Parser, Subcommand};
use ocrtrain_common::CommonArgs;
use std::path::PathBuf;

/// Configuration-driven training for text recognition models
#[derive(Parser, Debug, Clone)]
#[command(name = "ocrtrain")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Train (or profile) a model from a YAML configuration
    Train(ConfigArgs),

    /// Build the post-process, reconcile the architecture and print it
    Check(ConfigArgs),
}

/// Configuration file plus overrides, shared by every command.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Path to the YAML configuration
    #[arg(short, long, value_name = "CONFIG")]
    pub config: PathBuf,

    /// Override a value, e.g. `-o Global.epoch_num=10`; repeatable
    #[arg(short = 'o', long = "opt", value_name = "KEY=VALUE", value_parser = parse_override)]
    pub overrides: Vec<Override>,
}

fn parse_override(s: &str) -> Result<Override, String> {
    s.parse().map_err(|e: crate::Error| e.to_string())
}

/// Parse arguments from an iterator, for tests.
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_train_with_overrides() {
        let cli = parse_args([
            "ocrtrain",
            "train",
            "-c",
            "configs/rec.yml",
            "-o",
            "Global.epoch_num=3",
            "-o",
            "Train.loader.shuffle=false",
            "--verbose",
        ])
        .unwrap();
        let Command::Train(args) = cli.command else { panic!("expected train") };
        assert_eq!(args.config, PathBuf::from("configs/rec.yml"));
        assert_eq!(args.overrides.len(), 2);
        assert_eq!(args.overrides[0].path, vec!["Global", "epoch_num"]);
        assert!(cli.common.verbose);
    }

    #[test]
    fn test_check_requires_config() {
        assert!(parse_args(["ocrtrain", "check"]).is_err());
        assert!(parse_args(["ocrtrain", "check", "-c", "rec.yml"]).is_ok());
    }

    #[test]
    fn test_malformed_override_rejected() {
        assert!(parse_args(["ocrtrain", "train", "-c", "rec.yml", "-o", "no_equals"]).is_err());
    }
}
