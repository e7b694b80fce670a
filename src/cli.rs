use anyhow::{Context, Result, bail, ensure};
use burn::prelude::*;
use burn_simple_cnn::data::DEFAULT_DATA_DIR;
use burn_simple_cnn::model::Network;
use burn_simple_cnn::training::TrainingConfig;
use std::path::{Path, PathBuf};

pub const HELP: &str = "\
Burn Simple CNN

Trains a small classifier on MNIST and prints its accuracy on the training and test sets.
The dataset is downloaded into the data directory when missing.

USAGE:
    burn-simple-cnn [OPTIONS]

FLAGS:
    -h, --help                  Show this help message and exit

OPTIONS:
    -n, --network <fc|cnn>      Network to train (default: cnn)
                                fc also accepts the aliases nn and mlp
    -d, --data-dir <PATH>       Dataset root directory (default: ../data)
    -c, --training-config <PATH>
                                Load the training configuration from this JSON file
                                instead of the built-in hyperparameters
";

#[derive(Debug)]
pub struct AppArgs {
    pub network: Network,
    pub data_dir: PathBuf,
    pub training_config: Option<PathBuf>,
}

impl AppArgs {
    pub fn parse() -> Result<Self> {
        Self::parse_from(pico_args::Arguments::from_env())
    }

    pub fn parse_from(mut pargs: pico_args::Arguments) -> Result<Self> {
        // Help has a higher priority and should be handled separately.
        if pargs.contains(["-h", "--help"]) {
            println!("{HELP}");
            std::process::exit(0);
        }

        let args = AppArgs {
            network: pargs
                .opt_value_from_str(["-n", "--network"])?
                .unwrap_or_default(),
            data_dir: pargs
                .opt_value_from_os_str(["-d", "--data-dir"], parse_path)?
                .unwrap_or_else(|| DEFAULT_DATA_DIR.into()),
            training_config: pargs
                .opt_value_from_os_str(["-c", "--training-config"], parse_path)?,
        };

        let remaining = pargs.finish();
        if !remaining.is_empty() {
            bail!("unused arguments: {remaining:?}");
        }

        Ok(args)
    }

    /// The configuration file if one was given, otherwise the built-in defaults.
    pub fn training_config(&self) -> Result<TrainingConfig> {
        let config = match &self.training_config {
            Some(path) => load_training_config(path)?,
            None => TrainingConfig::adam(),
        };
        ensure!(config.batch_size > 0, "batch_size must be at least 1");
        Ok(config)
    }
}

fn parse_path(s: &std::ffi::OsStr) -> Result<PathBuf, &'static str> {
    Ok(s.into())
}

pub fn load_training_config(path: &Path) -> Result<TrainingConfig> {
    log::info!("loading training config from {path:?}");
    let exists = std::fs::exists(path).with_context(|| format!("failed to check {path:?}"))?;
    if !exists {
        bail!("training config {path:?} does not exist");
    }
    TrainingConfig::load(path)
        .map_err(|err| anyhow::anyhow!("failed to load the training config {path:?}: {err:?}"))
}
