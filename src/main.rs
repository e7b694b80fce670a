use anyhow::Result;
use burn::tensor::backend::AutodiffBackend;
use burn_simple_cnn::data::MnistDataset;
use burn_simple_cnn::model::{CnnNetworkConfig, FcNetworkConfig, Network};
use burn_simple_cnn::training::{self, TrainingReport};

mod backend;
mod cli;

use backend::{MainAutoBackend, MainDevice};
use cli::AppArgs;

pub fn launch<AutoB: AutodiffBackend + MainDevice>(app_args: &AppArgs) -> Result<TrainingReport> {
    let training_config = app_args.training_config()?;
    let train_dataset = MnistDataset::train(&app_args.data_dir)?;
    let test_dataset = MnistDataset::test(&app_args.data_dir)?;

    let device = AutoB::main_device();
    log::info!("training {:?} on {device:?}", app_args.network);

    let report = match app_args.network {
        Network::Fc => training::train::<AutoB, _>(
            &training_config,
            &FcNetworkConfig::new(),
            train_dataset,
            test_dataset,
            device,
        ),
        Network::Cnn => training::train::<AutoB, _>(
            &training_config,
            &CnnNetworkConfig::new(),
            train_dataset,
            test_dataset,
            device,
        ),
    };
    Ok(report)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app_args = AppArgs::parse()?;
    let report = launch::<MainAutoBackend>(&app_args)?;

    println!("Accuracy on training set: {:.2}", report.train_accuracy);
    println!("Accuracy on test set: {:.2}", report.test_accuracy);
    Ok(())
}
