use crate::data::{MnistBatch, MnistBatcher, MnistItem};
use crate::model::{ImageClassifier, ModelConfigExt};
use burn::data::dataloader::{DataLoader, DataLoaderBuilder, Progress};
use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer, adaptor::OptimizerAdaptor};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::train::metric::{
    AccuracyMetric, Adaptor, LossMetric, Metric, MetricMetadata, Numeric,
};
use std::sync::Arc;

#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub optimizer: AdamConfig,
    #[config(default = 5)]
    pub num_epochs: usize,
    #[config(default = 64)]
    pub batch_size: usize,
    #[config(default = 1)]
    pub num_workers: usize,
    #[config(default = 1e-3)]
    pub lr: f64,
    #[config(default = 0)]
    pub seed: u64,
    /// Batches between progress lines.
    #[config(default = 100)]
    pub log_interval: usize,
}

impl TrainingConfig {
    /// Adam with the framework defaults and the hyperparameter defaults above.
    pub fn adam() -> Self {
        Self::new(AdamConfig::new())
    }
}

/// Accuracies (in percent) measured once training is over.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainingReport {
    pub train_accuracy: f64,
    pub test_accuracy: f64,
}

pub type Dataloader<B> = Arc<dyn DataLoader<B, MnistBatch<B>> + 'static>;

/// Trains a freshly initialized model and reports its accuracy on both datasets.
pub fn train<AutoB, ModelConfig>(
    training_config: &TrainingConfig,
    model_config: &ModelConfig,
    train_dataset: impl Dataset<MnistItem> + 'static,
    test_dataset: impl Dataset<MnistItem> + 'static,
    training_device: AutoB::Device,
) -> TrainingReport
where
    AutoB: AutodiffBackend,
    ModelConfig: ModelConfigExt<AutoB>,
    ModelConfig::Model: AutodiffModule<AutoB>,
    <ModelConfig::Model as AutodiffModule<AutoB>>::InnerModule:
        ImageClassifier<AutoB::InnerBackend>,
{
    AutoB::seed(&training_device, training_config.seed);

    let mut model = model_config.init(&training_device);
    let mut optim = training_config.optimizer.init::<AutoB, ModelConfig::Model>();

    // the training split is also evaluated once training is over
    let train_dataset = Arc::new(train_dataset);

    let dataloader_train: Dataloader<AutoB> = DataLoaderBuilder::new(MnistBatcher::default())
        .batch_size(training_config.batch_size)
        .shuffle(training_config.seed)
        .num_workers(training_config.num_workers)
        .build(Arc::clone(&train_dataset));

    let mut metric_meta = MetricMetadata {
        progress: Progress::new(0, dataloader_train.num_items()),
        epoch: 1,
        epoch_total: training_config.num_epochs,
        iteration: 0,
        lr: Some(training_config.lr),
    };

    log::info!(
        "training on {} images for {} epochs",
        dataloader_train.num_items(),
        training_config.num_epochs
    );
    for epoch in 1..training_config.num_epochs + 1 {
        metric_meta.epoch = epoch;
        metric_meta.progress = Progress::new(0, dataloader_train.num_items());
        model = epoch_train::<AutoB, _>(
            Arc::clone(&dataloader_train),
            model,
            training_config,
            &mut optim,
            &mut metric_meta,
        );
    }
    log::info!("training finished");

    // evaluation runs without autodiff
    let valid_model = model.valid();
    let train_accuracy = check_accuracy(
        eval_dataloader(training_config, train_dataset),
        &valid_model,
    );
    let test_accuracy = check_accuracy(eval_dataloader(training_config, test_dataset), &valid_model);

    TrainingReport {
        train_accuracy,
        test_accuracy,
    }
}

/// Unshuffled loader over a whole dataset.
pub fn eval_dataloader<B: Backend>(
    training_config: &TrainingConfig,
    dataset: impl Dataset<MnistItem> + 'static,
) -> Dataloader<B> {
    DataLoaderBuilder::new(MnistBatcher::default())
        .batch_size(training_config.batch_size)
        .num_workers(training_config.num_workers)
        .build(dataset)
}

pub fn epoch_train<AutoB, M>(
    dataloader_train: Dataloader<AutoB>,
    mut training_model: M,
    training_config: &TrainingConfig,
    optim: &mut OptimizerAdaptor<Adam, M, AutoB>,
    metric_meta: &mut MetricMetadata,
) -> M
where
    AutoB: AutodiffBackend,
    M: AutodiffModule<AutoB> + ImageClassifier<AutoB>,
{
    let mut loss_metric = LossMetric::<AutoB>::new();
    let mut acc_metric = AccuracyMetric::<AutoB>::new();
    let num_batches = dataloader_train
        .num_items()
        .div_ceil(training_config.batch_size);

    for (b, batch) in dataloader_train.iter().enumerate() {
        let [batch_size, _, _, _] = batch.images.dims();

        metric_meta.iteration += 1;
        metric_meta.progress.items_processed += batch_size;

        let output = training_model.forward_classification(batch.images, batch.targets);
        acc_metric.update(&output.adapt(), metric_meta);
        loss_metric.update(&output.adapt(), metric_meta);

        let grads = output.loss.backward();
        let grads = GradientsParams::from_grads(grads, &training_model);
        training_model = optim.step(training_config.lr, training_model, grads);

        if (b + 1) % training_config.log_interval.max(1) == 0 {
            log::info!(
                "Epoch {}/{}, Batch {:0>4}/{num_batches}, Loss {:.4}, Acc {:0>6.2}",
                metric_meta.epoch,
                metric_meta.epoch_total,
                b + 1,
                loss_metric.value().current(),
                acc_metric.value().current(),
            );
        }
    }

    log::info!(
        "Epoch {}/{}, Avg Loss {:.4}, Avg Acc {:.2}",
        metric_meta.epoch,
        metric_meta.epoch_total,
        loss_metric.running_value().current(),
        acc_metric.running_value().current(),
    );

    training_model
}

/// Percentage of items in `loader` whose highest-scoring class matches the target.
///
/// Returns `0.0` for an empty loader.
pub fn check_accuracy<B: Backend, M: ImageClassifier<B>>(loader: Dataloader<B>, model: &M) -> f64 {
    let mut num_correct = 0;
    let mut num_samples = 0;

    for batch in loader.iter() {
        let [batch_size, _, _, _] = batch.images.dims();
        let scores = model.forward(batch.images);
        num_correct += count_correct(scores, batch.targets);
        num_samples += batch_size;
    }

    if num_samples == 0 {
        return 0.0;
    }
    num_correct as f64 / num_samples as f64 * 100.0
}

/// Number of rows of `scores` whose argmax equals the target.
///
/// # Shapes
///   - scores [batch_size, num_classes]
///   - targets [batch_size]
pub fn count_correct<B: Backend>(scores: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _num_classes] = scores.dims();
    let predictions = scores.argmax(1).reshape([batch_size]);
    predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}
