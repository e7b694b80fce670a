use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use burn::train::ClassificationOutput;
use std::str::FromStr;

pub mod cnn;
pub mod fc;

pub use cnn::{CnnNetwork, CnnNetworkConfig};
pub use fc::{FcNetwork, FcNetworkConfig};

pub trait ModelConfigExt<B: Backend>: Config {
    type Model: ImageClassifier<B>;
    fn init(&self, device: &B::Device) -> Self::Model;
}

/// A model mapping a batch of single-channel images to class scores.
pub trait ImageClassifier<B: Backend>: Module<B> {
    /// # Shapes
    ///   - Input [batch_size, 1, HEIGHT, WIDTH]
    ///   - Output [batch_size, num_classes]
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let [batch_size, _, _, _] = images.dims();
        assert_eq!([batch_size], targets.dims());

        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

/// Which network the binary trains.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Network {
    /// Two linear layers.
    Fc,
    /// Two convolution + pooling stages and a linear head.
    #[default]
    Cnn,
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fc" | "nn" | "mlp" => Ok(Network::Fc),
            "cnn" => Ok(Network::Cnn),
            other => Err(format!("unknown network {other:?}, expected fc or cnn")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::NUM_CLASSES;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn network_from_str() {
        assert_eq!("fc".parse::<Network>(), Ok(Network::Fc));
        assert_eq!("MLP".parse::<Network>(), Ok(Network::Fc));
        assert_eq!("cnn".parse::<Network>(), Ok(Network::Cnn));
        assert!("rnn".parse::<Network>().is_err());
        assert_eq!(Network::default(), Network::Cnn);
    }

    #[test]
    fn classification_output_has_scalar_loss() {
        let device = Default::default();
        let model = ModelConfigExt::<B>::init(&FcNetworkConfig::new(), &device);
        let images = Tensor::<B, 4>::zeros([3, 1, 28, 28], &device);
        let targets = Tensor::<B, 1, Int>::from_data([0, 5, 9], &device);

        let output = model.forward_classification(images, targets);
        assert_eq!(output.output.dims(), [3, NUM_CLASSES]);
        assert_eq!(output.loss.dims(), [1]);
        let loss = output.loss.into_scalar().elem::<f32>();
        assert!(loss.is_finite() && loss > 0.0);
    }
}
