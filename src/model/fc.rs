use crate::data::{HEIGHT, NUM_CLASSES, WIDTH};
use crate::model::{ImageClassifier, ModelConfigExt};
use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;

/// Fully-connected network with a single hidden layer.
#[derive(Module, Debug)]
pub struct FcNetwork<B: Backend> {
    pub fc1: Linear<B>,
    pub activation: Relu,
    pub fc2: Linear<B>,
}

#[derive(Config, Debug)]
pub struct FcNetworkConfig {
    /// Flattened image size.
    #[config(default = "HEIGHT * WIDTH")]
    pub input_size: usize,
    #[config(default = 50)]
    pub hidden_size: usize,
    #[config(default = "NUM_CLASSES")]
    pub num_classes: usize,
}

impl<B: Backend> ModelConfigExt<B> for FcNetworkConfig {
    type Model = FcNetwork<B>;

    /// Returns the initialized model.
    fn init(&self, device: &B::Device) -> Self::Model {
        FcNetwork {
            fc1: LinearConfig::new(self.input_size, self.hidden_size).init(device),
            activation: Relu::new(),
            fc2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
        }
    }
}

impl<B: Backend> ImageClassifier<B> for FcNetwork<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, channels, height, width] = images.dims();
        let [input_size, _hidden_size] = self.fc1.weight.dims();
        assert_eq!(channels * height * width, input_size);

        let x = images.reshape([batch_size, input_size]);
        let x = self.activation.forward(self.fc1.forward(x));
        self.fc2.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn default_config() {
        let config = FcNetworkConfig::new();
        assert_eq!(config.input_size, 784);
        assert_eq!(config.hidden_size, 50);
        assert_eq!(config.num_classes, 10);
    }

    #[test]
    fn forward_shape() {
        let device = Default::default();
        let model: FcNetwork<B> = FcNetworkConfig::new().init(&device);
        let images = Tensor::<B, 4>::ones([5, 1, HEIGHT, WIDTH], &device);
        assert_eq!(model.forward(images).dims(), [5, NUM_CLASSES]);
    }
}
