use crate::data::{HEIGHT, NUM_CLASSES, WIDTH};
use crate::model::{ImageClassifier, ModelConfigExt};
use burn::nn::{
    Linear, LinearConfig, PaddingConfig2d, Relu,
    conv::{Conv2d, Conv2dConfig},
    pool::{MaxPool2d, MaxPool2dConfig},
};
use burn::prelude::*;

/// Small convolutional network: two `conv 3x3 -> relu -> max-pool 2x2` stages
/// followed by a linear classifier.
///
/// Each pooling halves the spatial size, so a 28x28 input reaches the head as 7x7.
#[derive(Module, Debug)]
pub struct CnnNetwork<B: Backend> {
    pub conv1: Conv2d<B>,
    pub conv2: Conv2d<B>,
    pub pool: MaxPool2d,
    pub activation: Relu,
    pub fc1: Linear<B>,
}

#[derive(Config, Debug)]
pub struct CnnNetworkConfig {
    #[config(default = 1)]
    pub in_channels: usize,
    #[config(default = 8)]
    pub conv1_channels: usize,
    #[config(default = 16)]
    pub conv2_channels: usize,
    #[config(default = "NUM_CLASSES")]
    pub num_classes: usize,
}

impl CnnNetworkConfig {
    /// Input size of the linear head.
    pub fn flattened_size(&self) -> usize {
        self.conv2_channels * (HEIGHT / 4) * (WIDTH / 4)
    }
}

/// 3x3 kernel, stride 1, padding 1: keeps the spatial size.
fn conv3x3<B: Backend>(channels_in: usize, channels_out: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([channels_in, channels_out], [3, 3])
        .with_stride([1, 1])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}

impl<B: Backend> ModelConfigExt<B> for CnnNetworkConfig {
    type Model = CnnNetwork<B>;

    /// Returns the initialized model.
    fn init(&self, device: &B::Device) -> Self::Model {
        CnnNetwork {
            conv1: conv3x3(self.in_channels, self.conv1_channels, device),
            conv2: conv3x3(self.conv1_channels, self.conv2_channels, device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            activation: Relu::new(),
            fc1: LinearConfig::new(self.flattened_size(), self.num_classes).init(device),
        }
    }
}

impl<B: Backend> ImageClassifier<B> for CnnNetwork<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _channels, height, width] = images.dims();

        let x = self.activation.forward(self.conv1.forward(images));
        let x = self.pool.forward(x);
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.pool.forward(x);

        let [_, channels, pooled_height, pooled_width] = x.dims();
        assert_eq!([height / 4, width / 4], [pooled_height, pooled_width]);

        // keep only the batch dimension
        let x = x.reshape([batch_size, channels * pooled_height * pooled_width]);
        self.fc1.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn flattened_size_matches_pooling() {
        assert_eq!(CnnNetworkConfig::new().flattened_size(), 16 * 7 * 7);
    }

    #[test]
    fn forward_shape() {
        let device = Default::default();
        let model: CnnNetwork<B> = CnnNetworkConfig::new().init(&device);
        let images = Tensor::<B, 4>::random(
            [4, 1, HEIGHT, WIDTH],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device,
        );
        assert_eq!(model.forward(images).dims(), [4, NUM_CLASSES]);
    }
}
