pub mod batcher;
pub mod mnist;

pub use batcher::{MnistBatch, MnistBatcher};
pub use mnist::{DEFAULT_DATA_DIR, HEIGHT, MnistDataset, MnistItem, NUM_CLASSES, WIDTH};
