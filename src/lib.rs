//! Trains small MNIST classifiers (a fully-connected network and a convolutional network) with burn.

pub mod data;
pub mod model;
pub mod training;
