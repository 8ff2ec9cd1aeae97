//! 内置数据集
//!
//! 目前提供 MNIST 手写数字分类数据集（自动下载、IDX 二进制解析）。

mod mnist;

pub use mnist::{MnistDataset, default_data_dir};
