//! 数据加载模块
//!
//! 提供数据集加载、变换和批迭代功能。
//!
//! # 主要组件
//!
//! - [`DataLoader`]: 带环绕游标的批迭代器（训练循环的数据入口）
//! - [`MnistDataset`]: MNIST 手写数字数据集（自动下载、IDX 解析）
//! - [`transforms`]: 数据变换函数（归一化、one-hot 等）
//! - [`DataError`]: 数据加载错误类型
//!
//! 本模块只产出 ndarray 稠密数组，自动求导核心对下载/解析一无所知。

mod dataloader;
pub mod datasets;
pub mod download;
pub mod error;
pub mod transforms;

#[cfg(test)]
mod tests;

// Re-exports
pub use dataloader::DataLoader;
pub use datasets::{MnistDataset, default_data_dir};
pub use error::DataError;
