//! MNIST 手写数字数据集
//!
//! 支持：
//! - IDX 二进制格式解析（支持 .gz 压缩，大端序头部）
//! - MD5 校验的自动下载
//! - 像素归一化 (0-255 → 0-1)
//! - 标签 one-hot 编码

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use ndarray::{ArrayD, IxDyn};

use crate::data::download::download_file;
use crate::data::error::DataError;
use crate::data::transforms::{normalize_pixels, one_hot};

/// MNIST 下载地址（AWS S3 镜像，原官网 yann.lecun.com 不稳定）
const MNIST_BASE_URL: &str = "https://ossci-datasets.s3.amazonaws.com/mnist/";

/// MNIST 文件名 → MD5
const MNIST_FILES: [(&str, &str); 4] = [
    (
        "train-images-idx3-ubyte.gz",
        "f68b3c2dcbeaaa9fbdd348bbdeb94873",
    ),
    (
        "train-labels-idx1-ubyte.gz",
        "d53e105ee54ea40749a09fcbcd1e9432",
    ),
    (
        "t10k-images-idx3-ubyte.gz",
        "9fb629c4189551a2d022fa330f9573f3",
    ),
    (
        "t10k-labels-idx1-ubyte.gz",
        "ec29112dd5afa0611ce80d1b7f02629c",
    ),
];

/// MNIST 手写数字数据集
///
/// 60,000 个训练样本 + 10,000 个测试样本，28x28 灰度图，标签 0-9。
#[derive(Debug, Clone)]
pub struct MnistDataset {
    /// 图像数据 [N, 1, 28, 28]（NCHW），或 flatten 后 [N, 784]
    images: ArrayD<f32>,
    /// 标签数据 [N, 10]（one-hot）
    labels: ArrayD<f32>,
    len: usize,
    is_flattened: bool,
}

impl MnistDataset {
    /// 完整加载 API
    ///
    /// # 参数
    /// - `root`: 数据目录，None 则使用默认 (~/.cache/lamina/datasets/mnist)
    /// - `train`: true=训练集(60000)，false=测试集(10000)
    /// - `download`: true=自动下载缺失文件
    pub fn load(root: Option<&str>, train: bool, download: bool) -> Result<Self, DataError> {
        let data_dir = root
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir().join("mnist"));

        let (images_file, labels_file) = if train {
            ("train-images-idx3-ubyte", "train-labels-idx1-ubyte")
        } else {
            ("t10k-images-idx3-ubyte", "t10k-labels-idx1-ubyte")
        };

        // 1. 文件就位（必要时下载）
        let images_path = ensure_file(&data_dir, images_file, download)?;
        let labels_path = ensure_file(&data_dir, labels_file, download)?;

        // 2. 解析 IDX
        let images_raw = parse_idx_images(&images_path)?;
        let labels_raw = parse_idx_labels(&labels_path)?;
        let len = labels_raw.len();

        // 3. 归一化 + NCHW 重塑 + one-hot
        let images = normalize_pixels(&images_raw)
            .into_shape(IxDyn(&[len, 1, 28, 28]))
            .map_err(|e| DataError::FormatError(format!("图像重塑失败: {e}")))?;
        let labels = one_hot(&labels_raw, 10);

        Ok(Self {
            images,
            labels,
            len,
            is_flattened: false,
        })
    }

    /// 便捷 API：加载训练集（默认路径，自动下载）
    pub fn train() -> Result<Self, DataError> {
        Self::load(None, true, true)
    }

    /// 便捷 API：加载测试集（默认路径，自动下载）
    pub fn test() -> Result<Self, DataError> {
        Self::load(None, false, true)
    }

    /// 把图像展平成 [N, 784]（MLP 用），消耗 self
    pub fn flatten(mut self) -> Self {
        if !self.is_flattened {
            self.images = self
                .images
                .into_shape(IxDyn(&[self.len, 784]))
                .expect("MNIST 图像元素总数固定，重塑不会失败");
            self.is_flattened = true;
        }
        self
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 输入的单样本形状（不含批维）
    pub fn input_shape(&self) -> Vec<usize> {
        if self.is_flattened {
            vec![784]
        } else {
            vec![1, 28, 28]
        }
    }

    /// 标签的单样本形状（不含批维）
    pub fn label_shape(&self) -> Vec<usize> {
        vec![10]
    }

    pub fn images(&self) -> &ArrayD<f32> {
        &self.images
    }

    pub fn labels(&self) -> &ArrayD<f32> {
        &self.labels
    }
}

/// 获取默认数据目录
pub fn default_data_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lamina")
        .join("datasets")
}

/// 确保文件存在，必要时（带 MD5 校验地）下载
fn ensure_file(data_dir: &Path, base_name: &str, download: bool) -> Result<PathBuf, DataError> {
    // 优先检查解压后的文件
    let uncompressed_path = data_dir.join(base_name);
    if uncompressed_path.exists() {
        return Ok(uncompressed_path);
    }

    // 再检查 .gz 文件
    let gz_name = format!("{base_name}.gz");
    let gz_path = data_dir.join(&gz_name);
    if gz_path.exists() {
        return Ok(gz_path);
    }

    if !download {
        return Err(DataError::FileNotFound(uncompressed_path));
    }

    std::fs::create_dir_all(data_dir).map_err(DataError::IoError)?;
    let url = format!("{MNIST_BASE_URL}{gz_name}");
    let expected_md5 = MNIST_FILES
        .iter()
        .find(|(name, _)| *name == gz_name)
        .map(|(_, md5)| *md5);
    download_file(&url, &gz_path, expected_md5)?;
    Ok(gz_path)
}

/// 打开 IDX 文件（.gz 自动解压）
fn open_idx(path: &Path) -> Result<Box<dyn Read>, DataError> {
    let file = File::open(path).map_err(|_| DataError::FileNotFound(path.to_path_buf()))?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// 解析 IDX 图像文件 → [N, 784]（像素原值 0-255）
///
/// IDX 格式（大端序）：
/// - [0-3] magic number (2051)
/// - [4-7] 图像数
/// - [8-11] 行数
/// - [12-15] 列数
/// - [16+] 像素数据（unsigned byte）
fn parse_idx_images(path: &Path) -> Result<ArrayD<f32>, DataError> {
    let mut reader = open_idx(path)?;
    let mut header = [0u8; 16];
    reader
        .read_exact(&mut header)
        .map_err(|e| DataError::FormatError(format!("读取头部失败: {e}")))?;

    let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if magic != 2051 {
        return Err(DataError::FormatError(format!(
            "无效的 magic number: {magic} (期望 2051)"
        )));
    }

    let num_images = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let num_rows = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    let num_cols = u32::from_be_bytes([header[12], header[13], header[14], header[15]]) as usize;
    if num_rows != 28 || num_cols != 28 {
        return Err(DataError::FormatError(format!(
            "无效的图像尺寸: {num_rows}x{num_cols} (期望 28x28)"
        )));
    }

    let mut pixels = vec![0u8; num_images * 28 * 28];
    reader
        .read_exact(&mut pixels)
        .map_err(|e| DataError::FormatError(format!("读取像素数据失败: {e}")))?;

    let data: Vec<f32> = pixels.into_iter().map(f32::from).collect();
    ArrayD::from_shape_vec(IxDyn(&[num_images, 784]), data)
        .map_err(|e| DataError::FormatError(format!("构造图像数组失败: {e}")))
}

/// 解析 IDX 标签文件 → 原始标签字节
///
/// IDX 格式（大端序）：
/// - [0-3] magic number (2049)
/// - [4-7] 标签数
/// - [8+] 标签数据（unsigned byte, 0-9）
fn parse_idx_labels(path: &Path) -> Result<Vec<u8>, DataError> {
    let mut reader = open_idx(path)?;
    let mut header = [0u8; 8];
    reader
        .read_exact(&mut header)
        .map_err(|e| DataError::FormatError(format!("读取头部失败: {e}")))?;

    let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if magic != 2049 {
        return Err(DataError::FormatError(format!(
            "无效的 magic number: {magic} (期望 2049)"
        )));
    }

    let num_labels = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let mut labels = vec![0u8; num_labels];
    reader
        .read_exact(&mut labels)
        .map_err(|e| DataError::FormatError(format!("读取标签数据失败: {e}")))?;
    Ok(labels)
}
