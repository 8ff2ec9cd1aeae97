//! # 模型保存/加载
//!
//! 沿用"拓扑 JSON + 参数 bin"的双文件布局：
//! - JSON：自描述的 [`ModelDescriptor`]，层/损失/优化器都用带显式类型
//!   标签的封闭枚举表示，反序列化时遇到未注册标签立刻报清晰错误，
//!   不存在任何反射式查找；
//! - bin：魔数 + 版本前缀的 bincode 负载，装"参数名 → 数组"的扁平表，
//!   可选再带一份按参数名作键的优化器辅助状态。
//!
//! 加载流程：JSON 重建各层（未构建状态）→ 按记录的输入形状重放构建 →
//! 命名走查 → 参数按名字绑回 → 优化器状态恢复。

use super::error::GraphError;
use super::init::Init;
use super::layers::{
    Add, AvgPool2d, BatchNorm, Concatenate, Conv2d, Dense, Dropout, Flatten, Input, LayerKind,
    LeakyReLU, MaxPool2d, Mul, ReLU, Reshape, Sigmoid, Softplus, Softsign, Tanh, UnPool2d,
};
use super::optimizer::{
    AdaBound, AdaDelta, AdaGrad, Adam, Nesterov, OptimizerKind, OptimizerStatus, RMSProp,
    RMSPropGraves, SGD,
};
use super::regularizer::Regularizer;
use crate::nn::LossKind;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// 参数文件魔数
const PARAMS_MAGIC: &[u8; 4] = b"LMNP";
/// 参数文件版本
const PARAMS_VERSION: u32 = 1;
/// 描述符格式版本
const DESCRIPTOR_VERSION: u32 = 1;

// ==================== 层描述符 ====================

/// 层的可序列化描述：类型标签 + 构造超参数 + （若已构建）输入形状
///
/// 足以重建一个等价的、全新未构建的层实例。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LayerDescriptor {
    Input {
        shape: Vec<usize>,
        input_shape: Option<Vec<usize>>,
    },
    Dense {
        units: usize,
        use_bias: bool,
        weight_init: Init,
        bias_init: Init,
        weight_regularizer: Option<Regularizer>,
        bias_regularizer: Option<Regularizer>,
        input_shape: Option<Vec<usize>>,
    },
    Flatten {
        input_shape: Option<Vec<usize>>,
    },
    Reshape {
        shape: Vec<usize>,
        input_shape: Option<Vec<usize>>,
    },
    Dropout {
        ratio: f32,
        seed: u64,
        use_scale: bool,
        input_shape: Option<Vec<usize>>,
    },
    BatchNorm {
        momentum: f32,
        eps: f32,
        input_shape: Option<Vec<usize>>,
    },
    Conv2d {
        filters: usize,
        kernel: (usize, usize),
        stride: (usize, usize),
        same_padding: bool,
        weight_init: Init,
        bias_init: Init,
        weight_regularizer: Option<Regularizer>,
        bias_regularizer: Option<Regularizer>,
        input_shape: Option<Vec<usize>>,
    },
    MaxPool2d {
        pool: (usize, usize),
        stride: (usize, usize),
        same_padding: bool,
        input_shape: Option<Vec<usize>>,
    },
    AvgPool2d {
        pool: (usize, usize),
        stride: (usize, usize),
        same_padding: bool,
        input_shape: Option<Vec<usize>>,
    },
    UnPool2d {
        size: (usize, usize),
        input_shape: Option<Vec<usize>>,
    },
    Sigmoid {
        input_shape: Option<Vec<usize>>,
    },
    Tanh {
        input_shape: Option<Vec<usize>>,
    },
    ReLU {
        input_shape: Option<Vec<usize>>,
    },
    LeakyReLU {
        alpha: f32,
        input_shape: Option<Vec<usize>>,
    },
    Softplus {
        input_shape: Option<Vec<usize>>,
    },
    Softsign {
        input_shape: Option<Vec<usize>>,
    },
    Add {
        input_shape: Option<Vec<usize>>,
    },
    Mul {
        input_shape: Option<Vec<usize>>,
    },
    Concatenate {
        axis: usize,
        input_shape: Option<Vec<usize>>,
    },
}

impl LayerDescriptor {
    /// 记录的构建输入形状（加载时重放构建用）
    pub fn input_shape(&self) -> Option<&[usize]> {
        match self {
            Self::Input { input_shape, .. }
            | Self::Dense { input_shape, .. }
            | Self::Flatten { input_shape }
            | Self::Reshape { input_shape, .. }
            | Self::Dropout { input_shape, .. }
            | Self::BatchNorm { input_shape, .. }
            | Self::Conv2d { input_shape, .. }
            | Self::MaxPool2d { input_shape, .. }
            | Self::AvgPool2d { input_shape, .. }
            | Self::UnPool2d { input_shape, .. }
            | Self::Sigmoid { input_shape }
            | Self::Tanh { input_shape }
            | Self::ReLU { input_shape }
            | Self::LeakyReLU { input_shape, .. }
            | Self::Softplus { input_shape }
            | Self::Softsign { input_shape }
            | Self::Add { input_shape }
            | Self::Mul { input_shape }
            | Self::Concatenate { input_shape, .. } => input_shape.as_deref(),
        }
    }

    /// 重建等价的全新未构建层
    pub fn into_layer(self) -> LayerKind {
        match self {
            Self::Input { shape, .. } => Input::new(&shape).into(),
            Self::Dense {
                units,
                use_bias,
                weight_init,
                bias_init,
                weight_regularizer,
                bias_regularizer,
                ..
            } => {
                let mut dense = Dense::new(units)
                    .use_bias(use_bias)
                    .weight_init(weight_init)
                    .bias_init(bias_init);
                if let Some(reg) = weight_regularizer {
                    dense = dense.weight_regularizer(reg);
                }
                if let Some(reg) = bias_regularizer {
                    dense = dense.bias_regularizer(reg);
                }
                dense.into()
            }
            Self::Flatten { .. } => Flatten::new().into(),
            Self::Reshape { shape, .. } => Reshape::new(&shape).into(),
            Self::Dropout {
                ratio,
                seed,
                use_scale,
                ..
            } => Dropout::new(ratio, seed).use_scale(use_scale).into(),
            Self::BatchNorm { momentum, eps, .. } => BatchNorm::with_config(momentum, eps).into(),
            Self::Conv2d {
                filters,
                kernel,
                stride,
                same_padding,
                weight_init,
                bias_init,
                weight_regularizer,
                bias_regularizer,
                ..
            } => {
                let mut conv = Conv2d::new(filters, kernel)
                    .stride(stride)
                    .same_padding(same_padding)
                    .weight_init(weight_init)
                    .bias_init(bias_init);
                if let Some(reg) = weight_regularizer {
                    conv = conv.weight_regularizer(reg);
                }
                if let Some(reg) = bias_regularizer {
                    conv = conv.bias_regularizer(reg);
                }
                conv.into()
            }
            Self::MaxPool2d {
                pool,
                stride,
                same_padding,
                ..
            } => MaxPool2d::new(pool)
                .stride(stride)
                .same_padding(same_padding)
                .into(),
            Self::AvgPool2d {
                pool,
                stride,
                same_padding,
                ..
            } => AvgPool2d::new(pool)
                .stride(stride)
                .same_padding(same_padding)
                .into(),
            Self::UnPool2d { size, .. } => UnPool2d::new(size).into(),
            Self::Sigmoid { .. } => Sigmoid::new().into(),
            Self::Tanh { .. } => Tanh::new().into(),
            Self::ReLU { .. } => ReLU::new().into(),
            Self::LeakyReLU { alpha, .. } => LeakyReLU::with_alpha(alpha).into(),
            Self::Softplus { .. } => Softplus::new().into(),
            Self::Softsign { .. } => Softsign::new().into(),
            Self::Add { .. } => Add::new().into(),
            Self::Mul { .. } => Mul::new().into(),
            Self::Concatenate { axis, .. } => Concatenate::with_axis(axis).into(),
        }
    }
}

// ==================== 优化器描述符 ====================

/// 优化器的可序列化描述（只含超参数，辅助状态走参数文件）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OptimizerDescriptor {
    SGD {
        lr: f32,
        momentum: f32,
        clip_norm: Option<f32>,
    },
    Nesterov {
        lr: f32,
        momentum: f32,
        clip_norm: Option<f32>,
    },
    AdaGrad {
        lr: f32,
        eps: f32,
        clip_norm: Option<f32>,
    },
    RMSProp {
        lr: f32,
        alpha: f32,
        eps: f32,
        clip_norm: Option<f32>,
    },
    RMSPropGraves {
        lr: f32,
        alpha: f32,
        eps: f32,
        clip_norm: Option<f32>,
    },
    AdaDelta {
        rho: f32,
        eps: f32,
        clip_norm: Option<f32>,
    },
    Adam {
        alpha: f32,
        beta1: f32,
        beta2: f32,
        eps: f32,
        clip_norm: Option<f32>,
    },
    AdaBound {
        alpha: f32,
        beta1: f32,
        beta2: f32,
        final_lr: f32,
        gamma: f32,
        eps: f32,
        clip_norm: Option<f32>,
    },
}

impl OptimizerDescriptor {
    /// 重建等价的全新优化器（辅助状态另行恢复）
    pub fn into_optimizer(self) -> OptimizerKind {
        match self {
            Self::SGD {
                lr,
                momentum,
                clip_norm,
            } => {
                let mut sgd = SGD::with_config(lr, momentum);
                if let Some(threshold) = clip_norm {
                    sgd = sgd.clip_norm(threshold);
                }
                sgd.into()
            }
            Self::Nesterov {
                lr,
                momentum,
                clip_norm,
            } => {
                let mut nesterov = Nesterov::with_config(lr, momentum);
                if let Some(threshold) = clip_norm {
                    nesterov = nesterov.clip_norm(threshold);
                }
                nesterov.into()
            }
            Self::AdaGrad { lr, eps, clip_norm } => {
                let mut adagrad = AdaGrad::with_config(lr, eps);
                if let Some(threshold) = clip_norm {
                    adagrad = adagrad.clip_norm(threshold);
                }
                adagrad.into()
            }
            Self::RMSProp {
                lr,
                alpha,
                eps,
                clip_norm,
            } => {
                let mut rmsprop = RMSProp::with_config(lr, alpha, eps);
                if let Some(threshold) = clip_norm {
                    rmsprop = rmsprop.clip_norm(threshold);
                }
                rmsprop.into()
            }
            Self::RMSPropGraves {
                lr,
                alpha,
                eps,
                clip_norm,
            } => {
                let mut graves = RMSPropGraves::with_config(lr, alpha, eps);
                if let Some(threshold) = clip_norm {
                    graves = graves.clip_norm(threshold);
                }
                graves.into()
            }
            Self::AdaDelta {
                rho,
                eps,
                clip_norm,
            } => {
                let mut adadelta = AdaDelta::with_config(rho, eps);
                if let Some(threshold) = clip_norm {
                    adadelta = adadelta.clip_norm(threshold);
                }
                adadelta.into()
            }
            Self::Adam {
                alpha,
                beta1,
                beta2,
                eps,
                clip_norm,
            } => {
                let mut adam = Adam::with_config(alpha, beta1, beta2, eps);
                if let Some(threshold) = clip_norm {
                    adam = adam.clip_norm(threshold);
                }
                adam.into()
            }
            Self::AdaBound {
                alpha,
                beta1,
                beta2,
                final_lr,
                gamma,
                eps,
                clip_norm,
            } => {
                let mut adabound = AdaBound::with_config(alpha, beta1, beta2, final_lr, gamma, eps);
                if let Some(threshold) = clip_norm {
                    adabound = adabound.clip_norm(threshold);
                }
                adabound.into()
            }
        }
    }
}

// ==================== 模型描述符 ====================

/// 整个模型的自描述结构（JSON 侧）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub version: u32,
    /// 层按栈序排列
    pub layers: Vec<LayerDescriptor>,
    pub loss: Option<LossKind>,
    pub optimizer: Option<OptimizerDescriptor>,
    /// 参数文件相对名
    pub params_file: Option<String>,
}

impl ModelDescriptor {
    pub fn new(layers: Vec<LayerDescriptor>) -> Self {
        Self {
            version: DESCRIPTOR_VERSION,
            layers,
            loss: None,
            optimizer: None,
            params_file: None,
        }
    }

    pub fn to_json(&self) -> Result<String, GraphError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| GraphError::ComputationError(format!("序列化模型描述失败: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        serde_json::from_str(json).map_err(|e| {
            let message = e.to_string();
            if message.contains("unknown variant") {
                GraphError::UnknownTypeTag(message)
            } else {
                GraphError::ComputationError(format!("解析模型描述失败: {message}"))
            }
        })
    }
}

// ==================== 参数文件（bin 侧） ====================

/// 参数文件负载：扁平参数表 + 可选优化器辅助状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedParams {
    /// 参数名 → 数据
    pub params: HashMap<String, ArrayD<f32>>,
    /// 优化器辅助状态（带上它才能满足"继续训练逐位一致"的往返律）
    pub status: Option<OptimizerStatus>,
}

/// 写参数文件：魔数 + 版本 + bincode 负载
pub fn write_params_file<P: AsRef<Path>>(path: P, payload: &SavedParams) -> Result<(), GraphError> {
    let file = File::create(path.as_ref())
        .map_err(|e| GraphError::ComputationError(format!("无法创建参数文件: {e}")))?;
    let mut writer = BufWriter::new(file);

    writer
        .write_all(PARAMS_MAGIC)
        .and_then(|()| writer.write_all(&PARAMS_VERSION.to_le_bytes()))
        .map_err(|e| GraphError::ComputationError(format!("写入参数文件头失败: {e}")))?;

    let encoded = bincode::serialize(payload)
        .map_err(|e| GraphError::ComputationError(format!("序列化参数失败: {e}")))?;
    writer
        .write_all(&encoded)
        .and_then(|()| writer.flush())
        .map_err(|e| GraphError::ComputationError(format!("写入参数数据失败: {e}")))?;
    Ok(())
}

/// 读参数文件（魔数/版本校验先行）
pub fn read_params_file<P: AsRef<Path>>(path: P) -> Result<SavedParams, GraphError> {
    let file = File::open(path.as_ref())
        .map_err(|e| GraphError::ComputationError(format!("无法打开参数文件: {e}")))?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| GraphError::ComputationError(format!("读取魔数失败: {e}")))?;
    if &magic != PARAMS_MAGIC {
        return Err(GraphError::ComputationError(
            "无效的参数文件：这不是 lamina 格式的参数文件".to_string(),
        ));
    }

    let mut version_bytes = [0u8; 4];
    reader
        .read_exact(&mut version_bytes)
        .map_err(|e| GraphError::ComputationError(format!("读取版本失败: {e}")))?;
    let version = u32::from_le_bytes(version_bytes);
    if version != PARAMS_VERSION {
        return Err(GraphError::ComputationError(format!(
            "不支持的参数文件版本: {version}"
        )));
    }

    let mut encoded = Vec::new();
    reader
        .read_to_end(&mut encoded)
        .map_err(|e| GraphError::ComputationError(format!("读取参数数据失败: {e}")))?;
    bincode::deserialize(&encoded)
        .map_err(|e| GraphError::ComputationError(format!("反序列化参数失败: {e}")))
}
