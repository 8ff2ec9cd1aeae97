//! # 层（Layer）模块
//!
//! 每个层是一个多态单元：`build`（按输入形状分配参数）、`forward`（产出值并
//! 缓存反向所需的中间量）、`backward`（消费上游梯度、累积参数梯度、返回下游
//! 梯度）、`output_shape`（声明式输出形状）。
//!
//! 层族是封闭的：所有具体层收拢在 [`LayerKind`] 里，通过 `enum_dispatch`
//! 静态分发；序列化用显式类型标签重建，不做任何反射式查找。

pub(crate) mod activation;
mod batch_norm;
mod conv2d;
mod dense;
mod dropout;
pub(crate) mod im2col;
mod input;
mod merge;
mod pool2d;
mod reshape;

pub use activation::{LeakyReLU, ReLU, Sigmoid, Softplus, Softsign, Tanh};
pub use batch_norm::BatchNorm;
pub use conv2d::Conv2d;
pub use dense::Dense;
pub use dropout::Dropout;
pub use input::Input;
pub use merge::{Add, Concatenate, Mul};
pub use pool2d::{AvgPool2d, MaxPool2d, UnPool2d};
pub use reshape::{Flatten, Reshape};

use super::error::GraphError;
use super::model_io::LayerDescriptor;
use super::param::Parameter;
use super::regularizer::Regularizer;
use crate::nn::Phase;
use enum_dispatch::enum_dispatch;
use ndarray::ArrayD;
use rand::rngs::StdRng;

/// 封闭的层族
///
/// 合并层（Add/Mul/Concatenate）是其中唯一接受两个输入的变体，
/// 其 backward 返回一对梯度（每个父节点一份）。
#[enum_dispatch]
#[derive(Debug, Clone)]
pub enum LayerKind {
    Input(Input),
    Dense(Dense),
    Flatten(Flatten),
    Reshape(Reshape),
    Dropout(Dropout),
    BatchNorm(BatchNorm),
    Conv2d(Conv2d),
    MaxPool2d(MaxPool2d),
    AvgPool2d(AvgPool2d),
    UnPool2d(UnPool2d),
    Sigmoid(Sigmoid),
    Tanh(Tanh),
    ReLU(ReLU),
    LeakyReLU(LeakyReLU),
    Softplus(Softplus),
    Softsign(Softsign),
    Add(Add),
    Mul(Mul),
    Concatenate(Concatenate),
}

/// 所有层共有的簿记字段（名字、输入形状、可训练开关）
#[derive(Debug, Clone)]
pub struct LayerCommon {
    pub(crate) name: Option<String>,
    pub(crate) input_shape: Option<Vec<usize>>,
    pub(crate) trainable: bool,
}

impl Default for LayerCommon {
    fn default() -> Self {
        Self {
            name: None,
            input_shape: None,
            trainable: true,
        }
    }
}

/// 层的统一契约
#[enum_dispatch(LayerKind)]
pub trait TraitLayer {
    fn common(&self) -> &LayerCommon;

    fn common_mut(&mut self) -> &mut LayerCommon;

    /// 类名（命名走查和序列化类型标签的基础）
    fn kind_name(&self) -> &'static str;

    /// 按输入形状（不含批维）构建：分配并初始化依赖该形状的参数
    ///
    /// 幂等守卫：至多真正执行一次；再次以相同形状调用是空操作，
    /// 以不同形状调用是硬错误。
    fn build(&mut self, input_shape: &[usize], _rng: &mut StdRng) -> Result<(), GraphError> {
        self.guard_build(input_shape)?;
        Ok(())
    }

    /// build 的幂等守卫（供各层 build 复用）：
    /// 未构建 → 记录形状并返回 true；同形状重复构建 → false；冲突 → 错误
    fn guard_build(&mut self, input_shape: &[usize]) -> Result<bool, GraphError> {
        if let Some(prev) = self.common().input_shape.clone() {
            if prev.as_slice() == input_shape {
                return Ok(false);
            }
            return Err(GraphError::ShapeMismatch {
                expected: prev,
                got: input_shape.to_vec(),
                message: format!("{}层已按其它输入形状构建，不能重复构建", self.kind_name()),
            });
        }
        self.common_mut().input_shape = Some(input_shape.to_vec());
        Ok(true)
    }

    fn built(&self) -> bool {
        self.common().input_shape.is_some()
    }

    /// 输入形状（不含批维），首次 build 时定格
    fn input_shape(&self) -> Option<&[usize]> {
        self.common().input_shape.as_deref()
    }

    fn name(&self) -> Option<&str> {
        self.common().name.as_deref()
    }

    /// 赋名（只赋一次；命名走查据此保持幂等）
    fn set_name(&mut self, name: &str) {
        let common = self.common_mut();
        if common.name.is_none() {
            common.name = Some(name.to_string());
        }
    }

    fn trainable(&self) -> bool {
        self.common().trainable
    }

    fn set_trainable(&mut self, trainable: bool) {
        self.common_mut().trainable = trainable;
    }

    /// 前向计算
    ///
    /// `xs`是父节点值的切片：一元层恰好1个，合并层恰好2个。
    /// 允许的副作用：把反向所需的中间量缓存进层私有状态（仅本步有效）。
    fn forward(&mut self, xs: &[&ArrayD<f32>], phase: Phase) -> Result<ArrayD<f32>, GraphError>;

    /// 反向计算：给定对本层输出的梯度，
    /// (a) 把贡献累加进自有参数的 grad，(b) 返回对每个输入的梯度（每父一份）
    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError>;

    /// 输出形状（不含批维）；默认恒等直通
    fn output_shape(&self) -> Vec<usize> {
        self.common().input_shape.clone().unwrap_or_default()
    }

    /// 自有参数及其稳定键（"weight"、"bias"、"gamma"……）；无参数层为空
    fn param_entries(&mut self) -> Vec<(&'static str, &mut Parameter)> {
        Vec::new()
    }

    /// 自有参数的只读视图
    fn param_refs(&self) -> Vec<(&'static str, &Parameter)> {
        Vec::new()
    }

    /// 挂载的正则化项及其绑定参数（只读，损失前向用）
    fn regularizers(&self) -> Vec<(Regularizer, &Parameter)> {
        Vec::new()
    }

    /// 挂载的正则化项及其绑定参数（可变，正则化反向用）
    fn regularizers_mut(&mut self) -> Vec<(Regularizer, &mut Parameter)> {
        Vec::new()
    }

    /// 导出可重建本层（未构建状态）的描述符
    fn to_descriptor(&self) -> LayerDescriptor;
}

// ==================== 输入校验助手 ====================

/// 一元层输入数量校验
pub(crate) fn expect_single<'a>(
    kind: &str,
    xs: &[&'a ArrayD<f32>],
) -> Result<&'a ArrayD<f32>, GraphError> {
    if xs.len() != 1 {
        return Err(GraphError::InvalidOperation(format!(
            "{}层只需要1个输入，但得到{}个",
            kind,
            xs.len()
        )));
    }
    Ok(xs[0])
}

/// 合并层输入数量校验
pub(crate) fn expect_pair<'a>(
    kind: &str,
    xs: &[&'a ArrayD<f32>],
) -> Result<(&'a ArrayD<f32>, &'a ArrayD<f32>), GraphError> {
    if xs.len() != 2 {
        return Err(GraphError::InvalidOperation(format!(
            "{}层需要2个输入，但得到{}个",
            kind,
            xs.len()
        )));
    }
    Ok((xs[0], xs[1]))
}

/// 校验批量数据的单样本形状与层的输入形状一致
pub(crate) fn check_sample_shape(
    kind: &str,
    expected: &[usize],
    x: &ArrayD<f32>,
) -> Result<(), GraphError> {
    let got = &x.shape()[1..];
    if got != expected {
        return Err(GraphError::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
            message: format!("{kind}层收到的单样本形状与构建形状不一致"),
        });
    }
    Ok(())
}
