//! 损失函数：逐批标量损失及其对预测的梯度
//!
//! 交叉熵两兄弟直接吃 logits（数值稳定），同时公开各自的激活函数，
//! 推理时可据此还原校准概率。

use super::error::GraphError;
use super::graph::{Graph, LayerId};
use super::layers::TraitLayer;
use super::layers::activation::sigmoid_scalar;
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

/// 封闭的损失族
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LossKind {
    /// 均方误差：0.5·Σ(y-t)²/N
    MeanSquaredError,
    /// 平均绝对误差：Σ|y-t|/N
    MeanAbsoluteError,
    /// Huber 损失：|y-t| ≤ delta 时二次、否则线性
    Huber { delta: f32 },
    /// 二分类交叉熵（logits 入、内含 sigmoid）
    SigmoidCrossEntropy,
    /// 多分类交叉熵（logits 入、内含 softmax，沿最后一轴归一）
    SoftmaxCrossEntropy,
}

impl LossKind {
    /// 基础前向损失 + 所列层上挂载的全部正则化项前向贡献
    ///
    /// 预测与目标形状必须一致，否则立即报形状错误。
    pub fn loss(
        &self,
        pred: &ArrayD<f32>,
        target: &ArrayD<f32>,
        graph: &Graph,
        order: &[LayerId],
    ) -> Result<f32, GraphError> {
        let mut value = self.forward(pred, target)?;
        for id in order {
            for (reg, param) in graph.layer(*id)?.regularizers() {
                value = value + reg.forward(param);
            }
        }
        Ok(value)
    }

    /// 基础前向损失（不含正则化）
    pub fn forward(&self, pred: &ArrayD<f32>, target: &ArrayD<f32>) -> Result<f32, GraphError> {
        check_same_shape(pred, target)?;
        let batch = pred.shape()[0] as f32;
        let value = match self {
            Self::MeanSquaredError => {
                0.5 * (pred - target).mapv(|v| v * v).sum() / batch
            }
            Self::MeanAbsoluteError => (pred - target).mapv(f32::abs).sum() / batch,
            Self::Huber { delta } => {
                let d = *delta;
                (pred - target)
                    .mapv(|v| {
                        let a = v.abs();
                        if a <= d { 0.5 * v * v } else { d * (a - 0.5 * d) }
                    })
                    .sum()
                    / batch
            }
            Self::SigmoidCrossEntropy => {
                // 稳定式：max(x,0) - x·t + ln(1 + e^(-|x|))
                let mut sum = 0.0;
                ndarray::Zip::from(pred).and(target).for_each(|&x, &t| {
                    sum += x.max(0.0) - x * t + (1.0 + (-x.abs()).exp()).ln();
                });
                sum / batch
            }
            Self::SoftmaxCrossEntropy => {
                let probs = softmax(pred);
                -(target * &probs.mapv(|v| (v + 1e-7).ln())).sum() / batch
            }
        };
        Ok(value)
    }

    /// 基础损失对预测的梯度（不含正则化——那部分经
    /// [`Self::regularizers_backward`] 直接落到参数的 grad 上）
    pub fn backward_grad(
        &self,
        pred: &ArrayD<f32>,
        target: &ArrayD<f32>,
    ) -> Result<ArrayD<f32>, GraphError> {
        check_same_shape(pred, target)?;
        let batch = pred.shape()[0] as f32;
        let grad = match self {
            Self::MeanSquaredError => (pred - target) / batch,
            Self::MeanAbsoluteError => (pred - target).mapv(|v| sign(v) / batch),
            Self::Huber { delta } => {
                let d = *delta;
                (pred - target).mapv(|v| v.clamp(-d, d) / batch)
            }
            Self::SigmoidCrossEntropy => (pred.mapv(sigmoid_scalar) - target) / batch,
            Self::SoftmaxCrossEntropy => (softmax(pred) - target) / batch,
        };
        Ok(grad)
    }

    /// 正则化反向：把每个挂载项的梯度累加进对应参数的 grad
    ///
    /// 顺序是强制的：损失反向 → 本方法 → 优化器更新，
    /// 否则两路贡献不能都在消费前落进 grad。
    pub fn regularizers_backward(
        &self,
        graph: &mut Graph,
        order: &[LayerId],
    ) -> Result<(), GraphError> {
        for id in order {
            for (reg, param) in graph.layer_mut(*id)?.regularizers_mut() {
                reg.backward(param);
            }
        }
        Ok(())
    }

    /// 损失对应的激活（交叉熵族有、其余恒等）：推理时还原校准概率
    pub fn activation(&self, pred: &ArrayD<f32>) -> ArrayD<f32> {
        match self {
            Self::SigmoidCrossEntropy => pred.mapv(sigmoid_scalar),
            Self::SoftmaxCrossEntropy => softmax(pred),
            _ => pred.clone(),
        }
    }
}

/// 沿最后一轴的数值稳定 softmax（先减每行最大值再指数归一）
pub(crate) fn softmax(x: &ArrayD<f32>) -> ArrayD<f32> {
    let axis = Axis(x.ndim() - 1);
    let mut y = x.clone();
    for mut lane in y.lanes_mut(axis) {
        let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
    y
}

fn check_same_shape(pred: &ArrayD<f32>, target: &ArrayD<f32>) -> Result<(), GraphError> {
    if pred.shape() != target.shape() {
        return Err(GraphError::ShapeMismatch {
            expected: target.shape().to_vec(),
            got: pred.shape().to_vec(),
            message: "预测与目标的形状必须一致".to_string(),
        });
    }
    Ok(())
}

/// 三值符号
fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}
