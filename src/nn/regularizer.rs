//! 正则化项：对损失（前向）和参数梯度（反向）施加惩罚
//!
//! 正则化项由拥有参数的层按参数挂载（如 Dense 的 weight/bias 各挂一个），
//! 不持有跨对象引用——调用时由层把参数递进来，避免别名问题。
//!
//! 调用顺序是强制的：损失反向 → 正则化反向 → 优化器更新，
//! 这样两路贡献才都能在优化器消费前落进 `grad`。

use super::param::Parameter;
use serde::{Deserialize, Serialize};

/// 按参数挂载的惩罚策略
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Regularizer {
    /// L1（Lasso）：λ·Σ|w|
    L1 { lambda: f32 },
    /// L2（Ridge）：λ/2·Σw²
    L2 { lambda: f32 },
    /// L1 与 L2 的叠加
    L1L2 { l1_lambda: f32, l2_lambda: f32 },
}

impl Regularizer {
    /// 前向：返回应加到标量损失上的惩罚值
    pub fn forward(&self, param: &Parameter) -> f32 {
        let w = param.data();
        match self {
            Self::L1 { lambda } => lambda * w.mapv(f32::abs).sum(),
            Self::L2 { lambda } => 0.5 * lambda * w.mapv(|v| v * v).sum(),
            Self::L1L2 {
                l1_lambda,
                l2_lambda,
            } => {
                l1_lambda * w.mapv(f32::abs).sum() + 0.5 * l2_lambda * w.mapv(|v| v * v).sum()
            }
        }
    }

    /// 反向：把惩罚的梯度累加进参数的 `grad`（加，不覆盖）
    pub fn backward(&self, param: &mut Parameter) {
        let delta = match self {
            Self::L1 { lambda } => param.data().mapv(|v| lambda * sign(v)),
            Self::L2 { lambda } => param.data().mapv(|v| lambda * v),
            Self::L1L2 {
                l1_lambda,
                l2_lambda,
            } => param.data().mapv(|v| l1_lambda * sign(v) + l2_lambda * v),
        };
        param.accumulate_grad(&delta);
    }
}

/// 三值符号（f32::signum 在 +0.0 处返回 1.0，L1 次梯度取 0 更合适）
fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}
