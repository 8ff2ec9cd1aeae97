//! # 优化器模块
//!
//! 每个优化器消费当前图去重后的层列表：过滤出可训练且梯度非空的参数，
//! 可选做一次全局 L2 范数裁剪，按各自规则就地更新 `data`，
//! 最后把 `grad` 重置为零哨兵（下一步的累加从干净状态起步）。
//!
//! 辅助状态（动量缓冲、累积平方梯度、时间步……）一律按参数的稳定名字
//! 作键——所以命名走查必须先于任何一次更新，名字也必须跨保存/加载稳定。

mod adadelta;
mod adagrad;
mod adam;
mod rmsprop;
mod sgd;

pub use adadelta::AdaDelta;
pub use adagrad::AdaGrad;
pub use adam::{AdaBound, Adam};
pub use rmsprop::{RMSProp, RMSPropGraves};
pub use sgd::{Nesterov, SGD};

use super::error::GraphError;
use super::graph::{Graph, LayerId};
use super::model_io::OptimizerDescriptor;
use super::param::Parameter;
use enum_dispatch::enum_dispatch;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 封闭的优化器族
#[enum_dispatch]
#[derive(Debug, Clone)]
pub enum OptimizerKind {
    SGD(SGD),
    Nesterov(Nesterov),
    AdaGrad(AdaGrad),
    RMSProp(RMSProp),
    RMSPropGraves(RMSPropGraves),
    AdaDelta(AdaDelta),
    Adam(Adam),
    AdaBound(AdaBound),
}

/// 优化器辅助状态的序列化形式：时间步 + 参数名 → 槽名 → 缓冲
///
/// 保存它是"保存后继续训练与原模型逐位一致"（往返律）的前提。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerStatus {
    pub step: u64,
    pub buffers: HashMap<String, HashMap<String, ArrayD<f32>>>,
}

/// 优化器的统一契约
#[enum_dispatch(OptimizerKind)]
pub trait TraitOptimizer {
    /// 一次完整更新：收集参数 → 裁剪 → 逐参数规则 → 重置梯度
    ///
    /// 在命名走查之前调用是配置错误（由参数收集兜住）。
    fn update(&mut self, graph: &mut Graph, order: &[LayerId]) -> Result<(), GraphError> {
        let mut params = graph.trainable_params(order)?;
        clip_grads(&mut params, self.clip_norm());
        self.begin_step();
        for param in params {
            // 收集阶段已过滤掉无名/无梯度的参数，这里只是稳妥起见
            let Some(name) = param.name().map(str::to_string) else {
                continue;
            };
            let Some(grad) = param.take_grad() else {
                continue;
            };
            self.update_one(&name, param, grad);
        }
        Ok(())
    }

    /// 每步更新开始时的钩子（Adam 族在此自增时间步）
    fn begin_step(&mut self) {}

    /// 全局梯度范数裁剪阈值
    fn clip_norm(&self) -> Option<f32>;

    /// 单参数更新规则（`grad` 已被取走，参数的梯度此刻已是零哨兵）
    fn update_one(&mut self, name: &str, param: &mut Parameter, grad: ArrayD<f32>);

    fn learning_rate(&self) -> f32;

    fn set_learning_rate(&mut self, lr: f32);

    /// 清空全部辅助状态
    fn reset(&mut self);

    /// 导出辅助状态（按参数名作键）
    fn status(&self) -> OptimizerStatus;

    /// 恢复辅助状态
    fn load_status(&mut self, status: OptimizerStatus);

    /// 导出可重建本优化器的描述符（超参数）
    fn to_descriptor(&self) -> OptimizerDescriptor;
}

/// 全局 L2 范数裁剪：范数超阈值时按 `threshold / (norm + 1e-7)` 等比缩小
///
/// 零哨兵参数在收集阶段已被排除，不参与范数计算。
pub(crate) fn clip_grads(params: &mut [&mut Parameter], clip_norm: Option<f32>) {
    let Some(threshold) = clip_norm else {
        return;
    };
    let norm = params
        .iter()
        .map(|p| p.grad().map_or(0.0, |g| g.mapv(|v| v * v).sum()))
        .sum::<f32>()
        .sqrt();
    if norm <= threshold {
        return;
    }
    let rate = threshold / (norm + 1e-7);
    for param in params.iter_mut() {
        if let Some(grad) = param.grad_mut() {
            *grad *= rate;
        }
    }
}

/// 把一个"参数名 → 缓冲"的槽并入状态
pub(crate) fn export_slot(
    status: &mut OptimizerStatus,
    slot: &str,
    buffers: &HashMap<String, ArrayD<f32>>,
) {
    for (name, value) in buffers {
        status
            .buffers
            .entry(name.clone())
            .or_default()
            .insert(slot.to_string(), value.clone());
    }
}

/// 从状态取出一个槽
pub(crate) fn import_slot(status: &OptimizerStatus, slot: &str) -> HashMap<String, ArrayD<f32>> {
    let mut buffers = HashMap::new();
    for (name, slots) in &status.buffers {
        if let Some(value) = slots.get(slot) {
            buffers.insert(name.clone(), value.clone());
        }
    }
    buffers
}
