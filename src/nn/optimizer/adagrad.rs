//! AdaGrad 优化器

use super::{OptimizerStatus, TraitOptimizer, export_slot, import_slot};
use crate::nn::Parameter;
use crate::nn::model_io::OptimizerDescriptor;
use ndarray::ArrayD;
use std::collections::HashMap;

/// AdaGrad：按参数累积历史平方梯度做自适应缩放
///
/// g ← g + grad²；data ← data - lr·grad / √(g + eps)
#[derive(Debug, Clone)]
pub struct AdaGrad {
    lr: f32,
    eps: f32,
    clip_norm: Option<f32>,
    g: HashMap<String, ArrayD<f32>>,
}

impl AdaGrad {
    /// 默认学习率 0.01
    pub fn new() -> Self {
        Self::with_config(0.01, 1e-7)
    }

    pub fn with_config(lr: f32, eps: f32) -> Self {
        Self {
            lr,
            eps,
            clip_norm: None,
            g: HashMap::new(),
        }
    }

    /// 链式配置：全局梯度范数裁剪阈值
    pub fn clip_norm(mut self, clip_norm: f32) -> Self {
        self.clip_norm = Some(clip_norm);
        self
    }
}

impl Default for AdaGrad {
    fn default() -> Self {
        Self::new()
    }
}

impl TraitOptimizer for AdaGrad {
    fn clip_norm(&self) -> Option<f32> {
        self.clip_norm
    }

    fn update_one(&mut self, name: &str, param: &mut Parameter, grad: ArrayD<f32>) {
        let g = self
            .g
            .entry(name.to_string())
            .or_insert_with(|| ArrayD::zeros(param.data().raw_dim()));
        *g += &grad.mapv(|v| v * v);
        let eps = self.eps;
        let denom = g.mapv(|v| (v + eps).sqrt());
        *param.data_mut() -= &(&grad * self.lr / &denom);
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn reset(&mut self) {
        self.g.clear();
    }

    fn status(&self) -> OptimizerStatus {
        let mut status = OptimizerStatus::default();
        export_slot(&mut status, "g", &self.g);
        status
    }

    fn load_status(&mut self, status: OptimizerStatus) {
        self.g = import_slot(&status, "g");
    }

    fn to_descriptor(&self) -> OptimizerDescriptor {
        OptimizerDescriptor::AdaGrad {
            lr: self.lr,
            eps: self.eps,
            clip_norm: self.clip_norm,
        }
    }
}
