//! SGD（带动量）与 Nesterov 优化器

use super::{OptimizerStatus, TraitOptimizer, export_slot, import_slot};
use crate::nn::Parameter;
use crate::nn::model_io::OptimizerDescriptor;
use ndarray::ArrayD;
use std::collections::HashMap;

/// 随机梯度下降
///
/// momentum = 0 时退化为朴素 SGD；大于 0 时按参数名维护速度缓冲：
/// amount = lr·grad + momentum·v；v ← amount；data ← data - amount
#[derive(Debug, Clone)]
pub struct SGD {
    lr: f32,
    momentum: f32,
    clip_norm: Option<f32>,
    /// 速度缓冲（参数名 → v）
    v: HashMap<String, ArrayD<f32>>,
}

impl SGD {
    /// 默认学习率 0.01、无动量
    pub fn new() -> Self {
        Self::with_config(0.01, 0.0)
    }

    pub fn with_config(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            clip_norm: None,
            v: HashMap::new(),
        }
    }

    /// 链式配置：全局梯度范数裁剪阈值
    pub fn clip_norm(mut self, clip_norm: f32) -> Self {
        self.clip_norm = Some(clip_norm);
        self
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }
}

impl Default for SGD {
    fn default() -> Self {
        Self::new()
    }
}

impl TraitOptimizer for SGD {
    fn clip_norm(&self) -> Option<f32> {
        self.clip_norm
    }

    fn update_one(&mut self, name: &str, param: &mut Parameter, grad: ArrayD<f32>) {
        let mut amount = grad * self.lr;
        if self.momentum > 0.0 {
            if let Some(v_prev) = self.v.get(name) {
                amount += &(v_prev * self.momentum);
            }
            self.v.insert(name.to_string(), amount.clone());
        }
        *param.data_mut() -= &amount;
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn reset(&mut self) {
        self.v.clear();
    }

    fn status(&self) -> OptimizerStatus {
        let mut status = OptimizerStatus::default();
        export_slot(&mut status, "v", &self.v);
        status
    }

    fn load_status(&mut self, status: OptimizerStatus) {
        self.v = import_slot(&status, "v");
    }

    fn to_descriptor(&self) -> OptimizerDescriptor {
        OptimizerDescriptor::SGD {
            lr: self.lr,
            momentum: self.momentum,
            clip_norm: self.clip_norm,
        }
    }
}

/// Nesterov 动量
///
/// v ← momentum·v - lr·grad；
/// data ← data + momentum²·v - (1 + momentum)·lr·grad
#[derive(Debug, Clone)]
pub struct Nesterov {
    lr: f32,
    momentum: f32,
    clip_norm: Option<f32>,
    v: HashMap<String, ArrayD<f32>>,
}

impl Nesterov {
    /// 默认学习率 0.01、动量 0.9
    pub fn new() -> Self {
        Self::with_config(0.01, 0.9)
    }

    pub fn with_config(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            clip_norm: None,
            v: HashMap::new(),
        }
    }

    /// 链式配置：全局梯度范数裁剪阈值
    pub fn clip_norm(mut self, clip_norm: f32) -> Self {
        self.clip_norm = Some(clip_norm);
        self
    }
}

impl Default for Nesterov {
    fn default() -> Self {
        Self::new()
    }
}

impl TraitOptimizer for Nesterov {
    fn clip_norm(&self) -> Option<f32> {
        self.clip_norm
    }

    fn update_one(&mut self, name: &str, param: &mut Parameter, grad: ArrayD<f32>) {
        let amount = grad * self.lr;
        let v_prev = self
            .v
            .remove(name)
            .unwrap_or_else(|| ArrayD::zeros(param.data().raw_dim()));
        let v_new = v_prev * self.momentum - &amount;
        *param.data_mut() += &(&v_new * (self.momentum * self.momentum));
        *param.data_mut() -= &(&amount * (1.0 + self.momentum));
        self.v.insert(name.to_string(), v_new);
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn reset(&mut self) {
        self.v.clear();
    }

    fn status(&self) -> OptimizerStatus {
        let mut status = OptimizerStatus::default();
        export_slot(&mut status, "v", &self.v);
        status
    }

    fn load_status(&mut self, status: OptimizerStatus) {
        self.v = import_slot(&status, "v");
    }

    fn to_descriptor(&self) -> OptimizerDescriptor {
        OptimizerDescriptor::Nesterov {
            lr: self.lr,
            momentum: self.momentum,
            clip_norm: self.clip_norm,
        }
    }
}
