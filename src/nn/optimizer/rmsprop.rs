//! RMSProp 与 RMSPropGraves 优化器

use super::{OptimizerStatus, TraitOptimizer, export_slot, import_slot};
use crate::nn::Parameter;
use crate::nn::model_io::OptimizerDescriptor;
use ndarray::ArrayD;
use std::collections::HashMap;

/// RMSProp：平方梯度的指数滑动平均
///
/// g ← α·g + (1-α)·grad²；data ← data - lr·grad / √(g + eps)
#[derive(Debug, Clone)]
pub struct RMSProp {
    lr: f32,
    alpha: f32,
    eps: f32,
    clip_norm: Option<f32>,
    g: HashMap<String, ArrayD<f32>>,
}

impl RMSProp {
    /// 默认学习率 0.001、衰减 0.9
    pub fn new() -> Self {
        Self::with_config(0.001, 0.9, 1e-7)
    }

    pub fn with_config(lr: f32, alpha: f32, eps: f32) -> Self {
        Self {
            lr,
            alpha,
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

impl Default for RMSProp {
    fn default() -> Self {
        Self::new()
    }
}

impl TraitOptimizer for RMSProp {
    fn clip_norm(&self) -> Option<f32> {
        self.clip_norm
    }

    fn update_one(&mut self, name: &str, param: &mut Parameter, grad: ArrayD<f32>) {
        let g = self
            .g
            .entry(name.to_string())
            .or_insert_with(|| ArrayD::zeros(param.data().raw_dim()));
        *g *= self.alpha;
        *g += &(grad.mapv(|v| v * v) * (1.0 - self.alpha));
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
        OptimizerDescriptor::RMSProp {
            lr: self.lr,
            alpha: self.alpha,
            eps: self.eps,
            clip_norm: self.clip_norm,
        }
    }
}

/// RMSPropGraves：Graves 变体，额外维护一阶滑动平均
///
/// m ← α·m + (1-α)·grad；g ← α·g + (1-α)·grad²；
/// data ← data - lr·grad / √(g - m² + eps)
#[derive(Debug, Clone)]
pub struct RMSPropGraves {
    lr: f32,
    alpha: f32,
    eps: f32,
    clip_norm: Option<f32>,
    m: HashMap<String, ArrayD<f32>>,
    g: HashMap<String, ArrayD<f32>>,
}

impl RMSPropGraves {
    /// 默认学习率 0.0001、衰减 0.95
    pub fn new() -> Self {
        Self::with_config(0.0001, 0.95, 1e-4)
    }

    pub fn with_config(lr: f32, alpha: f32, eps: f32) -> Self {
        Self {
            lr,
            alpha,
            eps,
            clip_norm: None,
            m: HashMap::new(),
            g: HashMap::new(),
        }
    }

    /// 链式配置：全局梯度范数裁剪阈值
    pub fn clip_norm(mut self, clip_norm: f32) -> Self {
        self.clip_norm = Some(clip_norm);
        self
    }
}

impl Default for RMSPropGraves {
    fn default() -> Self {
        Self::new()
    }
}

impl TraitOptimizer for RMSPropGraves {
    fn clip_norm(&self) -> Option<f32> {
        self.clip_norm
    }

    fn update_one(&mut self, name: &str, param: &mut Parameter, grad: ArrayD<f32>) {
        let dim = param.data().raw_dim();
        let m = self
            .m
            .entry(name.to_string())
            .or_insert_with(|| ArrayD::zeros(dim.clone()));
        *m *= self.alpha;
        *m += &(&grad * (1.0 - self.alpha));
        let m_snapshot = m.clone();

        let g = self
            .g
            .entry(name.to_string())
            .or_insert_with(|| ArrayD::zeros(dim));
        *g *= self.alpha;
        *g += &(grad.mapv(|v| v * v) * (1.0 - self.alpha));

        let eps = self.eps;
        let denom = (&*g - &m_snapshot.mapv(|v| v * v)).mapv(|v| (v + eps).sqrt());
        *param.data_mut() -= &(&grad * self.lr / &denom);
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn reset(&mut self) {
        self.m.clear();
        self.g.clear();
    }

    fn status(&self) -> OptimizerStatus {
        let mut status = OptimizerStatus::default();
        export_slot(&mut status, "m", &self.m);
        export_slot(&mut status, "g", &self.g);
        status
    }

    fn load_status(&mut self, status: OptimizerStatus) {
        self.m = import_slot(&status, "m");
        self.g = import_slot(&status, "g");
    }

    fn to_descriptor(&self) -> OptimizerDescriptor {
        OptimizerDescriptor::RMSPropGraves {
            lr: self.lr,
            alpha: self.alpha,
            eps: self.eps,
            clip_norm: self.clip_norm,
        }
    }
}
