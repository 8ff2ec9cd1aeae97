//! AdaDelta 优化器

use super::{OptimizerStatus, TraitOptimizer, export_slot, import_slot};
use crate::nn::Parameter;
use crate::nn::model_io::OptimizerDescriptor;
use ndarray::ArrayD;
use std::collections::HashMap;

/// AdaDelta：无需全局学习率的自适应方法
///
/// h ← ρ·h + (1-ρ)·grad²；
/// v = √((s + eps)/(h + eps))·grad；
/// s ← ρ·s + (1-ρ)·v²；data ← data - v
#[derive(Debug, Clone)]
pub struct AdaDelta {
    rho: f32,
    eps: f32,
    clip_norm: Option<f32>,
    h: HashMap<String, ArrayD<f32>>,
    s: HashMap<String, ArrayD<f32>>,
}

impl AdaDelta {
    /// 默认衰减 0.95
    pub fn new() -> Self {
        Self::with_config(0.95, 1e-6)
    }

    pub fn with_config(rho: f32, eps: f32) -> Self {
        Self {
            rho,
            eps,
            clip_norm: None,
            h: HashMap::new(),
            s: HashMap::new(),
        }
    }

    /// 链式配置：全局梯度范数裁剪阈值
    pub fn clip_norm(mut self, clip_norm: f32) -> Self {
        self.clip_norm = Some(clip_norm);
        self
    }
}

impl Default for AdaDelta {
    fn default() -> Self {
        Self::new()
    }
}

impl TraitOptimizer for AdaDelta {
    fn clip_norm(&self) -> Option<f32> {
        self.clip_norm
    }

    fn update_one(&mut self, name: &str, param: &mut Parameter, grad: ArrayD<f32>) {
        let dim = param.data().raw_dim();
        let eps = self.eps;

        let h = self
            .h
            .entry(name.to_string())
            .or_insert_with(|| ArrayD::zeros(dim.clone()));
        *h *= self.rho;
        *h += &(grad.mapv(|v| v * v) * (1.0 - self.rho));
        let h_snapshot = h.clone();

        let s = self
            .s
            .entry(name.to_string())
            .or_insert_with(|| ArrayD::zeros(dim));
        let rate = ndarray::Zip::from(&*s)
            .and(&h_snapshot)
            .map_collect(|&sv, &hv| ((sv + eps) / (hv + eps)).sqrt());
        let v = &rate * &grad;
        *s *= self.rho;
        *s += &(v.mapv(|x| x * x) * (1.0 - self.rho));
        *param.data_mut() -= &v;
    }

    fn learning_rate(&self) -> f32 {
        // AdaDelta 没有全局学习率，返回衰减系数占位
        self.rho
    }

    fn set_learning_rate(&mut self, _lr: f32) {}

    fn reset(&mut self) {
        self.h.clear();
        self.s.clear();
    }

    fn status(&self) -> OptimizerStatus {
        let mut status = OptimizerStatus::default();
        export_slot(&mut status, "h", &self.h);
        export_slot(&mut status, "s", &self.s);
        status
    }

    fn load_status(&mut self, status: OptimizerStatus) {
        self.h = import_slot(&status, "h");
        self.s = import_slot(&status, "s");
    }

    fn to_descriptor(&self) -> OptimizerDescriptor {
        OptimizerDescriptor::AdaDelta {
            rho: self.rho,
            eps: self.eps,
            clip_norm: self.clip_norm,
        }
    }
}
