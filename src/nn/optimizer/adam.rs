//! Adam 与 AdaBound 优化器

use super::{OptimizerStatus, TraitOptimizer, export_slot, import_slot};
use crate::nn::Parameter;
use crate::nn::model_io::OptimizerDescriptor;
use ndarray::ArrayD;
use std::collections::HashMap;

/// Adam：一阶/二阶矩估计 + 偏置校正
///
/// m ← m + (1-β1)(grad - m)；v ← v + (1-β2)(grad² - v)；
/// lr_t = α·√(1-β2^t)/(1-β1^t)；data ← data - lr_t·m/(√v + eps)
#[derive(Debug, Clone)]
pub struct Adam {
    alpha: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    clip_norm: Option<f32>,
    /// 时间步（一步更新自增一次，偏置校正依赖它）
    t: u64,
    m: HashMap<String, ArrayD<f32>>,
    v: HashMap<String, ArrayD<f32>>,
}

impl Adam {
    /// 默认 α=0.001、β1=0.9、β2=0.999
    pub fn new() -> Self {
        Self::with_config(0.001, 0.9, 0.999, 1e-7)
    }

    pub fn with_config(alpha: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            alpha,
            beta1,
            beta2,
            eps,
            clip_norm: None,
            t: 0,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }

    /// 链式配置：全局梯度范数裁剪阈值
    pub fn clip_norm(mut self, clip_norm: f32) -> Self {
        self.clip_norm = Some(clip_norm);
        self
    }

    /// 偏置校正后的本步学习率
    fn corrected_lr(&self) -> f32 {
        let t = self.t as i32;
        self.alpha * (1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t))
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new()
    }
}

impl TraitOptimizer for Adam {
    fn clip_norm(&self) -> Option<f32> {
        self.clip_norm
    }

    fn begin_step(&mut self) {
        self.t += 1;
    }

    fn update_one(&mut self, name: &str, param: &mut Parameter, grad: ArrayD<f32>) {
        let lr_t = self.corrected_lr();
        let dim = param.data().raw_dim();

        let m = self
            .m
            .entry(name.to_string())
            .or_insert_with(|| ArrayD::zeros(dim.clone()));
        let delta_m = (&grad - &*m) * (1.0 - self.beta1);
        *m += &delta_m;
        let m_snapshot = m.clone();

        let v = self
            .v
            .entry(name.to_string())
            .or_insert_with(|| ArrayD::zeros(dim));
        let delta_v = (grad.mapv(|x| x * x) - &*v) * (1.0 - self.beta2);
        *v += &delta_v;

        let eps = self.eps;
        let denom = v.mapv(|x| x.sqrt() + eps);
        *param.data_mut() -= &(&m_snapshot * lr_t / &denom);
    }

    fn learning_rate(&self) -> f32 {
        self.alpha
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.alpha = lr;
    }

    fn reset(&mut self) {
        self.t = 0;
        self.m.clear();
        self.v.clear();
    }

    fn status(&self) -> OptimizerStatus {
        let mut status = OptimizerStatus {
            step: self.t,
            ..Default::default()
        };
        export_slot(&mut status, "m", &self.m);
        export_slot(&mut status, "v", &self.v);
        status
    }

    fn load_status(&mut self, status: OptimizerStatus) {
        self.t = status.step;
        self.m = import_slot(&status, "m");
        self.v = import_slot(&status, "v");
    }

    fn to_descriptor(&self) -> OptimizerDescriptor {
        OptimizerDescriptor::Adam {
            alpha: self.alpha,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.eps,
            clip_norm: self.clip_norm,
        }
    }
}

/// AdaBound：Adam 的逐元素步长夹在一条收敛到 final_lr 的动态区间里
///
/// lower = final_lr·(1 - 1/(γ·t + 1))；upper = final_lr·(1 + 1/(γ·t))；
/// data ← data - clamp(lr_t/(√v + eps), lower, upper)·m
#[derive(Debug, Clone)]
pub struct AdaBound {
    alpha: f32,
    beta1: f32,
    beta2: f32,
    final_lr: f32,
    gamma: f32,
    eps: f32,
    clip_norm: Option<f32>,
    t: u64,
    m: HashMap<String, ArrayD<f32>>,
    v: HashMap<String, ArrayD<f32>>,
}

impl AdaBound {
    /// 默认 α=0.001、final_lr=0.1、γ=0.001
    pub fn new() -> Self {
        Self::with_config(0.001, 0.9, 0.999, 0.1, 0.001, 1e-7)
    }

    pub fn with_config(
        alpha: f32,
        beta1: f32,
        beta2: f32,
        final_lr: f32,
        gamma: f32,
        eps: f32,
    ) -> Self {
        Self {
            alpha,
            beta1,
            beta2,
            final_lr,
            gamma,
            eps,
            clip_norm: None,
            t: 0,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }

    /// 链式配置：全局梯度范数裁剪阈值
    pub fn clip_norm(mut self, clip_norm: f32) -> Self {
        self.clip_norm = Some(clip_norm);
        self
    }
}

impl Default for AdaBound {
    fn default() -> Self {
        Self::new()
    }
}

impl TraitOptimizer for AdaBound {
    fn clip_norm(&self) -> Option<f32> {
        self.clip_norm
    }

    fn begin_step(&mut self) {
        self.t += 1;
    }

    fn update_one(&mut self, name: &str, param: &mut Parameter, grad: ArrayD<f32>) {
        let t = self.t as i32;
        let lr_t = self.alpha * (1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t));
        let lower = self.final_lr * (1.0 - 1.0 / (self.gamma * self.t as f32 + 1.0));
        let upper = self.final_lr * (1.0 + 1.0 / (self.gamma * self.t as f32));
        let dim = param.data().raw_dim();

        let m = self
            .m
            .entry(name.to_string())
            .or_insert_with(|| ArrayD::zeros(dim.clone()));
        let delta_m = (&grad - &*m) * (1.0 - self.beta1);
        *m += &delta_m;
        let m_snapshot = m.clone();

        let v = self
            .v
            .entry(name.to_string())
            .or_insert_with(|| ArrayD::zeros(dim));
        let delta_v = (grad.mapv(|x| x * x) - &*v) * (1.0 - self.beta2);
        *v += &delta_v;

        let eps = self.eps;
        let step = v.mapv(|x| (lr_t / (x.sqrt() + eps)).clamp(lower, upper));
        *param.data_mut() -= &(&step * &m_snapshot);
    }

    fn learning_rate(&self) -> f32 {
        self.alpha
    }

    fn set_learning_rate(&mut self, lr: f32) {
        self.alpha = lr;
    }

    fn reset(&mut self) {
        self.t = 0;
        self.m.clear();
        self.v.clear();
    }

    fn status(&self) -> OptimizerStatus {
        let mut status = OptimizerStatus {
            step: self.t,
            ..Default::default()
        };
        export_slot(&mut status, "m", &self.m);
        export_slot(&mut status, "v", &self.v);
        status
    }

    fn load_status(&mut self, status: OptimizerStatus) {
        self.t = status.step;
        self.m = import_slot(&status, "m");
        self.v = import_slot(&status, "v");
    }

    fn to_descriptor(&self) -> OptimizerDescriptor {
        OptimizerDescriptor::AdaBound {
            alpha: self.alpha,
            beta1: self.beta1,
            beta2: self.beta2,
            final_lr: self.final_lr,
            gamma: self.gamma,
            eps: self.eps,
            clip_norm: self.clip_norm,
        }
    }
}
