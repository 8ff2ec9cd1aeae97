//! 批归一化层：训练用批统计量并维护滑动平均，推理用滑动统计量

use super::{LayerCommon, TraitLayer, check_sample_shape, expect_single};
use crate::nn::model_io::LayerDescriptor;
use crate::nn::{GraphError, Init, Parameter, Phase};
use ndarray::{ArrayD, Axis};
use rand::rngs::StdRng;

/// 批归一化层
///
/// 统计量沿批维（axis 0）逐特征计算，对任意秩的单样本形状都成立。
/// 反向是完整的 batch-norm 推导（穿透均值与方差），不是只对缩放平移求导。
///
/// 滑动统计量（running_mean/running_var）也作为 Parameter 持有：
/// 它们不可学习、永远收不到梯度，优化器的"梯度非空"过滤会自然跳过，
/// 而序列化会按名字把它们一并带走。
#[derive(Debug, Clone)]
pub struct BatchNorm {
    common: LayerCommon,
    momentum: f32,
    eps: f32,
    gamma: Option<Parameter>,
    beta: Option<Parameter>,
    running_mean: Option<Parameter>,
    running_var: Option<Parameter>,
    // 反向所需的本步缓存
    xn: Option<ArrayD<f32>>,
    xc: Option<ArrayD<f32>>,
    std: Option<ArrayD<f32>>,
}

impl BatchNorm {
    /// 默认 momentum=0.9，eps=1e-7
    pub fn new() -> Self {
        Self::with_config(0.9, 1e-7)
    }

    pub fn with_config(momentum: f32, eps: f32) -> Self {
        Self {
            common: LayerCommon::default(),
            momentum,
            eps,
            gamma: None,
            beta: None,
            running_mean: None,
            running_var: None,
            xn: None,
            xc: None,
            std: None,
        }
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }
}

impl Default for BatchNorm {
    fn default() -> Self {
        Self::new()
    }
}

impl TraitLayer for BatchNorm {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "BatchNorm"
    }

    fn build(&mut self, input_shape: &[usize], rng: &mut StdRng) -> Result<(), GraphError> {
        if !self.guard_build(input_shape)? {
            return Ok(());
        }
        let fan_in: usize = input_shape.iter().product();
        self.gamma = Some(Parameter::new(Init::Constant { value: 1.0 }.init(
            input_shape,
            fan_in,
            rng,
        )));
        self.beta = Some(Parameter::new(Init::Zeros.init(input_shape, fan_in, rng)));
        self.running_mean = Some(Parameter::new(Init::Zeros.init(input_shape, fan_in, rng)));
        self.running_var = Some(Parameter::new(Init::Constant { value: 1.0 }.init(
            input_shape,
            fan_in,
            rng,
        )));
        Ok(())
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("BatchNorm", xs)?;
        let input_shape = self.common.input_shape.clone().unwrap_or_default();
        check_sample_shape("BatchNorm", &input_shape, x)?;

        let gamma = self.gamma.as_ref().unwrap().data();
        let beta = self.beta.as_ref().unwrap().data();

        let xn = match phase {
            Phase::Train => {
                // 1. 批统计量
                let mean = x.mean_axis(Axis(0)).unwrap();
                let xc = x - &mean;
                let var = xc.mapv(|v| v * v).mean_axis(Axis(0)).unwrap();
                let std = var.mapv(|v| (v + self.eps).sqrt());
                let xn = &xc / &std;

                // 2. 滑动统计量按指数滑动平均更新
                let momentum = self.momentum;
                {
                    let rm = self.running_mean.as_mut().unwrap().data_mut();
                    *rm *= momentum;
                    *rm += &(&mean * (1.0 - momentum));
                }
                {
                    let rv = self.running_var.as_mut().unwrap().data_mut();
                    *rv *= momentum;
                    *rv += &(&var * (1.0 - momentum));
                }

                // 3. 反向所需缓存
                self.xc = Some(xc);
                self.std = Some(std);
                self.xn = Some(xn.clone());
                xn
            }
            Phase::Eval => {
                // 推理：滑动统计量，不采集新统计
                let rm = self.running_mean.as_ref().unwrap().data();
                let rv = self.running_var.as_ref().unwrap().data();
                let std = rv.mapv(|v| (v + self.eps).sqrt());
                (x - rm) / &std
            }
        };

        Ok(&xn * gamma + beta)
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let (xn, xc, std) = match (&self.xn, &self.xc, &self.std) {
            (Some(xn), Some(xc), Some(std)) => (xn, xc, std),
            _ => {
                return Err(GraphError::ConfigurationError(
                    "BatchNorm层反向前必须先执行训练模式前向".to_string(),
                ));
            }
        };
        let batch = dy.shape()[0] as f32;

        // 1. 可学习参数的梯度
        let dbeta = dy.sum_axis(Axis(0));
        let dgamma = (xn * dy).sum_axis(Axis(0));
        self.beta.as_mut().unwrap().accumulate_grad(&dbeta);
        self.gamma.as_mut().unwrap().accumulate_grad(&dgamma);

        // 2. 完整的 batch-norm 反向（穿透均值/方差）
        let gamma = self.gamma.as_ref().unwrap().data();
        let dxn = dy * gamma;
        let mut dxc = &dxn / std;
        let dstd = -((&dxn * xc) / &(std * std)).sum_axis(Axis(0));
        let dvar = &dstd * 0.5 / std;
        dxc += &(xc * &(&dvar * (2.0 / batch)));
        let dmean = dxc.sum_axis(Axis(0));
        let dx = dxc - &(&dmean / batch);

        Ok(vec![dx])
    }

    fn param_entries(&mut self) -> Vec<(&'static str, &mut Parameter)> {
        let mut entries = Vec::new();
        if let Some(g) = &mut self.gamma {
            entries.push(("gamma", g));
        }
        if let Some(b) = &mut self.beta {
            entries.push(("beta", b));
        }
        if let Some(rm) = &mut self.running_mean {
            entries.push(("running_mean", rm));
        }
        if let Some(rv) = &mut self.running_var {
            entries.push(("running_var", rv));
        }
        entries
    }

    fn param_refs(&self) -> Vec<(&'static str, &Parameter)> {
        let mut entries = Vec::new();
        if let Some(g) = &self.gamma {
            entries.push(("gamma", g));
        }
        if let Some(b) = &self.beta {
            entries.push(("beta", b));
        }
        if let Some(rm) = &self.running_mean {
            entries.push(("running_mean", rm));
        }
        if let Some(rv) = &self.running_var {
            entries.push(("running_var", rv));
        }
        entries
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::BatchNorm {
            momentum: self.momentum,
            eps: self.eps,
            input_shape: self.common.input_shape.clone(),
        }
    }
}
