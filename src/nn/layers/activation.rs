//! 激活层：逐元素非线性及其局部导数
//!
//! 无参数层，backward 就是"局部导数 × 上游梯度"。
//! 缓存策略按各自导数形式选最省的一份：Sigmoid/Tanh 缓存输出，其余缓存输入。

use super::{LayerCommon, TraitLayer, expect_single};
use crate::nn::model_io::LayerDescriptor;
use crate::nn::{GraphError, Phase};
use ndarray::ArrayD;

/// Sigmoid 激活
///
/// forward: σ(x) = 1 / (1 + e^(-x))
/// backward: dσ/dx = σ(x)·(1 - σ(x))
#[derive(Debug, Clone)]
pub struct Sigmoid {
    common: LayerCommon,
    y: Option<ArrayD<f32>>,
}

/// Tanh 激活
///
/// backward: d(tanh)/dx = 1 - tanh²(x)
#[derive(Debug, Clone)]
pub struct Tanh {
    common: LayerCommon,
    y: Option<ArrayD<f32>>,
}

/// ReLU 激活
///
/// forward: max(0, x)；backward: x > 0 时 1，否则 0
#[derive(Debug, Clone)]
pub struct ReLU {
    common: LayerCommon,
    x: Option<ArrayD<f32>>,
}

/// Leaky ReLU 激活
///
/// forward: x > 0 时 x，否则 alpha·x；backward: x > 0 时 1，否则 alpha
#[derive(Debug, Clone)]
pub struct LeakyReLU {
    common: LayerCommon,
    alpha: f32,
    x: Option<ArrayD<f32>>,
}

/// Softplus 激活：ln(1 + e^x)，导数即 sigmoid(x)
#[derive(Debug, Clone)]
pub struct Softplus {
    common: LayerCommon,
    x: Option<ArrayD<f32>>,
}

/// Softsign 激活：x / (1 + |x|)，导数 1 / (1 + |x|)²
#[derive(Debug, Clone)]
pub struct Softsign {
    common: LayerCommon,
    x: Option<ArrayD<f32>>,
}

impl Sigmoid {
    pub fn new() -> Self {
        Self {
            common: LayerCommon::default(),
            y: None,
        }
    }
}

impl Tanh {
    pub fn new() -> Self {
        Self {
            common: LayerCommon::default(),
            y: None,
        }
    }
}

impl ReLU {
    pub fn new() -> Self {
        Self {
            common: LayerCommon::default(),
            x: None,
        }
    }
}

impl LeakyReLU {
    /// 默认负半轴斜率 0.3
    pub fn new() -> Self {
        Self::with_alpha(0.3)
    }

    pub fn with_alpha(alpha: f32) -> Self {
        Self {
            common: LayerCommon::default(),
            alpha,
            x: None,
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }
}

impl Softplus {
    pub fn new() -> Self {
        Self {
            common: LayerCommon::default(),
            x: None,
        }
    }
}

impl Softsign {
    pub fn new() -> Self {
        Self {
            common: LayerCommon::default(),
            x: None,
        }
    }
}

impl Default for Sigmoid {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for Tanh {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ReLU {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for LeakyReLU {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for Softplus {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for Softsign {
    fn default() -> Self {
        Self::new()
    }
}

/// 数值稳定的逐元素 sigmoid
pub(crate) fn sigmoid_scalar(v: f32) -> f32 {
    if v >= 0.0 {
        1.0 / (1.0 + (-v).exp())
    } else {
        let e = v.exp();
        e / (1.0 + e)
    }
}

impl TraitLayer for Sigmoid {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "Sigmoid"
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("Sigmoid", xs)?;
        let y = x.mapv(sigmoid_scalar);
        self.y = Some(y.clone());
        Ok(y)
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let y = self.y.as_ref().ok_or_else(|| {
            GraphError::ConfigurationError("Sigmoid层反向前必须先执行前向".to_string())
        })?;
        Ok(vec![dy * &y.mapv(|v| v * (1.0 - v))])
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::Sigmoid {
            input_shape: self.common.input_shape.clone(),
        }
    }
}

impl TraitLayer for Tanh {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "Tanh"
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("Tanh", xs)?;
        let y = x.mapv(f32::tanh);
        self.y = Some(y.clone());
        Ok(y)
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let y = self.y.as_ref().ok_or_else(|| {
            GraphError::ConfigurationError("Tanh层反向前必须先执行前向".to_string())
        })?;
        Ok(vec![dy * &y.mapv(|v| 1.0 - v * v)])
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::Tanh {
            input_shape: self.common.input_shape.clone(),
        }
    }
}

impl TraitLayer for ReLU {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "ReLU"
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("ReLU", xs)?;
        self.x = Some(x.clone());
        Ok(x.mapv(|v| v.max(0.0)))
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let x = self.x.as_ref().ok_or_else(|| {
            GraphError::ConfigurationError("ReLU层反向前必须先执行前向".to_string())
        })?;
        Ok(vec![dy * &x.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })])
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::ReLU {
            input_shape: self.common.input_shape.clone(),
        }
    }
}

impl TraitLayer for LeakyReLU {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "LeakyReLU"
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("LeakyReLU", xs)?;
        self.x = Some(x.clone());
        let alpha = self.alpha;
        Ok(x.mapv(|v| if v > 0.0 { v } else { alpha * v }))
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let x = self.x.as_ref().ok_or_else(|| {
            GraphError::ConfigurationError("LeakyReLU层反向前必须先执行前向".to_string())
        })?;
        let alpha = self.alpha;
        Ok(vec![dy * &x.mapv(|v| if v > 0.0 { 1.0 } else { alpha })])
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::LeakyReLU {
            alpha: self.alpha,
            input_shape: self.common.input_shape.clone(),
        }
    }
}

impl TraitLayer for Softplus {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "Softplus"
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("Softplus", xs)?;
        self.x = Some(x.clone());
        // ln(1 + e^x) 的稳定式：max(x, 0) + ln(1 + e^(-|x|))
        Ok(x.mapv(|v| v.max(0.0) + (1.0 + (-v.abs()).exp()).ln()))
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let x = self.x.as_ref().ok_or_else(|| {
            GraphError::ConfigurationError("Softplus层反向前必须先执行前向".to_string())
        })?;
        Ok(vec![dy * &x.mapv(sigmoid_scalar)])
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::Softplus {
            input_shape: self.common.input_shape.clone(),
        }
    }
}

impl TraitLayer for Softsign {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "Softsign"
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("Softsign", xs)?;
        self.x = Some(x.clone());
        Ok(x.mapv(|v| v / (1.0 + v.abs())))
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let x = self.x.as_ref().ok_or_else(|| {
            GraphError::ConfigurationError("Softsign层反向前必须先执行前向".to_string())
        })?;
        Ok(vec![dy * &x.mapv(|v| {
            let d = 1.0 + v.abs();
            1.0 / (d * d)
        })])
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::Softsign {
            input_shape: self.common.input_shape.clone(),
        }
    }
}
