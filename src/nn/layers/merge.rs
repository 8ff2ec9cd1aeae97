//! 合并层：接受两个输入、产出一个带双亲链接的输出
//!
//! 层族里唯一 backward 返回一对梯度的变体。首次调用时按第一个输入的形状构建。

use super::{LayerCommon, TraitLayer, expect_pair};
use crate::nn::model_io::LayerDescriptor;
use crate::nn::{GraphError, Phase};
use ndarray::{ArrayD, Axis, Slice, concatenate};
use rand::rngs::StdRng;

/// 逐元素相加：两路梯度都是 dy
#[derive(Debug, Clone)]
pub struct Add {
    common: LayerCommon,
}

impl Add {
    pub fn new() -> Self {
        Self {
            common: LayerCommon::default(),
        }
    }
}

impl Default for Add {
    fn default() -> Self {
        Self::new()
    }
}

impl TraitLayer for Add {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "Add"
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let (x1, x2) = expect_pair("Add", xs)?;
        if x1.shape() != x2.shape() {
            return Err(GraphError::ShapeMismatch {
                expected: x1.shape().to_vec(),
                got: x2.shape().to_vec(),
                message: "Add层的两个输入形状必须一致".to_string(),
            });
        }
        Ok(x1 + x2)
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        Ok(vec![dy.clone(), dy.clone()])
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::Add {
            input_shape: self.common.input_shape.clone(),
        }
    }
}

/// 逐元素相乘：梯度交叉（dy·x2, dy·x1），故前向须缓存两个输入
#[derive(Debug, Clone)]
pub struct Mul {
    common: LayerCommon,
    x1: Option<ArrayD<f32>>,
    x2: Option<ArrayD<f32>>,
}

impl Mul {
    pub fn new() -> Self {
        Self {
            common: LayerCommon::default(),
            x1: None,
            x2: None,
        }
    }
}

impl Default for Mul {
    fn default() -> Self {
        Self::new()
    }
}

impl TraitLayer for Mul {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "Mul"
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let (x1, x2) = expect_pair("Mul", xs)?;
        if x1.shape() != x2.shape() {
            return Err(GraphError::ShapeMismatch {
                expected: x1.shape().to_vec(),
                got: x2.shape().to_vec(),
                message: "Mul层的两个输入形状必须一致".to_string(),
            });
        }
        self.x1 = Some(x1.clone());
        self.x2 = Some(x2.clone());
        Ok(x1 * x2)
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let (x1, x2) = match (&self.x1, &self.x2) {
            (Some(x1), Some(x2)) => (x1, x2),
            _ => {
                return Err(GraphError::ConfigurationError(
                    "Mul层反向前必须先执行前向".to_string(),
                ));
            }
        };
        Ok(vec![dy * x2, dy * x1])
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::Mul {
            input_shape: self.common.input_shape.clone(),
        }
    }
}

/// 沿指定轴拼接：反向按前向时第一个输入的宽度把 dy 劈回两段
///
/// `axis` 按批量数组计（0 是批维，不允许沿批维拼接），默认 1。
#[derive(Debug, Clone)]
pub struct Concatenate {
    common: LayerCommon,
    axis: usize,
    /// 前向时第一个输入在拼接轴上的宽度
    split_at: Option<usize>,
    /// 前向时第二个输入在拼接轴上的宽度（output_shape 用）
    other_dim: Option<usize>,
}

impl Concatenate {
    pub fn new() -> Self {
        Self::with_axis(1)
    }

    pub fn with_axis(axis: usize) -> Self {
        Self {
            common: LayerCommon::default(),
            axis,
            split_at: None,
            other_dim: None,
        }
    }
}

impl Default for Concatenate {
    fn default() -> Self {
        Self::new()
    }
}

impl TraitLayer for Concatenate {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "Concatenate"
    }

    fn build(&mut self, input_shape: &[usize], _rng: &mut StdRng) -> Result<(), GraphError> {
        if self.axis == 0 {
            return Err(GraphError::InvalidOperation(
                "Concatenate层不允许沿批维（axis 0）拼接".to_string(),
            ));
        }
        if self.axis > input_shape.len() {
            return Err(GraphError::InvalidOperation(format!(
                "Concatenate层的axis {} 超出输入维数 {}",
                self.axis,
                input_shape.len()
            )));
        }
        self.guard_build(input_shape)?;
        Ok(())
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let (x1, x2) = expect_pair("Concatenate", xs)?;
        let y = concatenate(Axis(self.axis), &[x1.view(), x2.view()]).map_err(|_| {
            GraphError::ShapeMismatch {
                expected: x1.shape().to_vec(),
                got: x2.shape().to_vec(),
                message: format!("Concatenate层沿axis {}拼接失败", self.axis),
            }
        })?;
        self.split_at = Some(x1.shape()[self.axis]);
        self.other_dim = Some(x2.shape()[self.axis]);
        Ok(y)
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let split_at = self.split_at.ok_or_else(|| {
            GraphError::ConfigurationError("Concatenate层反向前必须先执行前向".to_string())
        })? as isize;
        let d1 = dy
            .slice_axis(Axis(self.axis), Slice::from(..split_at))
            .to_owned();
        let d2 = dy
            .slice_axis(Axis(self.axis), Slice::from(split_at..))
            .to_owned();
        Ok(vec![d1, d2])
    }

    fn output_shape(&self) -> Vec<usize> {
        let mut shape = self.common.input_shape.clone().unwrap_or_default();
        // 拼接宽度要等第一次前向后才知道
        if let (Some(split_at), Some(other)) = (self.split_at, self.other_dim) {
            if self.axis >= 1 && self.axis - 1 < shape.len() {
                shape[self.axis - 1] = split_at + other;
            }
        }
        shape
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::Concatenate {
            axis: self.axis,
            input_shape: self.common.input_shape.clone(),
        }
    }
}
