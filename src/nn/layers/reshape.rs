//! 形状变换层：Flatten / Reshape（只做簿记，不做数值计算）

use super::{LayerCommon, TraitLayer, check_sample_shape, expect_single};
use crate::nn::model_io::LayerDescriptor;
use crate::nn::{GraphError, Phase};
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;

/// 把单样本展平成一维（[batch, d1, d2, ...] → [batch, d1*d2*...]）
#[derive(Debug, Clone)]
pub struct Flatten {
    common: LayerCommon,
}

impl Flatten {
    pub fn new() -> Self {
        Self {
            common: LayerCommon::default(),
        }
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new()
    }
}

impl TraitLayer for Flatten {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "Flatten"
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("Flatten", xs)?;
        let input_shape = self.common.input_shape.clone().unwrap_or_default();
        check_sample_shape("Flatten", &input_shape, x)?;

        let batch = x.shape()[0];
        let flat: usize = input_shape.iter().product();
        reshape(x, &[batch, flat])
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let input_shape = self.common.input_shape.clone().ok_or_else(|| {
            GraphError::ConfigurationError("Flatten层反向前必须先构建".to_string())
        })?;
        let mut full = vec![dy.shape()[0]];
        full.extend_from_slice(&input_shape);
        Ok(vec![reshape(dy, &full)?])
    }

    fn output_shape(&self) -> Vec<usize> {
        let flat: usize = self
            .common
            .input_shape
            .as_deref()
            .unwrap_or_default()
            .iter()
            .product();
        vec![flat]
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::Flatten {
            input_shape: self.common.input_shape.clone(),
        }
    }
}

/// 把单样本重塑为指定形状（元素总数必须一致）
#[derive(Debug, Clone)]
pub struct Reshape {
    common: LayerCommon,
    shape: Vec<usize>,
}

impl Reshape {
    /// # 参数
    /// - `shape`: 目标单样本形状（不含批维）
    pub fn new(shape: &[usize]) -> Self {
        Self {
            common: LayerCommon::default(),
            shape: shape.to_vec(),
        }
    }
}

impl TraitLayer for Reshape {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "Reshape"
    }

    fn build(&mut self, input_shape: &[usize], _rng: &mut StdRng) -> Result<(), GraphError> {
        // 元素总数必须守恒
        let in_size: usize = input_shape.iter().product();
        let out_size: usize = self.shape.iter().product();
        if in_size != out_size {
            return Err(GraphError::ShapeMismatch {
                expected: self.shape.clone(),
                got: input_shape.to_vec(),
                message: format!("Reshape层元素总数不一致：{in_size} vs {out_size}"),
            });
        }
        self.guard_build(input_shape)?;
        Ok(())
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("Reshape", xs)?;
        let input_shape = self.common.input_shape.clone().unwrap_or_default();
        check_sample_shape("Reshape", &input_shape, x)?;

        let mut full = vec![x.shape()[0]];
        full.extend_from_slice(&self.shape);
        reshape(x, &full)
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let input_shape = self.common.input_shape.clone().ok_or_else(|| {
            GraphError::ConfigurationError("Reshape层反向前必须先构建".to_string())
        })?;
        let mut full = vec![dy.shape()[0]];
        full.extend_from_slice(&input_shape);
        Ok(vec![reshape(dy, &full)?])
    }

    fn output_shape(&self) -> Vec<usize> {
        self.shape.clone()
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::Reshape {
            shape: self.shape.clone(),
            input_shape: self.common.input_shape.clone(),
        }
    }
}

/// 重塑助手：拷贝成标准布局后变形，失败归为形状错误
pub(crate) fn reshape(x: &ArrayD<f32>, shape: &[usize]) -> Result<ArrayD<f32>, GraphError> {
    x.as_standard_layout()
        .to_owned()
        .into_shape(IxDyn(shape))
        .map_err(|_| GraphError::ShapeMismatch {
            expected: shape.to_vec(),
            got: x.shape().to_vec(),
            message: "重塑失败：元素总数不一致".to_string(),
        })
}
