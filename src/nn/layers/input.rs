//! 输入层：声明网络入口的单样本形状，并校验喂入的数据

use super::{LayerCommon, TraitLayer, check_sample_shape, expect_single};
use crate::nn::model_io::LayerDescriptor;
use crate::nn::{GraphError, Phase};
use ndarray::ArrayD;
use rand::rngs::StdRng;

/// 输入层
///
/// 不做任何计算，只把声明形状与实际数据核对一遍；
/// 形状不一致是硬错误（fail fast）。
#[derive(Debug, Clone)]
pub struct Input {
    common: LayerCommon,
    shape: Vec<usize>,
}

impl Input {
    /// # 参数
    /// - `shape`: 单样本形状（不含批维），如 `[784]` 或 `[1, 28, 28]`
    pub fn new(shape: &[usize]) -> Self {
        Self {
            common: LayerCommon::default(),
            shape: shape.to_vec(),
        }
    }
}

impl TraitLayer for Input {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "Input"
    }

    fn build(&mut self, input_shape: &[usize], _rng: &mut StdRng) -> Result<(), GraphError> {
        // 声明形状优先：构建形状必须与声明一致
        if input_shape != self.shape.as_slice() {
            return Err(GraphError::ShapeMismatch {
                expected: self.shape.clone(),
                got: input_shape.to_vec(),
                message: "Input层收到的数据形状与声明形状不一致".to_string(),
            });
        }
        self.guard_build(input_shape)?;
        Ok(())
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("Input", xs)?;
        check_sample_shape("Input", &self.shape, x)?;
        Ok(x.clone())
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        // 恒等层：梯度原样传回
        Ok(vec![dy.clone()])
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::Input {
            shape: self.shape.clone(),
            input_shape: self.common.input_shape.clone(),
        }
    }
}
