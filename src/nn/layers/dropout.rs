//! Dropout 层：训练时按比例随机置零，推理时直通（或按期望缩放）

use super::{LayerCommon, TraitLayer, expect_single};
use crate::nn::model_io::LayerDescriptor;
use crate::nn::{GraphError, Phase};
use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Dropout 层
///
/// 掩码来自层私有的随机流（构造时一次性播种，给定种子即可复现）。
/// 推理行为必须与训练期望严格对上：`use_scale` 为真时训练直出、推理乘
/// `(1 - ratio)`；为假时训练推理都直出（调用方自行处理期望差）。
#[derive(Debug, Clone)]
pub struct Dropout {
    common: LayerCommon,
    ratio: f32,
    seed: u64,
    use_scale: bool,
    rng: StdRng,
    /// 本步采样的 0/1 掩码（反向置零对应梯度项）
    mask: Option<ArrayD<f32>>,
}

impl Dropout {
    /// # 参数
    /// - `ratio`: 置零比例，取值 [0, 1)
    /// - `seed`: 层私有随机流的种子
    pub fn new(ratio: f32, seed: u64) -> Self {
        Self {
            common: LayerCommon::default(),
            ratio,
            seed,
            use_scale: true,
            rng: StdRng::seed_from_u64(seed),
            mask: None,
        }
    }

    /// 链式配置：推理时是否乘 `(1 - ratio)` 校正期望
    pub fn use_scale(mut self, use_scale: bool) -> Self {
        self.use_scale = use_scale;
        self
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }
}

impl TraitLayer for Dropout {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "Dropout"
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("Dropout", xs)?;
        match phase {
            Phase::Train => {
                // 每次前向各抽一张伯努利掩码
                let ratio = self.ratio;
                let rng = &mut self.rng;
                let mask = x.mapv(|_| if rng.gen_range(0.0..1.0f32) < ratio {
                    0.0
                } else {
                    1.0
                });
                let y = x * &mask;
                self.mask = Some(mask);
                Ok(y)
            }
            Phase::Eval => {
                if self.use_scale {
                    Ok(x * (1.0 - self.ratio))
                } else {
                    Ok(x.clone())
                }
            }
        }
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let mask = self.mask.as_ref().ok_or_else(|| {
            GraphError::ConfigurationError("Dropout层反向前必须先执行训练模式前向".to_string())
        })?;
        Ok(vec![dy * mask])
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::Dropout {
            ratio: self.ratio,
            seed: self.seed,
            use_scale: self.use_scale,
            input_shape: self.common.input_shape.clone(),
        }
    }
}
