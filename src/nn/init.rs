//! 参数初始化器：build 时按策略填充新分配的参数数据

use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// 初始化策略
///
/// `Xavier` / `He` 需要上一层的扇入（`fan_in`）做缩放，
/// 其余策略与形状之外的上下文无关。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Init {
    /// 全零
    Zeros,
    /// 全常数
    Constant { value: f32 },
    /// 正态分布 N(mean, std²)
    RandomNormal { mean: f32, std: f32 },
    /// 均匀分布 [min, max)
    RandomUniform { min: f32, max: f32 },
    /// Xavier/Glorot：N(0, 1/fan_in)
    Xavier,
    /// He/Kaiming：N(0, 2/fan_in)，适合 ReLU 族
    He,
}

impl Init {
    /// 按策略生成给定形状的参数数据
    ///
    /// # 参数
    /// - `shape`: 目标形状
    /// - `fan_in`: 上一层扇入（仅 Xavier/He 使用）
    /// - `rng`: 图持有的随机流（保证可重复性）
    pub fn init(&self, shape: &[usize], fan_in: usize, rng: &mut StdRng) -> ArrayD<f32> {
        let n: usize = shape.iter().product();
        let data: Vec<f32> = match self {
            Self::Zeros => vec![0.0; n],
            Self::Constant { value } => vec![*value; n],
            Self::RandomNormal { mean, std } => (0..n)
                .map(|_| {
                    let z: f32 = rng.sample(StandardNormal);
                    mean + std * z
                })
                .collect(),
            Self::RandomUniform { min, max } => (0..n).map(|_| rng.gen_range(*min..*max)).collect(),
            Self::Xavier => {
                let std = (1.0 / fan_in.max(1) as f32).sqrt();
                (0..n)
                    .map(|_| {
                        let z: f32 = rng.sample(StandardNormal);
                        std * z
                    })
                    .collect()
            }
            Self::He => {
                let std = (2.0 / fan_in.max(1) as f32).sqrt();
                (0..n)
                    .map(|_| {
                        let z: f32 = rng.sample(StandardNormal);
                        std * z
                    })
                    .collect()
            }
        };
        ArrayD::from_shape_vec(IxDyn(shape), data).unwrap()
    }
}

impl Default for Init {
    /// 默认与 Dense 层的传统初始化一致：小方差正态
    fn default() -> Self {
        Self::RandomNormal {
            mean: 0.0,
            std: 0.05,
        }
    }
}
