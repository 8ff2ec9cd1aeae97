//! 初始化器测试

use crate::nn::Init;
use approx::assert_abs_diff_eq;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Zeros / Constant 填充确定值
#[test]
fn test_deterministic_fills() {
    let mut rng = StdRng::seed_from_u64(0);

    let zeros = Init::Zeros.init(&[2, 3], 2, &mut rng);
    assert_eq!(zeros.shape(), &[2, 3]);
    assert!(zeros.iter().all(|&v| v == 0.0));

    let constant = Init::Constant { value: 0.5 }.init(&[4], 4, &mut rng);
    assert!(constant.iter().all(|&v| v == 0.5));
}

/// 同种子同序列：随机初始化可复现
#[test]
fn test_seeded_reproducibility() {
    let init = Init::RandomNormal {
        mean: 0.0,
        std: 1.0,
    };
    let a = init.init(&[16], 16, &mut StdRng::seed_from_u64(42));
    let b = init.init(&[16], 16, &mut StdRng::seed_from_u64(42));
    assert_eq!(a, b);
}

/// 均匀分布落在区间内
#[test]
fn test_uniform_range() {
    let mut rng = StdRng::seed_from_u64(7);
    let uniform = Init::RandomUniform {
        min: -0.25,
        max: 0.25,
    }
    .init(&[256], 256, &mut rng);
    assert!(uniform.iter().all(|&v| (-0.25..0.25).contains(&v)));
}

/// Xavier / He 的经验标准差随扇入缩放
#[test]
fn test_fan_in_scaling() {
    let mut rng = StdRng::seed_from_u64(3);
    let n = 4096;

    let xavier = Init::Xavier.init(&[n], 100, &mut rng);
    let xavier_std = (xavier.mapv(|v| v * v).sum() / n as f32).sqrt();
    assert_abs_diff_eq!(xavier_std, 0.1, epsilon = 0.01);

    let he = Init::He.init(&[n], 100, &mut rng);
    let he_std = (he.mapv(|v| v * v).sum() / n as f32).sqrt();
    assert_abs_diff_eq!(he_std, (2.0f32 / 100.0).sqrt(), epsilon = 0.015);
}
