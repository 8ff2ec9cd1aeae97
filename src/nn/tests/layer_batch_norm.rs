//! BatchNorm 层测试：批统计量、滑动统计量、完整反向

use crate::nn::layers::BatchNorm;
use crate::nn::{Phase, TraitLayer};
use approx::assert_abs_diff_eq;
use ndarray::{ArrayD, Axis, IxDyn};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn arr(data: &[f32], shape: &[usize]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(IxDyn(shape), data.to_vec()).unwrap()
}

/// 训练模式：输出逐特征近似零均值、单位方差
#[test]
fn test_train_normalizes_batch() {
    let mut bn = BatchNorm::new();
    let mut rng = StdRng::seed_from_u64(0);
    bn.build(&[2], &mut rng).unwrap();

    let x = arr(&[1.0, 10.0, 2.0, 20.0, 3.0, 30.0, 4.0, 40.0], &[4, 2]);
    let y = bn.forward(&[&x], Phase::Train).unwrap();

    let mean = y.mean_axis(Axis(0)).unwrap();
    assert_abs_diff_eq!(mean[[0]], 0.0, epsilon = 1e-5);
    assert_abs_diff_eq!(mean[[1]], 0.0, epsilon = 1e-5);
    let var = y.mapv(|v| v * v).mean_axis(Axis(0)).unwrap();
    assert_abs_diff_eq!(var[[0]], 1.0, epsilon = 1e-3);
    assert_abs_diff_eq!(var[[1]], 1.0, epsilon = 1e-3);
}

/// 推理模式用滑动统计量，且不再采集新统计
#[test]
fn test_eval_uses_running_stats() {
    let mut bn = BatchNorm::with_config(0.0, 1e-7); // momentum=0：滑动统计量一步吃满批统计
    let mut rng = StdRng::seed_from_u64(0);
    bn.build(&[1], &mut rng).unwrap();

    let x = arr(&[1.0, 2.0, 3.0, 4.0], &[4, 1]);
    bn.forward(&[&x], Phase::Train).unwrap();

    // 此时 running_mean=2.5、running_var=1.25；换一批数据走推理
    let x_eval = arr(&[2.5, 2.5], &[2, 1]);
    let y = bn.forward(&[&x_eval], Phase::Eval).unwrap();
    assert_abs_diff_eq!(y[[0, 0]], 0.0, epsilon = 1e-4);
    assert_abs_diff_eq!(y[[1, 0]], 0.0, epsilon = 1e-4);

    // 推理不应更新滑动统计量
    let running_mean = bn
        .param_refs()
        .into_iter()
        .find(|(key, _)| *key == "running_mean")
        .map(|(_, param)| param.data().clone())
        .unwrap();
    assert_abs_diff_eq!(running_mean[[0]], 2.5, epsilon = 1e-5);
}

/// 完整反向（穿透均值/方差）须对上数值梯度
///
/// 上游梯度取一组互不相同的权重——全 1 的上游梯度下归一化输出的
/// 和恒为零，数值梯度会退化成平凡的零，验证不到什么。
#[test]
fn test_input_gradient_matches_numeric() {
    let mut bn = BatchNorm::new();
    let mut rng = StdRng::seed_from_u64(0);
    bn.build(&[3], &mut rng).unwrap();

    let x = arr(
        &[0.5, -1.2, 0.8, 1.5, 0.3, -0.7, -0.9, 2.0, 0.1, 0.2, -0.4, 1.1],
        &[4, 3],
    );
    let upstream = arr(
        &[1.0, -0.5, 0.3, 0.7, 2.0, -1.1, 0.2, 0.9, -0.8, 1.5, -0.3, 0.4],
        &[4, 3],
    );

    // 数值梯度的每次探针前向都会更新滑动统计量，但训练前向的输出
    // 只依赖本批统计量，所以对照仍然成立
    let numeric = super::numeric_grad(
        |probe| {
            (&bn.forward(&[probe], Phase::Train).unwrap() * &upstream).sum()
        },
        &x,
        1e-2,
    );

    bn.forward(&[&x], Phase::Train).unwrap();
    let grads = bn.backward(&upstream).unwrap();
    for (a, n) in grads[0].iter().zip(numeric.iter()) {
        assert!(
            (a - n).abs() < 2e-2,
            "解析梯度{a}与数值梯度{n}偏差过大"
        );
    }
}

/// 滑动统计量参数永远收不到梯度（优化器自然跳过）
#[test]
fn test_running_stats_receive_no_grad() {
    let mut bn = BatchNorm::new();
    let mut rng = StdRng::seed_from_u64(0);
    bn.build(&[2], &mut rng).unwrap();

    let x = arr(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
    let y = bn.forward(&[&x], Phase::Train).unwrap();
    bn.backward(&ArrayD::ones(y.raw_dim())).unwrap();

    for (key, param) in bn.param_refs() {
        match key {
            "gamma" | "beta" => assert!(param.grad().is_some(), "{key} 应有梯度"),
            "running_mean" | "running_var" => {
                assert!(param.grad().is_none(), "{key} 不应有梯度");
            }
            _ => unreachable!(),
        }
    }
}
