//! Conv2d 层测试：几何、已知小例、数值梯度

use super::check_layer_grad;
use crate::assert_err;
use crate::nn::layers::Conv2d;
use crate::nn::{GraphError, Init, Phase, TraitLayer};
use approx::assert_abs_diff_eq;
use ndarray::{ArrayD, IxDyn};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn arr(data: &[f32], shape: &[usize]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(IxDyn(shape), data.to_vec()).unwrap()
}

/// 输出几何：无填充 (H-kH)/sH+1，same 填充 ceil(H/sH)
#[test]
fn test_output_shape_geometry() {
    let mut rng = StdRng::seed_from_u64(0);

    let mut conv = Conv2d::new(8, (3, 3));
    conv.build(&[1, 28, 28], &mut rng).unwrap();
    assert_eq!(conv.output_shape(), vec![8, 26, 26]);

    let mut conv_same = Conv2d::new(8, (3, 3)).same_padding(true);
    conv_same.build(&[1, 28, 28], &mut rng).unwrap();
    assert_eq!(conv_same.output_shape(), vec![8, 28, 28]);

    let mut conv_stride = Conv2d::new(4, (2, 2)).stride((2, 2));
    conv_stride.build(&[3, 8, 8], &mut rng).unwrap();
    assert_eq!(conv_stride.output_shape(), vec![4, 4, 4]);
}

/// 形状不变式：forward 输出的单样本形状 == output_shape
#[test]
fn test_shape_invariant() {
    let mut conv = Conv2d::new(2, (3, 3)).same_padding(true);
    let mut rng = StdRng::seed_from_u64(3);
    conv.build(&[1, 5, 5], &mut rng).unwrap();

    let x = arr(&[0.1; 2 * 25], &[2, 1, 5, 5]);
    let y = conv.forward(&[&x], Phase::Train).unwrap();
    assert_eq!(&y.shape()[1..], conv.output_shape().as_slice());
    assert_eq!(y.shape(), &[2, 2, 5, 5]);
}

/// 已知小例：全 1 卷积核在 2x2 窗口上求和
#[test]
fn test_forward_known_values() {
    let mut conv = Conv2d::new(1, (2, 2))
        .weight_init(Init::Constant { value: 1.0 });
    let mut rng = StdRng::seed_from_u64(0);
    conv.build(&[1, 3, 3], &mut rng).unwrap();

    #[rustfmt::skip]
    let x = arr(&[
        1.0, 2.0, 3.0,
        4.0, 5.0, 6.0,
        7.0, 8.0, 9.0,
    ], &[1, 1, 3, 3]);
    let y = conv.forward(&[&x], Phase::Train).unwrap();

    assert_eq!(y.shape(), &[1, 1, 2, 2]);
    assert_abs_diff_eq!(y[[0, 0, 0, 0]], 12.0, epsilon = 1e-5);
    assert_abs_diff_eq!(y[[0, 0, 0, 1]], 16.0, epsilon = 1e-5);
    assert_abs_diff_eq!(y[[0, 0, 1, 0]], 24.0, epsilon = 1e-5);
    assert_abs_diff_eq!(y[[0, 0, 1, 1]], 28.0, epsilon = 1e-5);
}

/// 输入梯度须对上数值梯度（含 same 填充的对称剥除）
#[test]
fn test_input_gradient_matches_numeric() {
    let x = arr(
        &[
            0.5, -0.3, 0.8, 0.1, -0.6, 0.4, 0.9, -0.2, 0.7, -0.1, 0.3, 0.6, -0.8, 0.2, -0.4,
            0.55, -0.15, 0.35,
        ],
        &[1, 2, 3, 3],
    );

    let mut conv = Conv2d::new(2, (2, 2));
    let mut rng = StdRng::seed_from_u64(5);
    conv.build(&[2, 3, 3], &mut rng).unwrap();
    check_layer_grad(&mut conv, &x, 2e-2);

    let mut conv_same = Conv2d::new(2, (2, 2)).same_padding(true);
    let mut rng = StdRng::seed_from_u64(6);
    conv_same.build(&[2, 3, 3], &mut rng).unwrap();
    check_layer_grad(&mut conv_same, &x, 2e-2);
}

/// 非 [C, H, W] 输入要报维度错误
#[test]
fn test_requires_chw_input() {
    let mut conv = Conv2d::new(2, (3, 3));
    let mut rng = StdRng::seed_from_u64(0);
    let result = conv.build(&[9], &mut rng);
    assert_err!(result, GraphError::DimensionMismatch { expected: 3, .. });
}

/// 卷积核大于输入是无效操作
#[test]
fn test_kernel_larger_than_input() {
    let mut conv = Conv2d::new(2, (5, 5));
    let mut rng = StdRng::seed_from_u64(0);
    let result = conv.build(&[1, 3, 3], &mut rng);
    assert_err!(result, GraphError::InvalidOperation { .. });
}
