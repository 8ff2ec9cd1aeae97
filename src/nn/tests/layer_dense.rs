//! Dense 层测试：形状不变式、参数梯度、构建错误

use super::check_layer_grad;
use crate::assert_err;
use crate::nn::layers::Dense;
use crate::nn::{GraphError, Init, Phase, TraitLayer};
use approx::assert_abs_diff_eq;
use ndarray::{ArrayD, IxDyn};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn arr(data: &[f32], shape: &[usize]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(IxDyn(shape), data.to_vec()).unwrap()
}

/// 形状不变式：forward(x).shape[1..] == output_shape(input_shape)
#[test]
fn test_shape_invariant() {
    let mut dense = Dense::new(5);
    let mut rng = StdRng::seed_from_u64(7);
    dense.build(&[3], &mut rng).unwrap();

    let x = arr(&[0.1; 6], &[2, 3]);
    let y = dense.forward(&[&x], Phase::Train).unwrap();
    assert_eq!(&y.shape()[1..], dense.output_shape().as_slice());
    assert_eq!(y.shape(), &[2, 5]);
}

/// 多维输入要报维度错误
#[test]
fn test_requires_flat_input() {
    let mut dense = Dense::new(5);
    let mut rng = StdRng::seed_from_u64(7);
    let result = dense.build(&[2, 3], &mut rng);
    assert_err!(result, GraphError::DimensionMismatch { expected: 1, .. });
}

/// 已知小例：权重常数 1、偏置 0 时 y = 行和
#[test]
fn test_forward_known_values() {
    let mut dense = Dense::new(2)
        .weight_init(Init::Constant { value: 1.0 })
        .bias_init(Init::Zeros);
    let mut rng = StdRng::seed_from_u64(7);
    dense.build(&[3], &mut rng).unwrap();

    let x = arr(&[1.0, 2.0, 3.0, -1.0, 0.0, 1.0], &[2, 3]);
    let y = dense.forward(&[&x], Phase::Train).unwrap();
    assert_abs_diff_eq!(y[[0, 0]], 6.0, epsilon = 1e-6);
    assert_abs_diff_eq!(y[[0, 1]], 6.0, epsilon = 1e-6);
    assert_abs_diff_eq!(y[[1, 0]], 0.0, epsilon = 1e-6);
}

/// 输入梯度须对上数值梯度
#[test]
fn test_input_gradient_matches_numeric() {
    let mut dense = Dense::new(4);
    let mut rng = StdRng::seed_from_u64(11);
    dense.build(&[3], &mut rng).unwrap();

    let x = arr(&[0.3, -0.7, 1.1, 0.9, 0.2, -1.3], &[2, 3]);
    check_layer_grad(&mut dense, &x, 1e-2);
}

/// 参数梯度的解析式：dW = xᵀ·dy，db = Σ行 dy
#[test]
fn test_param_gradients() {
    let mut dense = Dense::new(2)
        .weight_init(Init::Constant { value: 0.5 })
        .bias_init(Init::Zeros);
    let mut rng = StdRng::seed_from_u64(7);
    dense.build(&[2], &mut rng).unwrap();

    let x = arr(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
    dense.forward(&[&x], Phase::Train).unwrap();
    dense
        .backward(&arr(&[1.0, 0.0, 0.0, 1.0], &[2, 2]))
        .unwrap();

    let entries = dense.param_entries();
    let (_, weight) = entries
        .iter()
        .find(|(key, _)| *key == "weight")
        .unwrap();
    let dw = weight.grad().unwrap();
    // dW = xᵀ·dy = [[1,3],[2,4]]·... 手算：[[1, 3], [2, 4]]
    assert_abs_diff_eq!(dw[[0, 0]], 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(dw[[0, 1]], 3.0, epsilon = 1e-6);
    assert_abs_diff_eq!(dw[[1, 0]], 2.0, epsilon = 1e-6);
    assert_abs_diff_eq!(dw[[1, 1]], 4.0, epsilon = 1e-6);

    let (_, bias) = entries.iter().find(|(key, _)| *key == "bias").unwrap();
    let db = bias.grad().unwrap();
    assert_abs_diff_eq!(db[[0]], 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(db[[1]], 1.0, epsilon = 1e-6);
}

/// use_bias(false) 时没有偏置参数
#[test]
fn test_without_bias() {
    let mut dense = Dense::new(3).use_bias(false);
    let mut rng = StdRng::seed_from_u64(7);
    dense.build(&[2], &mut rng).unwrap();
    assert_eq!(dense.param_refs().len(), 1);
}
