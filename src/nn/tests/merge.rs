//! 合并层测试：Add / Mul / Concatenate 的双亲梯度

use crate::assert_err;
use crate::nn::layers::{Add, Concatenate, Mul};
use crate::nn::{GraphError, Phase, TraitLayer};
use ndarray::{ArrayD, IxDyn};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn arr(data: &[f32], shape: &[usize]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(IxDyn(shape), data.to_vec()).unwrap()
}

/// Add：两路梯度都是 dy
#[test]
fn test_add_forward_backward() {
    let mut add = Add::new();
    let mut rng = StdRng::seed_from_u64(0);
    add.build(&[3], &mut rng).unwrap();

    let x1 = arr(&[1.0, 2.0, 3.0], &[1, 3]);
    let x2 = arr(&[10.0, 20.0, 30.0], &[1, 3]);
    let y = add.forward(&[&x1, &x2], Phase::Train).unwrap();
    assert_eq!(y, arr(&[11.0, 22.0, 33.0], &[1, 3]));

    let dy = arr(&[0.5, 1.0, 1.5], &[1, 3]);
    let grads = add.backward(&dy).unwrap();
    assert_eq!(grads.len(), 2);
    assert_eq!(grads[0], dy);
    assert_eq!(grads[1], dy);
}

/// Mul：forward x1·x2，backward 上游梯度 dy 时返回 [dy·x2, dy·x1]
#[test]
fn test_mul_backward_is_crossed() {
    let mut mul = Mul::new();
    let mut rng = StdRng::seed_from_u64(0);
    mul.build(&[3], &mut rng).unwrap();

    let x1 = arr(&[2.0, 3.0, 4.0], &[1, 3]);
    let x2 = arr(&[5.0, 6.0, 7.0], &[1, 3]);
    let y = mul.forward(&[&x1, &x2], Phase::Train).unwrap();
    assert_eq!(y, arr(&[10.0, 18.0, 28.0], &[1, 3]));

    let dy = arr(&[1.0, 2.0, 3.0], &[1, 3]);
    let grads = mul.backward(&dy).unwrap();
    assert_eq!(grads.len(), 2);
    assert_eq!(grads[0], arr(&[5.0, 12.0, 21.0], &[1, 3])); // dy * x2
    assert_eq!(grads[1], arr(&[2.0, 6.0, 12.0], &[1, 3])); // dy * x1
}

/// Concatenate：按前向时第一个输入的宽度把 dy 劈回两段
#[test]
fn test_concatenate_split_backward() {
    let mut concat = Concatenate::new();
    let mut rng = StdRng::seed_from_u64(0);
    concat.build(&[2], &mut rng).unwrap();

    let x1 = arr(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
    let x2 = arr(&[5.0, 6.0, 7.0, 8.0, 9.0, 10.0], &[2, 3]);
    let y = concat.forward(&[&x1, &x2], Phase::Train).unwrap();
    assert_eq!(y.shape(), &[2, 5]);
    assert_eq!(y[[0, 0]], 1.0);
    assert_eq!(y[[0, 2]], 5.0);
    assert_eq!(y[[1, 4]], 10.0);

    let dy = arr(
        &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0],
        &[2, 5],
    );
    let grads = concat.backward(&dy).unwrap();
    assert_eq!(grads[0].shape(), &[2, 2]);
    assert_eq!(grads[1].shape(), &[2, 3]);
    assert_eq!(grads[0], arr(&[0.1, 0.2, 0.6, 0.7], &[2, 2]));
    assert_eq!(grads[1], arr(&[0.3, 0.4, 0.5, 0.8, 0.9, 1.0], &[2, 3]));
}

/// 输入数量与形状校验
#[test]
fn test_merge_validation() {
    let mut add = Add::new();
    let mut rng = StdRng::seed_from_u64(0);
    add.build(&[2], &mut rng).unwrap();

    let x = arr(&[1.0, 2.0], &[1, 2]);
    assert_err!(
        add.forward(&[&x], Phase::Train),
        GraphError::InvalidOperation { .. }
    );

    let mismatched = arr(&[1.0, 2.0, 3.0], &[1, 3]);
    assert_err!(
        add.forward(&[&x, &mismatched], Phase::Train),
        GraphError::ShapeMismatch { .. }
    );

    // 沿批维拼接不允许
    let mut concat = Concatenate::with_axis(0);
    assert_err!(
        concat.build(&[2], &mut rng),
        GraphError::InvalidOperation { .. }
    );
}
