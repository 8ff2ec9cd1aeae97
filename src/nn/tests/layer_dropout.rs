//! Dropout 层测试：种子可复现、掩码语义、推理缩放

use crate::nn::layers::Dropout;
use crate::nn::{Phase, TraitLayer};
use approx::assert_abs_diff_eq;
use ndarray::{ArrayD, IxDyn};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn arr(data: &[f32], shape: &[usize]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(IxDyn(shape), data.to_vec()).unwrap()
}

fn ones(shape: &[usize]) -> ArrayD<f32> {
    ArrayD::ones(IxDyn(shape))
}

fn build(layer: &mut Dropout, shape: &[usize]) {
    let mut rng = StdRng::seed_from_u64(0);
    layer.build(shape, &mut rng).unwrap();
}

/// 同种子的两个层抽出完全相同的掩码序列
#[test]
fn test_mask_reproducible_with_seed() {
    let mut dropout1 = Dropout::new(0.5, 123);
    let mut dropout2 = Dropout::new(0.5, 123);
    build(&mut dropout1, &[16]);
    build(&mut dropout2, &[16]);

    let x = ones(&[4, 16]);
    for _ in 0..3 {
        let y1 = dropout1.forward(&[&x], Phase::Train).unwrap();
        let y2 = dropout2.forward(&[&x], Phase::Train).unwrap();
        assert_eq!(y1, y2);
    }
}

/// 训练输出只有 0 和原值两种；反向在掩码为零处掐断梯度
#[test]
fn test_mask_semantics() {
    let mut dropout = Dropout::new(0.4, 7);
    build(&mut dropout, &[32]);

    let x = arr(&[2.0; 64], &[2, 32]);
    let y = dropout.forward(&[&x], Phase::Train).unwrap();
    for &v in y.iter() {
        assert!(v == 0.0 || v == 2.0);
    }

    let grads = dropout.backward(&ones(&[2, 32])).unwrap();
    for (g, &v) in grads[0].iter().zip(y.iter()) {
        if v == 0.0 {
            assert_abs_diff_eq!(*g, 0.0);
        } else {
            assert_abs_diff_eq!(*g, 1.0);
        }
    }
}

/// 推理：use_scale 时乘 (1 - ratio) 以对齐训练期望，否则原样直通
#[test]
fn test_eval_scaling() {
    let x = arr(&[1.0, 2.0, 3.0, 4.0], &[1, 4]);

    let mut scaled = Dropout::new(0.25, 1);
    build(&mut scaled, &[4]);
    let y = scaled.forward(&[&x], Phase::Eval).unwrap();
    assert_abs_diff_eq!(y[[0, 0]], 0.75, epsilon = 1e-6);
    assert_abs_diff_eq!(y[[0, 3]], 3.0, epsilon = 1e-6);

    let mut passthrough = Dropout::new(0.25, 1).use_scale(false);
    build(&mut passthrough, &[4]);
    let y = passthrough.forward(&[&x], Phase::Eval).unwrap();
    assert_eq!(y, x);
}

/// 推理模式不消耗随机流：夹在中间的 Eval 前向不改变后续掩码序列
#[test]
fn test_eval_does_not_consume_stream() {
    let mut with_eval = Dropout::new(0.5, 99);
    let mut without_eval = Dropout::new(0.5, 99);
    build(&mut with_eval, &[8]);
    build(&mut without_eval, &[8]);

    let x = ones(&[2, 8]);
    let first1 = with_eval.forward(&[&x], Phase::Train).unwrap();
    let first2 = without_eval.forward(&[&x], Phase::Train).unwrap();
    assert_eq!(first1, first2);

    with_eval.forward(&[&x], Phase::Eval).unwrap();

    let second1 = with_eval.forward(&[&x], Phase::Train).unwrap();
    let second2 = without_eval.forward(&[&x], Phase::Train).unwrap();
    assert_eq!(second1, second2);
}
