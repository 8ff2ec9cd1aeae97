//! DataLoader 单元测试

use crate::data::DataLoader;
use ndarray::{ArrayD, IxDyn};

fn samples(n: usize) -> (ArrayD<f32>, ArrayD<f32>) {
    let x: Vec<f32> = (0..n).map(|i| i as f32).collect();
    let y: Vec<f32> = (0..n).map(|i| i as f32 * 10.0).collect();
    (
        ArrayD::from_shape_vec(IxDyn(&[n, 1]), x).unwrap(),
        ArrayD::from_shape_vec(IxDyn(&[n, 1]), y).unwrap(),
    )
}

/// 10 个样本、批大小 7、非随机：第一批是 0..=6，第二批环绕前吐出 7,8,9
#[test]
fn test_wrap_with_short_tail() {
    let (x, y) = samples(10);
    let mut loader = DataLoader::new(x, y, 7);
    assert_eq!(loader.num_batches(), 2);

    let (xb, yb, index) = loader.next_batch();
    assert_eq!(index, 0);
    assert_eq!(xb.shape(), &[7, 1]);
    for i in 0..7 {
        assert_eq!(xb[[i, 0]], i as f32);
        assert_eq!(yb[[i, 0]], i as f32 * 10.0);
    }

    let (xb, _yb, index) = loader.next_batch();
    assert_eq!(index, 1);
    assert_eq!(xb.shape(), &[3, 1]);
    assert_eq!(xb[[0, 0]], 7.0);
    assert_eq!(xb[[1, 0]], 8.0);
    assert_eq!(xb[[2, 0]], 9.0);

    // 环绕：下一批又从头开始
    let (xb, _yb, index) = loader.next_batch();
    assert_eq!(index, 2);
    assert_eq!(xb.shape(), &[7, 1]);
    assert_eq!(xb[[0, 0]], 0.0);
}

/// 随机模式：同种子顺序可复现，且每轮覆盖全部样本
#[test]
fn test_random_reproducible_and_complete() {
    let (x, y) = samples(8);
    let mut loader1 = DataLoader::new(x.clone(), y.clone(), 3).random(true).seed(42);
    let mut loader2 = DataLoader::new(x, y, 3).random(true).seed(42);

    let mut seen = Vec::new();
    for _ in 0..loader1.num_batches() {
        let (xb1, _, _) = loader1.next_batch();
        let (xb2, _, _) = loader2.next_batch();
        assert_eq!(xb1, xb2);
        seen.extend(xb1.iter().copied());
    }
    seen.sort_by(f32::total_cmp);
    assert_eq!(seen, (0..8).map(|i| i as f32).collect::<Vec<_>>());
}

/// reset 重启游标
#[test]
fn test_reset() {
    let (x, y) = samples(5);
    let mut loader = DataLoader::new(x, y, 2);
    loader.next_batch();
    loader.next_batch();
    loader.reset();
    let (xb, _, index) = loader.next_batch();
    assert_eq!(index, 0);
    assert_eq!(xb[[0, 0]], 0.0);
}

/// 批大小为 0 直接 panic
#[test]
#[should_panic(expected = "batch_size 必须大于 0")]
fn test_zero_batch_size_panics() {
    let (x, y) = samples(4);
    let _ = DataLoader::new(x, y, 0);
}

/// 样本数不一致直接 panic
#[test]
#[should_panic(expected = "样本数必须一致")]
fn test_mismatched_len_panics() {
    let (x, _) = samples(4);
    let (_, y) = samples(5);
    let _ = DataLoader::new(x, y, 2);
}
