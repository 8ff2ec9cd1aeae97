//! transforms 模块单元测试

use crate::data::transforms::{normalize_pixels, one_hot};
use approx::assert_abs_diff_eq;
use ndarray::{ArrayD, IxDyn};

#[test]
fn test_normalize_pixels() {
    let raw = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![0.0, 127.5, 255.0, 51.0]).unwrap();
    let normalized = normalize_pixels(&raw);
    assert_abs_diff_eq!(normalized[[0, 0]], 0.0);
    assert_abs_diff_eq!(normalized[[0, 1]], 0.5);
    assert_abs_diff_eq!(normalized[[1, 0]], 1.0);
    assert_abs_diff_eq!(normalized[[1, 1]], 0.2);
}

#[test]
fn test_one_hot() {
    let encoded = one_hot(&[0, 2, 1], 3);
    assert_eq!(encoded.shape(), &[3, 3]);
    assert_eq!(
        encoded,
        ArrayD::from_shape_vec(
            IxDyn(&[3, 3]),
            vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0]
        )
        .unwrap()
    );
}

/// 越界类别整行为零（防御脏标签）
#[test]
fn test_one_hot_out_of_range() {
    let encoded = one_hot(&[5], 3);
    assert_eq!(encoded.sum(), 0.0);
}
