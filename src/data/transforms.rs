//! 数据变换函数
//!
//! 常用的数据预处理操作：归一化、one-hot 编码。

use ndarray::{ArrayD, IxDyn};

/// 把 0-255 像素值归一化到 0-1
pub fn normalize_pixels(x: &ArrayD<f32>) -> ArrayD<f32> {
    x / 255.0
}

/// 把类别索引转成 one-hot 编码，形状 [N, num_classes]
///
/// # 示例
/// ```ignore
/// let labels = [0u8, 2, 1];
/// let encoded = one_hot(&labels, 3);
/// // 结果: [[1,0,0], [0,0,1], [0,1,0]]
/// ```
pub fn one_hot(labels: &[u8], num_classes: usize) -> ArrayD<f32> {
    let n = labels.len();
    let mut data = vec![0.0f32; n * num_classes];
    for (i, &label) in labels.iter().enumerate() {
        let class_index = label as usize;
        if class_index < num_classes {
            data[i * num_classes + class_index] = 1.0;
        }
    }
    ArrayD::from_shape_vec(IxDyn(&[n, num_classes]), data).unwrap()
}
