mod init;
mod layer_batch_norm;
mod layer_conv2d;
mod layer_dense;
mod layer_dropout;
mod merge;
mod model;
mod optimizer;

use crate::nn::{Phase, TraitLayer};
use ndarray::ArrayD;

/// 对标量函数 f 在 x 处做中心差分数值梯度
pub(crate) fn numeric_grad(
    mut f: impl FnMut(&ArrayD<f32>) -> f32,
    x: &ArrayD<f32>,
    eps: f32,
) -> ArrayD<f32> {
    let mut grad = ArrayD::zeros(x.raw_dim());
    for index in 0..x.len() {
        let mut plus = x.clone();
        let mut minus = x.clone();
        plus.as_slice_mut().unwrap()[index] += eps;
        minus.as_slice_mut().unwrap()[index] -= eps;
        grad.as_slice_mut().unwrap()[index] = (f(&plus) - f(&minus)) / (2.0 * eps);
    }
    grad
}

/// 核心回归性质：层的解析反向须与 sum(forward(x)) 的数值梯度吻合
///
/// 上游梯度取全 1，层最后再对原 x 前向一次让缓存对上，随后反向。
pub(crate) fn check_layer_grad<L: TraitLayer>(layer: &mut L, x: &ArrayD<f32>, tolerance: f32) {
    let eps = 1e-2;
    let numeric = numeric_grad(
        |probe| layer.forward(&[probe], Phase::Train).unwrap().sum(),
        x,
        eps,
    );

    let y = layer.forward(&[x], Phase::Train).unwrap();
    let analytic = layer.backward(&ArrayD::ones(y.raw_dim())).unwrap();
    let analytic = &analytic[0];

    assert_eq!(analytic.shape(), numeric.shape());
    for (a, n) in analytic.iter().zip(numeric.iter()) {
        assert!(
            (a - n).abs() <= tolerance,
            "解析梯度{a}与数值梯度{n}偏差超过{tolerance}"
        );
    }
}
