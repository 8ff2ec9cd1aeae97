//! Sequential 模型测试：编排、配置错误、评估策略

use crate::assert_err;
use crate::nn::layers::{Dense, Input, ReLU, Sigmoid};
use crate::nn::optimizer::SGD;
use crate::nn::{GraphError, LossKind, Phase, Sequential};
use ndarray::{ArrayD, IxDyn};

fn arr(data: &[f32], shape: &[usize]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(IxDyn(shape), data.to_vec()).unwrap()
}

/// 空模型不能前向
#[test]
fn test_forward_requires_layers() {
    let mut model = Sequential::new();
    let result = model.forward(&arr(&[1.0], &[1, 1]), Phase::Train);
    assert_err!(result, GraphError::ConfigurationError { .. });
}

/// setup 之前不能训练
#[test]
fn test_train_requires_setup() {
    let mut model = Sequential::with_seed(1);
    model.push(Dense::new(2));
    let x = arr(&[1.0, 2.0], &[1, 2]);
    let y = arr(&[1.0, 0.0], &[1, 2]);
    assert_err!(
        model.train_on_batch(&x, &y),
        GraphError::ConfigurationError { .. }
    );
}

/// 前向之前不能查询层列表
#[test]
fn test_layers_requires_forward() {
    let mut model = Sequential::with_seed(1);
    model.push(Dense::new(2));
    assert_err!(model.layers(), GraphError::ConfigurationError { .. });
}

/// 形状沿层栈正确流动
#[test]
fn test_forward_shape_flow() {
    let mut model = Sequential::with_seed(7);
    model.push(Input::new(&[4]));
    model.push(Dense::new(8));
    model.push(ReLU::new());
    model.push(Dense::new(3));

    let x = arr(&[0.5; 8], &[2, 4]);
    let y = model.forward(&x, Phase::Train).unwrap();
    assert_eq!(y.shape(), &[2, 3]);
    assert_eq!(model.layers().unwrap().len(), 4);
}

/// train_on_batch 让线性回归的损失单调下降
#[test]
fn test_train_on_batch_decreases_loss() {
    let mut model = Sequential::with_seed(42);
    model.push(Dense::new(1));
    model.setup(SGD::with_config(0.05, 0.0), LossKind::MeanSquaredError);

    let x = arr(&[1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.5, -0.5], &[4, 2]);
    let y = arr(&[1.0, -1.0, 0.5, 0.8], &[4, 1]);

    let first = model.train_on_batch(&x, &y).unwrap();
    let mut last = first;
    for _ in 0..10 {
        last = model.train_on_batch(&x, &y).unwrap();
    }
    assert!(
        last < first,
        "10步后损失应该下降：{first} → {last}"
    );
}

/// predict 不能动参数：两次推理结果一致，且训练后的梯度不残留
#[test]
fn test_predict_has_no_side_effects() {
    let mut model = Sequential::with_seed(3);
    model.push(Dense::new(2));
    model.push(Sigmoid::new());

    let x = arr(&[0.5, -0.5, 1.0, 2.0], &[2, 2]);
    let first = model.predict(&x).unwrap();
    let second = model.predict(&x).unwrap();
    assert_eq!(first, second);
}

/// predict1 补/剥批维
#[test]
fn test_predict1_shape() {
    let mut model = Sequential::with_seed(3);
    model.push(Dense::new(5));
    let y = model.predict1(&arr(&[1.0, 2.0, 3.0], &[3])).unwrap();
    assert_eq!(y.shape(), &[5]);
}

/// 单输出双阈值旧例：SigmoidCrossEntropy 按 0.5 分界，其它损失按符号分界
#[test]
fn test_binary_accuracy_dual_threshold() {
    // 直通模型：Input 层原样吐回输入
    let x = arr(&[0.3, -1.0], &[2, 1]);
    let y = arr(&[0.0, 1.0], &[2, 1]);

    let mut sigmoid_model = Sequential::new();
    sigmoid_model.push(Input::new(&[1]));
    sigmoid_model.setup(SGD::new(), LossKind::SigmoidCrossEntropy);
    // 阈值 0.5：0.3 与 0.0 同侧（对）；-1.0 与 1.0 异侧（错）
    let acc = sigmoid_model.accuracy(&x, &y).unwrap();
    assert!((acc - 0.5).abs() < 1e-6);

    let mut mse_model = Sequential::new();
    mse_model.push(Input::new(&[1]));
    mse_model.setup(SGD::new(), LossKind::MeanSquaredError);
    // 阈值 0：0.3 与 0.0 同侧（对）；-1.0 与 1.0 异侧（错）→ 同为 0.5？
    // 换目标验证差异：0.3 vs -1 在符号阈值下异侧，但在 0.5 阈值下同侧
    let y_sign = arr(&[-1.0, 1.0], &[2, 1]);
    let acc_mse = mse_model.accuracy(&x, &y_sign).unwrap();
    let acc_sigmoid = sigmoid_model.accuracy(&x, &y_sign).unwrap();
    assert!((acc_mse - 0.0).abs() < 1e-6);
    assert!((acc_sigmoid - 0.5).abs() < 1e-6);
}

/// 多分类 argmax 准确率
#[test]
fn test_multiclass_accuracy() {
    let mut model = Sequential::new();
    model.push(Input::new(&[3]));
    model.setup(SGD::new(), LossKind::SoftmaxCrossEntropy);

    let pred = arr(&[0.1, 0.8, 0.1, 0.7, 0.2, 0.1], &[2, 3]);
    let target = arr(&[0.0, 1.0, 0.0, 0.0, 0.0, 1.0], &[2, 3]);
    let acc = model.accuracy(&pred, &target).unwrap();
    assert!((acc - 0.5).abs() < 1e-6);
}

/// 完整训练循环跑通一轮（含环绕批迭代器）
#[test]
fn test_train_loop_runs() {
    let mut model = Sequential::with_seed(11);
    model.push(Dense::new(1));
    model.setup(SGD::with_config(0.01, 0.0), LossKind::MeanSquaredError);

    let x = arr(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0], &[10, 1]);
    let y = arr(&[0.2, 0.4, 0.6, 0.8, 1.0, 1.2, 1.4, 1.6, 1.8, 2.0], &[10, 1]);
    model.train(&x, &y, 2, 7, None, false).unwrap();
}
