//! 优化器模块单元测试

use crate::nn::layers::Dense;
use crate::nn::optimizer::{
    AdaBound, AdaDelta, AdaGrad, Adam, Nesterov, OptimizerKind, RMSProp, RMSPropGraves, SGD,
    TraitOptimizer,
};
use crate::nn::{Graph, Init, LayerId, Phase, Tensor};
use approx::assert_abs_diff_eq;
use ndarray::{ArrayD, IxDyn};

fn arr(data: &[f32], shape: &[usize]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(IxDyn(shape), data.to_vec()).unwrap()
}

/// 搭一个单 Dense 的图：前向 + 反向 + 命名完毕，梯度已就位
fn prepared_graph() -> (Graph, LayerId, Vec<LayerId>) {
    let mut graph = Graph::with_seed(42);
    let dense = graph.add_layer(
        Dense::new(2)
            .weight_init(Init::Constant { value: 1.0 })
            .bias_init(Init::Zeros),
    );

    graph.begin_pass();
    let x = Tensor::new(arr(&[1.0, 2.0], &[1, 2]));
    let y = graph.call(dense, &x, Phase::Train).unwrap();
    let order = graph.flatten_and_cache(&y).unwrap();
    graph.assign_names(&order).unwrap();
    graph
        .backward(&y, ArrayD::ones(y.value().raw_dim()))
        .unwrap();
    (graph, dense, order)
}

fn weight_data(graph: &Graph, dense: LayerId) -> ArrayD<f32> {
    use crate::nn::TraitLayer;
    graph
        .layer(dense)
        .unwrap()
        .param_refs()
        .into_iter()
        .find(|(key, _)| *key == "weight")
        .map(|(_, param)| param.data().clone())
        .unwrap()
}

fn weight_grad_is_reset(graph: &Graph, dense: LayerId) -> bool {
    use crate::nn::TraitLayer;
    graph
        .layer(dense)
        .unwrap()
        .param_refs()
        .into_iter()
        .all(|(_, param)| param.grad().is_none())
}

/// 朴素 SGD 一步：w ← w - lr·grad；更新后梯度重置为零哨兵
#[test]
fn test_sgd_step_and_grad_reset() {
    let (mut graph, dense, order) = prepared_graph();
    // dW = xᵀ·dy：x=[1,2]，dy=[1,1] → dW = [[1,1],[2,2]]
    let mut sgd = SGD::with_config(0.1, 0.0);
    sgd.update(&mut graph, &order).unwrap();

    let w = weight_data(&graph, dense);
    assert_abs_diff_eq!(w[[0, 0]], 0.9, epsilon = 1e-6);
    assert_abs_diff_eq!(w[[1, 0]], 0.8, epsilon = 1e-6);
    assert!(weight_grad_is_reset(&graph, dense));
}

/// 零梯度哨兵下优化器必须是空操作
#[test]
fn test_noop_on_zero_grad() {
    let mut graph = Graph::with_seed(42);
    let dense = graph.add_layer(Dense::new(2));

    graph.begin_pass();
    let x = Tensor::new(arr(&[1.0, 2.0], &[1, 2]));
    let y = graph.call(dense, &x, Phase::Train).unwrap();
    let order = graph.flatten_and_cache(&y).unwrap();
    graph.assign_names(&order).unwrap();
    // 不跑反向：grad 全是零哨兵

    let before = weight_data(&graph, dense);
    let mut sgd = SGD::with_config(0.5, 0.9);
    sgd.update(&mut graph, &order).unwrap();
    let after = weight_data(&graph, dense);
    assert_eq!(before, after);
}

/// 动量：第二步的更新量里滚入第一步的速度
#[test]
fn test_sgd_momentum_accumulates() {
    let (mut graph, dense, order) = prepared_graph();
    let mut sgd = SGD::with_config(0.1, 0.9);
    sgd.update(&mut graph, &order).unwrap();
    let w1 = weight_data(&graph, dense);
    // 第一步：amount = 0.1*1 = 0.1（对 w[0][0]）
    assert_abs_diff_eq!(w1[[0, 0]], 0.9, epsilon = 1e-6);

    // 第二步：同样的梯度再来一遍
    graph.begin_pass();
    let x = Tensor::new(arr(&[1.0, 2.0], &[1, 2]));
    let y = graph.call(dense, &x, Phase::Train).unwrap();
    graph
        .backward(&y, ArrayD::ones(y.value().raw_dim()))
        .unwrap();
    sgd.update(&mut graph, &order).unwrap();
    let w2 = weight_data(&graph, dense);
    // 第二步：amount = 0.1*1 + 0.9*0.1 = 0.19
    assert_abs_diff_eq!(w2[[0, 0]], 0.9 - 0.19, epsilon = 1e-5);
}

/// 全局范数裁剪：超阈值时所有梯度等比缩小
#[test]
fn test_grad_clipping() {
    let (mut graph, dense, order) = prepared_graph();
    // 梯度 [[1,1],[2,2]] + bias [1,1] → 范数 = sqrt(1+1+4+4+1+1) = sqrt(12)
    let norm = 12.0f32.sqrt();
    let threshold = 1.0;
    let mut sgd = SGD::with_config(1.0, 0.0).clip_norm(threshold);
    sgd.update(&mut graph, &order).unwrap();

    let w = weight_data(&graph, dense);
    let rate = threshold / (norm + 1e-7);
    assert_abs_diff_eq!(w[[0, 0]], 1.0 - rate, epsilon = 1e-5);
    assert_abs_diff_eq!(w[[1, 0]], 1.0 - 2.0 * rate, epsilon = 1e-5);
}

/// Adam：时间步推进 + 首步更新幅度 ≈ α
#[test]
fn test_adam_first_step() {
    let (mut graph, dense, order) = prepared_graph();
    let mut adam = Adam::with_config(0.001, 0.9, 0.999, 1e-7);
    adam.update(&mut graph, &order).unwrap();
    assert_eq!(adam.status().step, 1);

    // 首步偏置校正后 m̂/√v̂ = grad/|grad| = 1，更新量 ≈ α
    let w = weight_data(&graph, dense);
    assert_abs_diff_eq!(w[[0, 0]], 1.0 - 0.001, epsilon = 1e-5);
    assert_abs_diff_eq!(w[[1, 0]], 1.0 - 0.001, epsilon = 1e-5);
}

/// 每个变体都能完成一步更新并重置梯度
#[test]
fn test_all_variants_step() {
    let optimizers: Vec<OptimizerKind> = vec![
        SGD::with_config(0.01, 0.9).into(),
        Nesterov::new().into(),
        AdaGrad::new().into(),
        RMSProp::new().into(),
        RMSPropGraves::new().into(),
        AdaDelta::new().into(),
        Adam::new().into(),
        AdaBound::new().into(),
    ];
    for mut optimizer in optimizers {
        let (mut graph, dense, order) = prepared_graph();
        let before = weight_data(&graph, dense);
        optimizer.update(&mut graph, &order).unwrap();
        let after = weight_data(&graph, dense);
        assert_ne!(before, after);
        assert!(weight_grad_is_reset(&graph, dense));
    }
}

/// 辅助状态导出/导入往返
#[test]
fn test_status_roundtrip() {
    let (mut graph, _dense, order) = prepared_graph();
    let mut adam = Adam::new();
    adam.update(&mut graph, &order).unwrap();

    let status = adam.status();
    assert_eq!(status.step, 1);
    assert!(status.buffers.contains_key("Dense_0__weight"));

    let mut restored = Adam::new();
    restored.load_status(status.clone());
    assert_eq!(restored.status(), status);
}
