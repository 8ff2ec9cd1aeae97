//! 函数式图 API 端到端测试：双分支 + 合并层的完整训练步
//!
//! 结构：x ─ Dense_a ─┐
//!                    Mul ─ Dense_out
//!      x ─ Dense_b ─┘
//! 手动编排 begin_pass → call/call_merged → 扁平化 → 命名 → 反向 → 更新。

use lamina::nn::layers::{Dense, Mul, Sigmoid};
use lamina::nn::optimizer::{Adam, TraitOptimizer};
use lamina::nn::{Graph, GraphError, LossKind, Phase, Tensor};
use ndarray::{ArrayD, IxDyn};

fn arr(data: &[f32], shape: &[usize]) -> ArrayD<f32> {
    ArrayD::from_shape_vec(IxDyn(shape), data.to_vec()).unwrap()
}

#[test]
fn test_two_branch_training_step() -> Result<(), GraphError> {
    let mut graph = Graph::with_seed(7);
    let branch_a = graph.add_layer(Dense::new(4));
    let branch_b = graph.add_layer(Dense::new(4));
    let gate = graph.add_layer(Sigmoid::new());
    let mul = graph.add_layer(Mul::new());
    let head = graph.add_layer(Dense::new(1));

    let x = Tensor::new(arr(&[0.5, -1.0, 1.5, 0.25, 0.75, -0.5], &[3, 2]));
    let target = arr(&[1.0, 0.0, 0.5], &[3, 1]);
    let loss = LossKind::MeanSquaredError;
    let mut optimizer = Adam::new();

    let mut losses = Vec::new();
    for _ in 0..50 {
        // 1. 前向：两条分支汇入 Mul，再过输出头
        graph.begin_pass();
        let a = graph.call(branch_a, &x, Phase::Train)?;
        let b = graph.call(branch_b, &x, Phase::Train)?;
        let gated = graph.call(gate, &b, Phase::Train)?;
        let merged = graph.call_merged(mul, &a, &gated, Phase::Train)?;
        let out = graph.call(head, &merged, Phase::Train)?;

        // 2. 扁平化 + 命名（首轮生效，其后幂等）
        let order = graph.flatten_and_cache(&out)?;
        graph.assign_names(&order)?;

        // 3. 损失 → 反向 → 更新
        losses.push(loss.loss(out.value(), &target, &graph, &order)?);
        let dy = loss.backward_grad(out.value(), &target)?;
        graph.backward(&out, dy)?;
        optimizer.update(&mut graph, &order)?;
    }

    // 扁平列表包含全部 5 个层
    assert_eq!(graph.ordered_layers()?.len(), 5);

    // 训练让损失下降
    let first = losses.first().copied().unwrap();
    let last = losses.last().copied().unwrap();
    assert!(last < first, "损失应当下降：{first} → {last}");
    Ok(())
}
