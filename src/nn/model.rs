//! # 顺序模型（Sequential）
//!
//! 把层压成一摞，对外编排 前向 → 损失 → 反向 → 正则化反向 → 优化器更新
//! 的完整训练步。模型只保留本步最后一个张量的链接，层列表缓存随每次
//! 前向重建。

use super::error::GraphError;
use super::graph::{Graph, LayerId};
use super::layers::{LayerKind, TraitLayer};
use super::loss::LossKind;
use super::model_io::{ModelDescriptor, SavedParams, read_params_file, write_params_file};
use super::optimizer::{OptimizerKind, TraitOptimizer};
use super::tensor::Tensor;
use crate::data::DataLoader;
use crate::nn::Phase;
use ndarray::{ArrayD, Axis};
use std::collections::HashMap;
use std::path::Path;

/// 顺序模型：层栈 + 优化器 + 损失
#[derive(Debug)]
pub struct Sequential {
    graph: Graph,
    stack: Vec<LayerId>,
    optimizer: Option<OptimizerKind>,
    loss: Option<LossKind>,
    /// 最近一次前向的输出张量（持有本步图的根链接）
    last: Option<Tensor>,
}

impl Sequential {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            stack: Vec::new(),
            optimizer: None,
            loss: None,
            last: None,
        }
    }

    /// 带固定种子（参数初始化可复现）
    pub fn with_seed(seed: u64) -> Self {
        Self {
            graph: Graph::with_seed(seed),
            stack: Vec::new(),
            optimizer: None,
            loss: None,
            last: None,
        }
    }

    /// 压入一个层，返回其句柄
    pub fn push<L: Into<LayerKind>>(&mut self, layer: L) -> LayerId {
        let id = self.graph.add_layer(layer);
        self.stack.push(id);
        id
    }

    /// 配置优化器与损失（训练类方法的前置条件）
    pub fn setup<O: Into<OptimizerKind>>(&mut self, optimizer: O, loss: LossKind) {
        self.optimizer = Some(optimizer.into());
        self.loss = Some(loss);
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn loss_kind(&self) -> Option<LossKind> {
        self.loss
    }

    /// 扁平层序（至少一次前向之后才可查询）
    pub fn layers(&self) -> Result<&[LayerId], GraphError> {
        self.graph.ordered_layers()
    }

    // ==================== 前向 / 推理 ====================

    /// 前向传播：沿层栈折叠 `Graph::call`，随后扁平化 + 命名走查
    pub fn forward(&mut self, x: &ArrayD<f32>, phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        if self.stack.is_empty() {
            return Err(GraphError::ConfigurationError(
                "模型还没有任何层，无法前向传播".to_string(),
            ));
        }
        self.graph.begin_pass();
        let mut tensor = Tensor::new(x.clone());
        for id in self.stack.clone() {
            tensor = self.graph.call(id, &tensor, phase)?;
        }
        let order = self.graph.flatten_and_cache(&tensor)?;
        self.graph.assign_names(&order)?;

        let y = tensor.value().clone();
        self.last = Some(tensor);
        Ok(y)
    }

    /// 推理：不累积梯度、不动任何参数
    pub fn predict(&mut self, x: &ArrayD<f32>) -> Result<ArrayD<f32>, GraphError> {
        self.forward(x, Phase::Eval)
    }

    /// 单样本推理（补批维、推理、再剥批维）
    pub fn predict1(&mut self, x: &ArrayD<f32>) -> Result<ArrayD<f32>, GraphError> {
        let batched = x.clone().insert_axis(Axis(0));
        let y = self.predict(&batched)?;
        Ok(y.index_axis(Axis(0), 0).to_owned())
    }

    // ==================== 训练 ====================

    /// 单批训练：前向(Train) → 损失 → 损失反向 → 正则化反向 → 优化器更新
    ///
    /// 这一顺序是强制的（见损失模块），返回标量损失。
    pub fn train_on_batch(&mut self, x: &ArrayD<f32>, y: &ArrayD<f32>) -> Result<f32, GraphError> {
        let loss = self.loss.ok_or_else(|| {
            GraphError::ConfigurationError("train_on_batch之前必须先调用setup".to_string())
        })?;
        if self.optimizer.is_none() {
            return Err(GraphError::ConfigurationError(
                "train_on_batch之前必须先调用setup".to_string(),
            ));
        }

        // 1. 前向 + 损失（含正则化前向贡献）
        let pred = self.forward(x, Phase::Train)?;
        let order: Vec<LayerId> = self.graph.ordered_layers()?.to_vec();
        let loss_value = loss.loss(&pred, y, &self.graph, &order)?;

        // 2. 反向：损失梯度沿图回走，再叠正则化梯度
        let dy = loss.backward_grad(&pred, y)?;
        let last = self.last.clone().ok_or_else(|| {
            GraphError::ConfigurationError("前向传播尚未执行，无法反向".to_string())
        })?;
        self.graph.backward(&last, dy)?;
        loss.regularizers_backward(&mut self.graph, &order)?;

        // 3. 优化器消费梯度并重置
        self.optimizer
            .as_mut()
            .ok_or_else(|| GraphError::ConfigurationError("优化器未配置".to_string()))?
            .update(&mut self.graph, &order)?;

        Ok(loss_value)
    }

    /// 完整训练循环：逐轮遍历批迭代器
    ///
    /// 批内出现非有限损失时打印提示并提前返回——这是可恢复的发散信号，
    /// 不是错误；中止永远发生在批与批之间，参数状态保持一致。
    pub fn train(
        &mut self,
        x: &ArrayD<f32>,
        y: &ArrayD<f32>,
        epochs: usize,
        batch_size: usize,
        test: Option<(&ArrayD<f32>, &ArrayD<f32>)>,
        verbose: bool,
    ) -> Result<(), GraphError> {
        let mut loader = DataLoader::new(x.clone(), y.clone(), batch_size).random(true);
        let batches = loader.num_batches();

        for epoch in 1..=epochs {
            let mut epoch_loss = 0.0;
            for _ in 0..batches {
                let (xb, yb, _index) = loader.next_batch();
                let loss_value = self.train_on_batch(&xb, &yb)?;
                if !loss_value.is_finite() {
                    println!("[lamina] 第{epoch}轮出现非有限损失({loss_value})，训练提前终止");
                    return Ok(());
                }
                epoch_loss += loss_value;
            }
            if verbose {
                let mean_loss = epoch_loss / batches as f32;
                match test {
                    Some((tx, ty)) => {
                        let (acc, test_loss) = self.evaluate(tx, ty)?;
                        println!(
                            "[lamina] epoch {epoch}/{epochs} - loss {mean_loss:.6} - test_loss {test_loss:.6} - acc {acc:.4}"
                        );
                    }
                    None => println!("[lamina] epoch {epoch}/{epochs} - loss {mean_loss:.6}"),
                }
            }
        }
        Ok(())
    }

    // ==================== 评估 ====================

    /// 返回 (准确率, 损失)
    pub fn evaluate(
        &mut self,
        x: &ArrayD<f32>,
        y: &ArrayD<f32>,
    ) -> Result<(f32, f32), GraphError> {
        let loss = self.loss.ok_or_else(|| {
            GraphError::ConfigurationError("evaluate之前必须先调用setup".to_string())
        })?;
        let pred = self.predict(x)?;
        let order: Vec<LayerId> = self.graph.ordered_layers()?.to_vec();
        let loss_value = loss.loss(&pred, y, &self.graph, &order)?;
        Ok((self.accuracy_of(&pred, y)?, loss_value))
    }

    /// 准确率
    pub fn accuracy(&mut self, x: &ArrayD<f32>, y: &ArrayD<f32>) -> Result<f32, GraphError> {
        let pred = self.predict(x)?;
        self.accuracy_of(&pred, y)
    }

    /// 输出宽度为 1 时沿用双阈值旧例：SigmoidCrossEntropy 按 0.5 分界，
    /// 其余损失按符号（0 分界）。这只是对既有行为的保留，
    /// 对自定义的单输出损失未必成立，故不做泛化。
    fn accuracy_of(&self, pred: &ArrayD<f32>, target: &ArrayD<f32>) -> Result<f32, GraphError> {
        if pred.shape() != target.shape() {
            return Err(GraphError::ShapeMismatch {
                expected: target.shape().to_vec(),
                got: pred.shape().to_vec(),
                message: "预测与目标的形状必须一致".to_string(),
            });
        }
        let batch = pred.shape()[0];
        let width: usize = pred.shape()[1..].iter().product();
        let pred2 = pred
            .as_standard_layout()
            .to_owned()
            .into_shape((batch, width))
            .unwrap();
        let target2 = target
            .as_standard_layout()
            .to_owned()
            .into_shape((batch, width))
            .unwrap();

        let mut correct = 0usize;
        if width == 1 {
            let threshold = if matches!(self.loss, Some(LossKind::SigmoidCrossEntropy)) {
                0.5
            } else {
                0.0
            };
            for i in 0..batch {
                if (pred2[[i, 0]] >= threshold) == (target2[[i, 0]] >= threshold) {
                    correct += 1;
                }
            }
        } else {
            for i in 0..batch {
                let row_pred = pred2.row(i);
                let row_target = target2.row(i);
                let argmax = |row: ndarray::ArrayView1<f32>| {
                    let mut best = 0;
                    for (j, &v) in row.iter().enumerate() {
                        if v > row[best] {
                            best = j;
                        }
                    }
                    best
                };
                if argmax(row_pred) == argmax(row_target) {
                    correct += 1;
                }
            }
        }
        Ok(correct as f32 / batch as f32)
    }

    // ==================== 保存 / 加载 ====================

    /// 保存完整模型（拓扑 JSON + 参数 bin，优化器状态随参数文件）
    ///
    /// 自动生成两个文件：`{path}.json` 与 `{path}.bin`。
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<(), GraphError> {
        let path = path.as_ref();
        let named = self.graph.named_params();
        if named.is_empty() {
            return Err(GraphError::ConfigurationError(
                "保存前请先执行一次前向传播，参数要先有名字".to_string(),
            ));
        }
        let json_path = path.with_extension("json");
        let bin_path = path.with_extension("bin");

        // 1. 拓扑描述
        let mut layer_descriptors = Vec::with_capacity(self.stack.len());
        for id in &self.stack {
            layer_descriptors.push(self.graph.layer(*id)?.to_descriptor());
        }
        let mut descriptor = ModelDescriptor::new(layer_descriptors);
        descriptor.loss = self.loss;
        descriptor.optimizer = self.optimizer.as_ref().map(TraitOptimizer::to_descriptor);
        descriptor.params_file = Some(bin_path.file_name().map_or_else(
            || "params.bin".to_string(),
            |s| s.to_string_lossy().to_string(),
        ));
        std::fs::write(&json_path, descriptor.to_json()?)
            .map_err(|e| GraphError::ComputationError(format!("写入JSON文件失败: {e}")))?;

        // 2. 参数 + 优化器状态
        let params: HashMap<String, ArrayD<f32>> = named
            .into_iter()
            .map(|(name, param)| (name, param.data().clone()))
            .collect();
        let status = self.optimizer.as_ref().map(TraitOptimizer::status);
        write_params_file(&bin_path, &SavedParams { params, status })
    }

    /// 从 `{path}.json` + `{path}.bin` 重建完整模型
    ///
    /// 重建顺序：层（未构建）→ 按记录形状重放构建 → 命名走查 →
    /// 参数按名绑定 → 优化器状态恢复。
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self, GraphError> {
        let path = path.as_ref();
        let json_path = path.with_extension("json");

        // 1. 解析拓扑
        let json = std::fs::read_to_string(&json_path)
            .map_err(|e| GraphError::ComputationError(format!("读取JSON文件失败: {e}")))?;
        let descriptor = ModelDescriptor::from_json(&json)?;

        let mut model = Self::new();
        let mut build_shapes = Vec::with_capacity(descriptor.layers.len());
        for layer_descriptor in &descriptor.layers {
            build_shapes.push(layer_descriptor.input_shape().map(<[usize]>::to_vec));
            model.push(layer_descriptor.clone().into_layer());
        }
        model.loss = descriptor.loss;
        model.optimizer = descriptor
            .optimizer
            .map(super::model_io::OptimizerDescriptor::into_optimizer);

        // 2. 重放构建 + 命名走查（栈序与遍历序一致）
        for (id, shape) in model.stack.clone().into_iter().zip(build_shapes) {
            if let Some(shape) = shape {
                model.graph.build_layer(id, &shape)?;
            }
        }
        let order = model.stack.clone();
        model.graph.assign_names(&order)?;

        // 3. 参数与优化器状态
        let bin_path = descriptor.params_file.as_ref().map_or_else(
            || path.with_extension("bin"),
            |name| {
                path.parent()
                    .map_or_else(|| Path::new(name).to_path_buf(), |p| p.join(name))
            },
        );
        let payload = read_params_file(&bin_path)?;
        model.graph.bind_params(payload.params)?;
        if let (Some(status), Some(optimizer)) = (payload.status, model.optimizer.as_mut()) {
            optimizer.load_status(status);
        }
        Ok(model)
    }

    /// 只保存参数（不含优化器状态）
    pub fn save_params<P: AsRef<Path>>(&self, path: P) -> Result<(), GraphError> {
        let named = self.graph.named_params();
        if named.is_empty() {
            return Err(GraphError::ConfigurationError(
                "保存前请先执行一次前向传播，参数要先有名字".to_string(),
            ));
        }
        let params: HashMap<String, ArrayD<f32>> = named
            .into_iter()
            .map(|(name, param)| (name, param.data().clone()))
            .collect();
        write_params_file(path, &SavedParams {
            params,
            status: None,
        })
    }

    /// 把参数加载进已构建、已命名的模型
    pub fn load_params<P: AsRef<Path>>(&mut self, path: P) -> Result<(), GraphError> {
        let payload = read_params_file(path)?;
        self.graph.bind_params(payload.params)
    }
}

impl Default for Sequential {
    fn default() -> Self {
        Self::new()
    }
}
