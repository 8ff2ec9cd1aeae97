//! # 链接图（计算图）核心
//!
//! 前向计算即时执行，同时在一个以整数句柄索引的竞技场（arena）里记录
//! "哪个层、从哪（些）个父链接、产出了这个值"。反向传播就是沿这些句柄
//! 从最后一个链接往回走一遍，把梯度逐层累积到参数上。
//!
//! 层本身也存在图持有的竞技场里（[`LayerId`]），跨训练步复用；
//! 链接（[`LinkId`]）则每个前向步重建一批，走完反向即可废弃。

use super::error::GraphError;
use super::layers::{LayerKind, TraitLayer};
use super::param::Parameter;
use super::tensor::Tensor;
use crate::nn::Phase;
use ndarray::ArrayD;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::{HashMap, HashSet};

/// 层句柄（跨训练步稳定）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId(pub(crate) u32);

/// 链接句柄（仅当前前向步内有效）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub(crate) u32);

/// 计算图的一个节点：记录产出层与父链接
///
/// 一元层恰有1个父槽，合并层恰有2个；槽里的 `None` 表示
/// 对应输入是用户喂入的原始张量（无溯源，反向到此为止）。
#[derive(Debug, Clone)]
struct Link {
    layer: LayerId,
    prev: Vec<Option<LinkId>>,
}

/// 链接图：层竞技场 + 每步重建的链接竞技场
#[derive(Debug)]
pub struct Graph {
    layers: Vec<LayerKind>,
    links: Vec<Link>,
    /// 最近一次前向的扁平层序（输入→输出，去重），下一步前向时失效
    flat_cache: Option<Vec<LayerId>>,
    /// 初始化器共用的随机流（可播种以复现）
    rng: StdRng,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            links: Vec::new(),
            flat_cache: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// 创建一个带固定种子的图（确保初始化可重复）
    pub fn with_seed(seed: u64) -> Self {
        Self {
            layers: Vec::new(),
            links: Vec::new(),
            flat_cache: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// 重置随机种子
    pub fn set_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// 注册一个层，返回跨步稳定的句柄
    pub fn add_layer<L: Into<LayerKind>>(&mut self, layer: L) -> LayerId {
        self.layers.push(layer.into());
        LayerId((self.layers.len() - 1) as u32)
    }

    pub fn layer(&self, id: LayerId) -> Result<&LayerKind, GraphError> {
        self.layers
            .get(id.0 as usize)
            .ok_or_else(|| GraphError::InvalidOperation(format!("层句柄{id:?}不存在")))
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Result<&mut LayerKind, GraphError> {
        self.layers
            .get_mut(id.0 as usize)
            .ok_or_else(|| GraphError::InvalidOperation(format!("层句柄{id:?}不存在")))
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// 直接按给定输入形状构建某层（加载模型时重放构建用）
    pub fn build_layer(&mut self, id: LayerId, input_shape: &[usize]) -> Result<(), GraphError> {
        let (layers, rng) = (&mut self.layers, &mut self.rng);
        let layer = layers
            .get_mut(id.0 as usize)
            .ok_or_else(|| GraphError::InvalidOperation(format!("层句柄{id:?}不存在")))?;
        layer.build(input_shape, rng)
    }

    /// 开始新的前向步：清空上一步的链接与扁平缓存
    ///
    /// 链接不跨步存活——层与参数的持续性由层竞技场本身承担。
    pub fn begin_pass(&mut self) {
        self.links.clear();
        self.flat_cache = None;
    }

    // ==================== 图生长（唯一入口） ====================

    /// 调用一元层：拆开张量 → 按需构建 → 前向 → 记录链接 → 包回张量
    ///
    /// 这是 DAG 生长的唯一机制，层的实现永远不直接构造链接。
    pub fn call(&mut self, id: LayerId, x: &Tensor, phase: Phase) -> Result<Tensor, GraphError> {
        if x.value().ndim() == 0 {
            return Err(GraphError::DimensionMismatch {
                expected: 1,
                got: 0,
                message: "输入张量至少要有批维".to_string(),
            });
        }
        let sample_shape = x.value().shape()[1..].to_vec();

        let (layers, rng) = (&mut self.layers, &mut self.rng);
        let layer = layers
            .get_mut(id.0 as usize)
            .ok_or_else(|| GraphError::InvalidOperation(format!("层句柄{id:?}不存在")))?;
        layer.build(&sample_shape, rng)?;
        let y = layer.forward(&[x.value()], phase)?;

        let link = LinkId(self.links.len() as u32);
        self.links.push(Link {
            layer: id,
            prev: vec![x.link()],
        });
        Ok(Tensor::with_link(y, link))
    }

    /// 调用合并层：两个输入张量，产出带双亲链接的张量
    ///
    /// 首次调用按第一个输入的形状构建。
    pub fn call_merged(
        &mut self,
        id: LayerId,
        x1: &Tensor,
        x2: &Tensor,
        phase: Phase,
    ) -> Result<Tensor, GraphError> {
        if x1.value().ndim() == 0 || x2.value().ndim() == 0 {
            return Err(GraphError::DimensionMismatch {
                expected: 1,
                got: 0,
                message: "输入张量至少要有批维".to_string(),
            });
        }
        let sample_shape = x1.value().shape()[1..].to_vec();

        let (layers, rng) = (&mut self.layers, &mut self.rng);
        let layer = layers
            .get_mut(id.0 as usize)
            .ok_or_else(|| GraphError::InvalidOperation(format!("层句柄{id:?}不存在")))?;
        layer.build(&sample_shape, rng)?;
        let y = layer.forward(&[x1.value(), x2.value()], phase)?;

        let link = LinkId(self.links.len() as u32);
        self.links.push(Link {
            layer: id,
            prev: vec![x1.link(), x2.link()],
        });
        Ok(Tensor::with_link(y, link))
    }

    // ==================== 反向传播 ====================

    /// 从最后一个张量沿链接图走一遍反向传播
    ///
    /// 每个训练步恰好调用一次；参数梯度在途中逐层累加，
    /// 直到优化器消费并重置。
    pub fn backward(&mut self, last: &Tensor, dy: ArrayD<f32>) -> Result<(), GraphError> {
        let start = last.link().ok_or_else(|| {
            GraphError::ConfigurationError("反向传播需要带链接的张量，请先执行前向传播".to_string())
        })?;

        // 显式栈代替递归：每项是（待反向的链接, 对其输出的梯度）
        let mut stack: Vec<(LinkId, ArrayD<f32>)> = vec![(start, dy)];
        while let Some((lid, dy)) = stack.pop() {
            let link = self
                .links
                .get(lid.0 as usize)
                .ok_or_else(|| GraphError::InvalidOperation(format!("链接句柄{lid:?}不存在")))?
                .clone();
            let layer = self
                .layers
                .get_mut(link.layer.0 as usize)
                .ok_or_else(|| GraphError::InvalidOperation(format!("层句柄{:?}不存在", link.layer)))?;

            let grads = layer.backward(&dy)?;
            if grads.len() != link.prev.len() {
                return Err(GraphError::ComputationError(format!(
                    "{}层反向返回{}份梯度，但链接有{}个父槽",
                    layer.kind_name(),
                    grads.len(),
                    link.prev.len()
                )));
            }
            // 原始输入槽（None）的梯度到此为止
            for (grad, parent) in grads.into_iter().zip(link.prev.iter()) {
                if let Some(pid) = parent {
                    stack.push((*pid, grad));
                }
            }
        }
        Ok(())
    }

    // ==================== 扁平化与命名 ====================

    /// 由最后链接回溯出有序层列表（输入→输出，首见去重）并缓存
    ///
    /// 该列表是优化器更新、正则化遍历与命名走查的共同输入。
    pub fn flatten_and_cache(&mut self, last: &Tensor) -> Result<Vec<LayerId>, GraphError> {
        let start = last.link().ok_or_else(|| {
            GraphError::ConfigurationError("图尚未前向传播，无法扁平化层列表".to_string())
        })?;

        let mut acc: Vec<LayerId> = Vec::new();
        self.walk_front_insert(start, &mut acc)?;

        // 去重，保留首次出现的位置
        let mut seen = HashSet::new();
        acc.retain(|id| seen.insert(*id));

        self.flat_cache = Some(acc.clone());
        Ok(acc)
    }

    /// 深度优先回溯：当前层插到队首，再依次走 prev1、prev2
    fn walk_front_insert(&self, lid: LinkId, acc: &mut Vec<LayerId>) -> Result<(), GraphError> {
        let link = self
            .links
            .get(lid.0 as usize)
            .ok_or_else(|| GraphError::InvalidOperation(format!("链接句柄{lid:?}不存在")))?;
        acc.insert(0, link.layer);
        for parent in link.prev.iter().flatten() {
            self.walk_front_insert(*parent, acc)?;
        }
        Ok(())
    }

    /// 最近一次前向的扁平层序；尚未前向时报配置错误
    pub fn ordered_layers(&self) -> Result<&[LayerId], GraphError> {
        self.flat_cache.as_deref().ok_or_else(|| {
            GraphError::ConfigurationError("层列表要在至少一次成功前向之后才能查询".to_string())
        })
    }

    /// 命名走查：给每个层（及其参数）赋稳定符号名
    ///
    /// 同类层按遍历序编号为 `<类名>_<序号>`，参数为 `<层名>__<参数键>`。
    /// 幂等：已命名的实体绝不改名，序列化键空间因此跨步稳定。
    pub fn assign_names(&mut self, order: &[LayerId]) -> Result<(), GraphError> {
        let mut counters: HashMap<&'static str, usize> = HashMap::new();
        for id in order {
            let layer = self
                .layers
                .get_mut(id.0 as usize)
                .ok_or_else(|| GraphError::InvalidOperation(format!("层句柄{id:?}不存在")))?;
            let kind = layer.kind_name();
            let index = counters.entry(kind).or_insert(0);
            layer.set_name(&format!("{kind}_{index}"));
            *index += 1;

            let layer_name = layer.name().unwrap().to_string();
            for (key, param) in layer.param_entries() {
                param.set_name(&format!("{layer_name}__{key}"));
            }
        }
        Ok(())
    }

    // ==================== 参数收集 ====================

    /// 收集本步可训练且梯度非空的参数（优化器更新的输入）
    ///
    /// 命名走查必须先行——优化器按参数名维护辅助状态。
    pub fn trainable_params(
        &mut self,
        order: &[LayerId],
    ) -> Result<Vec<&mut Parameter>, GraphError> {
        let wanted: HashSet<LayerId> = order.iter().copied().collect();
        let mut params = Vec::new();
        for (index, layer) in self.layers.iter_mut().enumerate() {
            if !wanted.contains(&LayerId(index as u32)) || !layer.trainable() {
                continue;
            }
            for (_key, param) in layer.param_entries() {
                // 未收到梯度的参数（如本步没走到的分支）直接跳过
                if param.grad().is_none() {
                    continue;
                }
                if param.name().is_none() {
                    return Err(GraphError::ConfigurationError(
                        "优化器更新前必须完成命名走查，请先执行一次前向传播".to_string(),
                    ));
                }
                params.push(param);
            }
        }
        Ok(params)
    }

    /// 枚举所有已命名参数（序列化用）
    pub fn named_params(&self) -> Vec<(String, &Parameter)> {
        let mut entries = Vec::new();
        for layer in &self.layers {
            for (_key, param) in layer.param_refs() {
                if let Some(name) = param.name() {
                    entries.push((name.to_string(), param));
                }
            }
        }
        entries
    }

    /// 按名字把一批扁平参数数据绑回已构建的图
    pub fn bind_params(&mut self, data: HashMap<String, ArrayD<f32>>) -> Result<(), GraphError> {
        // 先建 名字 → (层序, 参数序) 的索引
        let mut index: HashMap<String, (usize, usize)> = HashMap::new();
        for (li, layer) in self.layers.iter().enumerate() {
            for (pi, (_key, param)) in layer.param_refs().into_iter().enumerate() {
                if let Some(name) = param.name() {
                    index.insert(name.to_string(), (li, pi));
                }
            }
        }

        for (name, value) in data {
            let (li, pi) = *index.get(&name).ok_or_else(|| {
                GraphError::ComputationError(format!("参数{name}在当前图里不存在，无法绑定"))
            })?;
            let layer = &mut self.layers[li];
            let mut entries = layer.param_entries();
            let (_key, param) = &mut entries[pi];
            if param.data().shape() != value.shape() {
                return Err(GraphError::ShapeMismatch {
                    expected: param.data().shape().to_vec(),
                    got: value.shape().to_vec(),
                    message: format!("参数{name}的形状与保存时不一致"),
                });
            }
            param.set_data(value);
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
