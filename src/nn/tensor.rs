//! 张量（Tensor）：前向计算值 + 产生它的链接（计算图溯源）
//!
//! 注意本库语境下的"Tensor"不是通用多维数组（那由 ndarray 承担），
//! 而是"一份前向结果 + 它来自哪个链接"的捆绑。

use super::graph::LinkId;
use ndarray::ArrayD;

/// 前向值及其图上溯源
///
/// 除用户喂入的原始输入外，每个 Tensor 都带有指向唯一产生它的层调用的链接。
/// 每个训练步都会产生新的 Tensor；模型只保留本步最后一个 Tensor 的链接。
#[derive(Debug, Clone)]
pub struct Tensor {
    value: ArrayD<f32>,
    link: Option<LinkId>,
}

impl Tensor {
    /// 包装一份原始输入（无链接）
    pub fn new(value: ArrayD<f32>) -> Self {
        Self { value, link: None }
    }

    /// 由图在层调用后创建（携带产生它的链接）
    pub(crate) fn with_link(value: ArrayD<f32>, link: LinkId) -> Self {
        Self {
            value,
            link: Some(link),
        }
    }

    pub fn value(&self) -> &ArrayD<f32> {
        &self.value
    }

    pub fn link(&self) -> Option<LinkId> {
        self.link
    }

    /// 取出内部数组（消耗 self）
    pub fn into_value(self) -> ArrayD<f32> {
        self.value
    }
}
