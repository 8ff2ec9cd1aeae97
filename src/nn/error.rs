//! nn 模块的错误类型
//!
//! 所有违例在发生处立即返回（fail fast），库内部不做重试。
//! 训练中出现非有限损失不算错误，而是训练循环的一种可恢复的提前终止信号。

use thiserror::Error;

/// 图/层操作错误类型
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    /// 输入/输出形状不匹配（build 或 forward 时）
    #[error("形状不匹配: 期望 {expected:?}, 实际 {got:?}（{message}）")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
        message: String,
    },

    /// 维度数不匹配（如 Dense 要求单维输入）
    #[error("维度不匹配: 期望 {expected} 维, 实际 {got} 维（{message}）")]
    DimensionMismatch {
        expected: usize,
        got: usize,
        message: String,
    },

    /// 无效操作（如合并层只给了1个输入）
    #[error("无效操作: {0}")]
    InvalidOperation(String),

    /// 配置错误（如 setup 之前调用训练、首次前向之前查询层列表）
    #[error("配置错误: {0}")]
    ConfigurationError(String),

    /// 计算过程错误（序列化失败、文件读写失败等）
    #[error("计算错误: {0}")]
    ComputationError(String),

    /// 反序列化时遇到未注册的类型标签
    #[error("未知类型标签: {0}")]
    UnknownTypeTag(String),
}
