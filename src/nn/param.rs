//! 参数（Parameter）：一对自有的 (data, grad) 数组，可学习状态的最小单元

use ndarray::ArrayD;

/// 可学习参数
///
/// - `data`：稠密数值数组，形状在首次 build 后固定
/// - `grad`：与 data 同形的梯度缓冲；`None` 即"零哨兵"，表示本步尚未收到梯度
/// - `name`：命名走查（naming pass）一次性赋予，此后终生不变
///
/// 梯度只累加（add），绝不中途覆盖，直到优化器消费并重置为哨兵。
#[derive(Debug, Clone)]
pub struct Parameter {
    data: ArrayD<f32>,
    grad: Option<ArrayD<f32>>,
    name: Option<String>,
}

impl Parameter {
    /// 以已初始化好的数据创建参数（build 阶段由初始化器填充）
    pub fn new(data: ArrayD<f32>) -> Self {
        Self {
            data,
            grad: None,
            name: None,
        }
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ArrayD<f32> {
        &mut self.data
    }

    /// 覆盖参数数据（形状须与原数据一致，由调用方先行校验）
    pub(crate) fn set_data(&mut self, data: ArrayD<f32>) {
        self.data = data;
    }

    pub fn grad(&self) -> Option<&ArrayD<f32>> {
        self.grad.as_ref()
    }

    /// 梯度的可变视图（梯度裁剪等就地缩放用）
    pub fn grad_mut(&mut self) -> Option<&mut ArrayD<f32>> {
        self.grad.as_mut()
    }

    /// 累加一份梯度贡献（首次累加即从零哨兵起步）
    ///
    /// 同一训练步内可被多次调用（梯度累积律），贡献相加而非覆盖。
    pub fn accumulate_grad(&mut self, delta: &ArrayD<f32>) {
        match &mut self.grad {
            Some(g) => *g += delta,
            None => self.grad = Some(delta.clone()),
        }
    }

    /// 取走梯度并重置为零哨兵（优化器更新时调用）
    pub fn take_grad(&mut self) -> Option<ArrayD<f32>> {
        self.grad.take()
    }

    /// 重置梯度为零哨兵
    pub fn reset_grad(&mut self) {
        self.grad = None;
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// 赋名（只赋一次；已有名字时静默忽略，保证命名幂等）
    pub(crate) fn set_name(&mut self, name: &str) {
        if self.name.is_none() {
            self.name = Some(name.to_string());
        }
    }
}
