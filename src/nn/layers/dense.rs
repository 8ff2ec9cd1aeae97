//! 全连接层：y = x·W + b

use super::{LayerCommon, TraitLayer, check_sample_shape, expect_single};
use crate::nn::model_io::LayerDescriptor;
use crate::nn::{GraphError, Init, Parameter, Phase, Regularizer};
use ndarray::{ArrayD, Axis, Ix2};
use rand::rngs::StdRng;

/// 全连接层
///
/// 输入必须是单维样本（批量形状 [batch, in]），否则报维度错误——
/// 多维数据先接 Flatten。权重 [in, units]，偏置 [units]。
#[derive(Debug, Clone)]
pub struct Dense {
    common: LayerCommon,
    units: usize,
    use_bias: bool,
    weight_init: Init,
    bias_init: Init,
    weight_regularizer: Option<Regularizer>,
    bias_regularizer: Option<Regularizer>,
    weight: Option<Parameter>,
    bias: Option<Parameter>,
    /// 本步前向缓存的输入（反向算 dW 用）
    x: Option<ArrayD<f32>>,
}

impl Dense {
    pub fn new(units: usize) -> Self {
        Self {
            common: LayerCommon::default(),
            units,
            use_bias: true,
            weight_init: Init::default(),
            bias_init: Init::Zeros,
            weight_regularizer: None,
            bias_regularizer: None,
            weight: None,
            bias: None,
            x: None,
        }
    }

    /// 链式配置：是否带偏置
    pub fn use_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    /// 链式配置：权重初始化器
    pub fn weight_init(mut self, init: Init) -> Self {
        self.weight_init = init;
        self
    }

    /// 链式配置：偏置初始化器
    pub fn bias_init(mut self, init: Init) -> Self {
        self.bias_init = init;
        self
    }

    /// 链式配置：权重正则化
    pub fn weight_regularizer(mut self, reg: Regularizer) -> Self {
        self.weight_regularizer = Some(reg);
        self
    }

    /// 链式配置：偏置正则化
    pub fn bias_regularizer(mut self, reg: Regularizer) -> Self {
        self.bias_regularizer = Some(reg);
        self
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub(crate) fn weight(&self) -> Option<&Parameter> {
        self.weight.as_ref()
    }
}

impl TraitLayer for Dense {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "Dense"
    }

    fn build(&mut self, input_shape: &[usize], rng: &mut StdRng) -> Result<(), GraphError> {
        // 1. Dense 只接受单维样本
        if input_shape.len() != 1 {
            return Err(GraphError::DimensionMismatch {
                expected: 1,
                got: input_shape.len(),
                message: "Dense层要求单维输入，多维数据请先接Flatten".to_string(),
            });
        }
        if !self.guard_build(input_shape)? {
            return Ok(());
        }

        // 2. 按扇入初始化权重/偏置
        let fan_in = input_shape[0];
        self.weight = Some(Parameter::new(self.weight_init.init(
            &[fan_in, self.units],
            fan_in,
            rng,
        )));
        if self.use_bias {
            self.bias = Some(Parameter::new(self.bias_init.init(
                &[self.units],
                fan_in,
                rng,
            )));
        }
        Ok(())
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("Dense", xs)?;
        let input_shape = self.common.input_shape.clone().unwrap_or_default();
        check_sample_shape("Dense", &input_shape, x)?;

        // 形状已校验过，2 维转换不会失败
        let x2 = x.view().into_dimensionality::<Ix2>().unwrap();
        let w = self
            .weight
            .as_ref()
            .unwrap()
            .data()
            .view()
            .into_dimensionality::<Ix2>()
            .unwrap();

        let mut y = x2.dot(&w).into_dyn();
        if let Some(bias) = &self.bias {
            y += bias.data();
        }

        self.x = Some(x.clone());
        Ok(y)
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let x = self.x.as_ref().ok_or_else(|| {
            GraphError::ConfigurationError("Dense层反向前必须先执行前向".to_string())
        })?;
        let x2 = x.view().into_dimensionality::<Ix2>().unwrap();
        let dy2 = dy.view().into_dimensionality::<Ix2>().unwrap();

        // 1. 参数梯度（累加，不覆盖）
        let dw = x2.t().dot(&dy2).into_dyn();
        self.weight.as_mut().unwrap().accumulate_grad(&dw);
        if let Some(bias) = &mut self.bias {
            let db = dy2.sum_axis(Axis(0)).into_dyn();
            bias.accumulate_grad(&db);
        }

        // 2. 下游梯度
        let w = self
            .weight
            .as_ref()
            .unwrap()
            .data()
            .view()
            .into_dimensionality::<Ix2>()
            .unwrap();
        let dx = dy2.dot(&w.t()).into_dyn();
        Ok(vec![dx])
    }

    fn output_shape(&self) -> Vec<usize> {
        vec![self.units]
    }

    fn param_entries(&mut self) -> Vec<(&'static str, &mut Parameter)> {
        let mut entries = Vec::new();
        if let Some(w) = &mut self.weight {
            entries.push(("weight", w));
        }
        if let Some(b) = &mut self.bias {
            entries.push(("bias", b));
        }
        entries
    }

    fn param_refs(&self) -> Vec<(&'static str, &Parameter)> {
        let mut entries = Vec::new();
        if let Some(w) = &self.weight {
            entries.push(("weight", w));
        }
        if let Some(b) = &self.bias {
            entries.push(("bias", b));
        }
        entries
    }

    fn regularizers(&self) -> Vec<(Regularizer, &Parameter)> {
        let mut entries = Vec::new();
        if let (Some(reg), Some(w)) = (self.weight_regularizer, &self.weight) {
            entries.push((reg, w));
        }
        if let (Some(reg), Some(b)) = (self.bias_regularizer, &self.bias) {
            entries.push((reg, b));
        }
        entries
    }

    fn regularizers_mut(&mut self) -> Vec<(Regularizer, &mut Parameter)> {
        let mut entries = Vec::new();
        if let (Some(reg), Some(w)) = (self.weight_regularizer, &mut self.weight) {
            entries.push((reg, w));
        }
        if let (Some(reg), Some(b)) = (self.bias_regularizer, &mut self.bias) {
            entries.push((reg, b));
        }
        entries
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::Dense {
            units: self.units,
            use_bias: self.use_bias,
            weight_init: self.weight_init,
            bias_init: self.bias_init,
            weight_regularizer: self.weight_regularizer,
            bias_regularizer: self.bias_regularizer,
            input_shape: self.common.input_shape.clone(),
        }
    }
}
