//! 2D 卷积层：im2col 平铺 + 单次矩阵乘

use super::im2col::{Geometry, as_nchw, col2im, im2col, pad_nchw, strip_pad_nchw};
use super::{LayerCommon, TraitLayer, check_sample_shape, expect_single};
use crate::nn::model_io::LayerDescriptor;
use crate::nn::{GraphError, Init, Parameter, Phase, Regularizer};
use ndarray::{Array2, ArrayD, Axis};
use rand::rngs::StdRng;

/// 2D 卷积层
///
/// - 输入：[batch, C_in, H, W]（NCHW），单样本形状 [C_in, H, W]
/// - 卷积核：[C_out, C_in, kH, kW]
/// - 输出：[batch, C_out, H', W']
/// - `same_padding` 开启时输出空间尺寸 = ceil(输入/步长)，填充在反向时对称剥除
#[derive(Debug, Clone)]
pub struct Conv2d {
    common: LayerCommon,
    filters: usize,
    kernel: (usize, usize),
    stride: (usize, usize),
    same_padding: bool,
    weight_init: Init,
    bias_init: Init,
    weight_regularizer: Option<Regularizer>,
    bias_regularizer: Option<Regularizer>,
    weight: Option<Parameter>,
    bias: Option<Parameter>,
    // 本步前向缓存
    col: Option<Array2<f32>>,
    geometry: Option<Geometry>,
    padded_dim: (usize, usize, usize, usize),
    out_hw: (usize, usize),
}

impl Conv2d {
    /// # 参数
    /// - `filters`: 输出通道数
    /// - `kernel`: 卷积核 (kH, kW)
    pub fn new(filters: usize, kernel: (usize, usize)) -> Self {
        Self {
            common: LayerCommon::default(),
            filters,
            kernel,
            stride: (1, 1),
            same_padding: false,
            weight_init: Init::He,
            bias_init: Init::Zeros,
            weight_regularizer: None,
            bias_regularizer: None,
            weight: None,
            bias: None,
            col: None,
            geometry: None,
            padded_dim: (0, 0, 0, 0),
            out_hw: (0, 0),
        }
    }

    /// 链式配置：步长
    pub fn stride(mut self, stride: (usize, usize)) -> Self {
        self.stride = stride;
        self
    }

    /// 链式配置：same 填充
    pub fn same_padding(mut self, same_padding: bool) -> Self {
        self.same_padding = same_padding;
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

    /// 当前几何（由输入形状和填充配置定）
    fn make_geometry(&self, h: usize, w: usize) -> Geometry {
        if self.same_padding {
            Geometry::with_same_padding(self.kernel, self.stride, h, w)
        } else {
            Geometry::new(self.kernel, self.stride)
        }
    }
}

impl TraitLayer for Conv2d {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "Conv2d"
    }

    fn build(&mut self, input_shape: &[usize], rng: &mut StdRng) -> Result<(), GraphError> {
        // 1. 输入必须是 [C, H, W]
        if input_shape.len() != 3 {
            return Err(GraphError::DimensionMismatch {
                expected: 3,
                got: input_shape.len(),
                message: "Conv2d层要求 [C, H, W] 三维单样本输入".to_string(),
            });
        }
        // 2. 核不能大于（填充后的）输入
        let (kh, kw) = self.kernel;
        let geometry = self.make_geometry(input_shape[1], input_shape[2]);
        let ph = input_shape[1] + geometry.pad.0 + geometry.pad.1;
        let pw = input_shape[2] + geometry.pad.2 + geometry.pad.3;
        if kh > ph || kw > pw {
            return Err(GraphError::InvalidOperation(format!(
                "卷积核 {kh}x{kw} 超出输入 {ph}x{pw}"
            )));
        }
        if !self.guard_build(input_shape)? {
            return Ok(());
        }

        // 3. 按感受野扇入初始化
        let in_channels = input_shape[0];
        let fan_in = in_channels * kh * kw;
        self.weight = Some(Parameter::new(self.weight_init.init(
            &[self.filters, in_channels, kh, kw],
            fan_in,
            rng,
        )));
        self.bias = Some(Parameter::new(self.bias_init.init(
            &[self.filters],
            fan_in,
            rng,
        )));
        Ok(())
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("Conv2d", xs)?;
        let input_shape = self.common.input_shape.clone().unwrap_or_default();
        check_sample_shape("Conv2d", &input_shape, x)?;
        let x4 = as_nchw("Conv2d", x)?;
        let (n, _c, h, w) = x4.dim();

        // 1. 填充 + 平铺
        let geometry = self.make_geometry(h, w);
        let out_hw = geometry.output_hw(h, w);
        let padded = pad_nchw(&x4, geometry.pad);
        let col = im2col(&padded, geometry.kernel, geometry.stride, out_hw);

        // 2. 一次矩阵乘完成整批卷积
        let k = col.shape()[1];
        let weight = self.weight.as_ref().unwrap().data();
        let w2 = weight.view().into_shape((self.filters, k)).unwrap();
        let mut y_col = col.dot(&w2.t());
        y_col += &self
            .bias
            .as_ref()
            .unwrap()
            .data()
            .view()
            .into_dimensionality::<ndarray::Ix1>()
            .unwrap();

        // 3. [N*oh*ow, C_out] → [N, C_out, oh, ow]
        let (oh, ow) = out_hw;
        let y = y_col
            .into_shape((n, oh, ow, self.filters))
            .unwrap()
            .permuted_axes([0, 3, 1, 2])
            .as_standard_layout()
            .to_owned()
            .into_dyn();

        self.col = Some(col);
        self.geometry = Some(geometry);
        self.padded_dim = padded.dim();
        self.out_hw = out_hw;
        Ok(y)
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let col = self.col.as_ref().ok_or_else(|| {
            GraphError::ConfigurationError("Conv2d层反向前必须先执行前向".to_string())
        })?;
        let geometry = self.geometry.unwrap();
        let (oh, ow) = self.out_hw;
        let (n, _, _, _) = self.padded_dim;

        // 1. [N, C_out, oh, ow] → [N*oh*ow, C_out]
        let dy4 = as_nchw("Conv2d", dy)?;
        let dy_col = dy4
            .permuted_axes([0, 2, 3, 1])
            .as_standard_layout()
            .to_owned()
            .into_shape((n * oh * ow, self.filters))
            .unwrap();

        // 2. 参数梯度
        let k = col.shape()[1];
        let dw2 = dy_col.t().dot(col);
        let kernel_shape = self.weight.as_ref().unwrap().data().shape().to_vec();
        let dw = dw2.into_shape(ndarray::IxDyn(&kernel_shape)).unwrap();
        self.weight.as_mut().unwrap().accumulate_grad(&dw);
        let db = dy_col.sum_axis(Axis(0)).into_dyn();
        self.bias.as_mut().unwrap().accumulate_grad(&db);

        // 3. 下游梯度：逆平铺后剥除填充
        let weight = self.weight.as_ref().unwrap().data();
        let w2 = weight.view().into_shape((self.filters, k)).unwrap();
        let dcol = dy_col.dot(&w2);
        let dpadded = col2im(
            &dcol,
            self.padded_dim,
            geometry.kernel,
            geometry.stride,
            self.out_hw,
        );
        let dx = strip_pad_nchw(&dpadded, geometry.pad).into_dyn();
        Ok(vec![dx])
    }

    fn output_shape(&self) -> Vec<usize> {
        let input_shape = self.common.input_shape.as_deref().unwrap_or_default();
        if input_shape.len() != 3 {
            return Vec::new();
        }
        let geometry = self.make_geometry(input_shape[1], input_shape[2]);
        let (oh, ow) = geometry.output_hw(input_shape[1], input_shape[2]);
        vec![self.filters, oh, ow]
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
        LayerDescriptor::Conv2d {
            filters: self.filters,
            kernel: self.kernel,
            stride: self.stride,
            same_padding: self.same_padding,
            weight_init: self.weight_init,
            bias_init: self.bias_init,
            weight_regularizer: self.weight_regularizer,
            bias_regularizer: self.bias_regularizer,
            input_shape: self.common.input_shape.clone(),
        }
    }
}
