//! 池化层：MaxPool2d / AvgPool2d / UnPool2d（NCHW）

use super::im2col::{Geometry, as_nchw, pad_nchw, strip_pad_nchw};
use super::{LayerCommon, TraitLayer, check_sample_shape, expect_single};
use crate::nn::model_io::LayerDescriptor;
use crate::nn::{GraphError, Phase};
use ndarray::{Array4, ArrayD};
use rand::rngs::StdRng;

/// 校验池化层输入形状为 [C, H, W]
fn check_pool_input(kind: &str, input_shape: &[usize]) -> Result<(), GraphError> {
    if input_shape.len() != 3 {
        return Err(GraphError::DimensionMismatch {
            expected: 3,
            got: input_shape.len(),
            message: format!("{kind}层要求 [C, H, W] 三维单样本输入"),
        });
    }
    Ok(())
}

/// 最大池化层
///
/// 前向缓存每个窗口的极值位置（填充坐标系），反向把上游梯度路由回去。
#[derive(Debug, Clone)]
pub struct MaxPool2d {
    common: LayerCommon,
    pool: (usize, usize),
    stride: (usize, usize),
    same_padding: bool,
    // 本步前向缓存
    argmax: Vec<(usize, usize)>,
    geometry: Option<Geometry>,
    padded_dim: (usize, usize, usize, usize),
    out_hw: (usize, usize),
}

impl MaxPool2d {
    /// 步长默认等于窗口
    pub fn new(pool: (usize, usize)) -> Self {
        Self {
            common: LayerCommon::default(),
            pool,
            stride: pool,
            same_padding: false,
            argmax: Vec::new(),
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

    fn make_geometry(&self, h: usize, w: usize) -> Geometry {
        if self.same_padding {
            Geometry::with_same_padding(self.pool, self.stride, h, w)
        } else {
            Geometry::new(self.pool, self.stride)
        }
    }
}

impl TraitLayer for MaxPool2d {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "MaxPool2d"
    }

    fn build(&mut self, input_shape: &[usize], _rng: &mut StdRng) -> Result<(), GraphError> {
        check_pool_input("MaxPool2d", input_shape)?;
        self.guard_build(input_shape)?;
        Ok(())
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("MaxPool2d", xs)?;
        let input_shape = self.common.input_shape.clone().unwrap_or_default();
        check_sample_shape("MaxPool2d", &input_shape, x)?;
        let x4 = as_nchw("MaxPool2d", x)?;
        let (n, c, h, w) = x4.dim();

        let geometry = self.make_geometry(h, w);
        let (oh, ow) = geometry.output_hw(h, w);
        let padded = pad_nchw(&x4, geometry.pad);
        let (ph, pw) = (geometry.kernel.0, geometry.kernel.1);
        let (sh, sw) = geometry.stride;

        let mut y = Array4::zeros((n, c, oh, ow));
        self.argmax = vec![(0, 0); n * c * oh * ow];
        let mut idx = 0;
        for ni in 0..n {
            for ci in 0..c {
                for ohi in 0..oh {
                    for owi in 0..ow {
                        let mut best = f32::NEG_INFINITY;
                        let mut best_pos = (0, 0);
                        for i in 0..ph {
                            for j in 0..pw {
                                let (hi, wi) = (ohi * sh + i, owi * sw + j);
                                let v = padded[[ni, ci, hi, wi]];
                                if v > best {
                                    best = v;
                                    best_pos = (hi, wi);
                                }
                            }
                        }
                        y[[ni, ci, ohi, owi]] = best;
                        self.argmax[idx] = best_pos;
                        idx += 1;
                    }
                }
            }
        }

        self.geometry = Some(geometry);
        self.padded_dim = padded.dim();
        self.out_hw = (oh, ow);
        Ok(y.into_dyn())
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let geometry = self.geometry.ok_or_else(|| {
            GraphError::ConfigurationError("MaxPool2d层反向前必须先执行前向".to_string())
        })?;
        let dy4 = as_nchw("MaxPool2d", dy)?;
        let (n, c, oh, ow) = dy4.dim();

        // 梯度只流向各窗口的极值位置
        let mut dx_padded = Array4::zeros(self.padded_dim);
        let mut idx = 0;
        for ni in 0..n {
            for ci in 0..c {
                for ohi in 0..oh {
                    for owi in 0..ow {
                        let (hi, wi) = self.argmax[idx];
                        dx_padded[[ni, ci, hi, wi]] += dy4[[ni, ci, ohi, owi]];
                        idx += 1;
                    }
                }
            }
        }
        Ok(vec![strip_pad_nchw(&dx_padded, geometry.pad).into_dyn()])
    }

    fn output_shape(&self) -> Vec<usize> {
        let input_shape = self.common.input_shape.as_deref().unwrap_or_default();
        if input_shape.len() != 3 {
            return Vec::new();
        }
        let geometry = self.make_geometry(input_shape[1], input_shape[2]);
        let (oh, ow) = geometry.output_hw(input_shape[1], input_shape[2]);
        vec![input_shape[0], oh, ow]
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::MaxPool2d {
            pool: self.pool,
            stride: self.stride,
            same_padding: self.same_padding,
            input_shape: self.common.input_shape.clone(),
        }
    }
}

/// 平均池化层
#[derive(Debug, Clone)]
pub struct AvgPool2d {
    common: LayerCommon,
    pool: (usize, usize),
    stride: (usize, usize),
    same_padding: bool,
    geometry: Option<Geometry>,
    padded_dim: (usize, usize, usize, usize),
}

impl AvgPool2d {
    /// 步长默认等于窗口
    pub fn new(pool: (usize, usize)) -> Self {
        Self {
            common: LayerCommon::default(),
            pool,
            stride: pool,
            same_padding: false,
            geometry: None,
            padded_dim: (0, 0, 0, 0),
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

    fn make_geometry(&self, h: usize, w: usize) -> Geometry {
        if self.same_padding {
            Geometry::with_same_padding(self.pool, self.stride, h, w)
        } else {
            Geometry::new(self.pool, self.stride)
        }
    }
}

impl TraitLayer for AvgPool2d {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "AvgPool2d"
    }

    fn build(&mut self, input_shape: &[usize], _rng: &mut StdRng) -> Result<(), GraphError> {
        check_pool_input("AvgPool2d", input_shape)?;
        self.guard_build(input_shape)?;
        Ok(())
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("AvgPool2d", xs)?;
        let input_shape = self.common.input_shape.clone().unwrap_or_default();
        check_sample_shape("AvgPool2d", &input_shape, x)?;
        let x4 = as_nchw("AvgPool2d", x)?;
        let (n, c, h, w) = x4.dim();

        let geometry = self.make_geometry(h, w);
        let (oh, ow) = geometry.output_hw(h, w);
        let padded = pad_nchw(&x4, geometry.pad);
        let (ph, pw) = geometry.kernel;
        let (sh, sw) = geometry.stride;
        let window = (ph * pw) as f32;

        let mut y = Array4::zeros((n, c, oh, ow));
        for ni in 0..n {
            for ci in 0..c {
                for ohi in 0..oh {
                    for owi in 0..ow {
                        let mut sum = 0.0;
                        for i in 0..ph {
                            for j in 0..pw {
                                sum += padded[[ni, ci, ohi * sh + i, owi * sw + j]];
                            }
                        }
                        y[[ni, ci, ohi, owi]] = sum / window;
                    }
                }
            }
        }

        self.geometry = Some(geometry);
        self.padded_dim = padded.dim();
        Ok(y.into_dyn())
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let geometry = self.geometry.ok_or_else(|| {
            GraphError::ConfigurationError("AvgPool2d层反向前必须先执行前向".to_string())
        })?;
        let dy4 = as_nchw("AvgPool2d", dy)?;
        let (n, c, oh, ow) = dy4.dim();
        let (ph, pw) = geometry.kernel;
        let (sh, sw) = geometry.stride;
        let window = (ph * pw) as f32;

        // 每个窗口均摊上游梯度
        let mut dx_padded = Array4::zeros(self.padded_dim);
        for ni in 0..n {
            for ci in 0..c {
                for ohi in 0..oh {
                    for owi in 0..ow {
                        let share = dy4[[ni, ci, ohi, owi]] / window;
                        for i in 0..ph {
                            for j in 0..pw {
                                dx_padded[[ni, ci, ohi * sh + i, owi * sw + j]] += share;
                            }
                        }
                    }
                }
            }
        }
        Ok(vec![strip_pad_nchw(&dx_padded, geometry.pad).into_dyn()])
    }

    fn output_shape(&self) -> Vec<usize> {
        let input_shape = self.common.input_shape.as_deref().unwrap_or_default();
        if input_shape.len() != 3 {
            return Vec::new();
        }
        let geometry = self.make_geometry(input_shape[1], input_shape[2]);
        let (oh, ow) = geometry.output_hw(input_shape[1], input_shape[2]);
        vec![input_shape[0], oh, ow]
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::AvgPool2d {
            pool: self.pool,
            stride: self.stride,
            same_padding: self.same_padding,
            input_shape: self.common.input_shape.clone(),
        }
    }
}

/// 反池化层：每个像素复制成 uh×uw 的块做上采样
///
/// 复制的伴随是求和，所以反向对每块梯度求和传回。
#[derive(Debug, Clone)]
pub struct UnPool2d {
    common: LayerCommon,
    size: (usize, usize),
}

impl UnPool2d {
    pub fn new(size: (usize, usize)) -> Self {
        Self {
            common: LayerCommon::default(),
            size,
        }
    }
}

impl TraitLayer for UnPool2d {
    fn common(&self) -> &LayerCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut LayerCommon {
        &mut self.common
    }

    fn kind_name(&self) -> &'static str {
        "UnPool2d"
    }

    fn build(&mut self, input_shape: &[usize], _rng: &mut StdRng) -> Result<(), GraphError> {
        check_pool_input("UnPool2d", input_shape)?;
        self.guard_build(input_shape)?;
        Ok(())
    }

    fn forward(&mut self, xs: &[&ArrayD<f32>], _phase: Phase) -> Result<ArrayD<f32>, GraphError> {
        let x = expect_single("UnPool2d", xs)?;
        let input_shape = self.common.input_shape.clone().unwrap_or_default();
        check_sample_shape("UnPool2d", &input_shape, x)?;
        let x4 = as_nchw("UnPool2d", x)?;
        let (n, c, h, w) = x4.dim();
        let (uh, uw) = self.size;

        let mut y = Array4::zeros((n, c, h * uh, w * uw));
        for ni in 0..n {
            for ci in 0..c {
                for hi in 0..h {
                    for wi in 0..w {
                        let v = x4[[ni, ci, hi, wi]];
                        for i in 0..uh {
                            for j in 0..uw {
                                y[[ni, ci, hi * uh + i, wi * uw + j]] = v;
                            }
                        }
                    }
                }
            }
        }
        Ok(y.into_dyn())
    }

    fn backward(&mut self, dy: &ArrayD<f32>) -> Result<Vec<ArrayD<f32>>, GraphError> {
        let dy4 = as_nchw("UnPool2d", dy)?;
        let (n, c, hh, ww) = dy4.dim();
        let (uh, uw) = self.size;
        let (h, w) = (hh / uh, ww / uw);

        let mut dx = Array4::zeros((n, c, h, w));
        for ni in 0..n {
            for ci in 0..c {
                for hi in 0..h {
                    for wi in 0..w {
                        let mut sum = 0.0;
                        for i in 0..uh {
                            for j in 0..uw {
                                sum += dy4[[ni, ci, hi * uh + i, wi * uw + j]];
                            }
                        }
                        dx[[ni, ci, hi, wi]] = sum;
                    }
                }
            }
        }
        Ok(vec![dx.into_dyn()])
    }

    fn output_shape(&self) -> Vec<usize> {
        let input_shape = self.common.input_shape.as_deref().unwrap_or_default();
        if input_shape.len() != 3 {
            return Vec::new();
        }
        vec![
            input_shape[0],
            input_shape[1] * self.size.0,
            input_shape[2] * self.size.1,
        ]
    }

    fn to_descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::UnPool2d {
            size: self.size,
            input_shape: self.common.input_shape.clone(),
        }
    }
}
