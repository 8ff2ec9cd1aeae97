//! 图像-列变换（im2col / col2im）与零填充助手
//!
//! 把输入平铺成一列列重叠感受野，卷积就化成一次稠密矩阵乘；
//! 逆变换（col2im）把重叠位置的梯度贡献逐项累加回去。
//! 卷积与池化层共用这套机制。数据一律按 NCHW 排布。

use crate::nn::GraphError;
use ndarray::{Array2, Array4, ArrayD, Ix4};

/// 卷积/池化的二维几何参数
#[derive(Debug, Clone, Copy)]
pub(crate) struct Geometry {
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    /// 上下左右填充量 (top, bottom, left, right)
    pub pad: (usize, usize, usize, usize),
}

impl Geometry {
    /// 无填充几何
    pub fn new(kernel: (usize, usize), stride: (usize, usize)) -> Self {
        Self {
            kernel,
            stride,
            pad: (0, 0, 0, 0),
        }
    }

    /// same 填充：输出空间尺寸 = ceil(输入 / 步长)
    ///
    /// 总填充量拆成两半，先上/左后下/右；反向按记录量对称剥除。
    pub fn with_same_padding(kernel: (usize, usize), stride: (usize, usize), h: usize, w: usize) -> Self {
        let out_h = h.div_ceil(stride.0);
        let out_w = w.div_ceil(stride.1);
        let pad_h = ((out_h - 1) * stride.0 + kernel.0).saturating_sub(h);
        let pad_w = ((out_w - 1) * stride.1 + kernel.1).saturating_sub(w);
        Self {
            kernel,
            stride,
            pad: (pad_h / 2, pad_h - pad_h / 2, pad_w / 2, pad_w - pad_w / 2),
        }
    }

    /// 给定（未填充）输入尺寸，算输出空间尺寸
    pub fn output_hw(&self, h: usize, w: usize) -> (usize, usize) {
        let ph = h + self.pad.0 + self.pad.1;
        let pw = w + self.pad.2 + self.pad.3;
        (
            (ph - self.kernel.0) / self.stride.0 + 1,
            (pw - self.kernel.1) / self.stride.1 + 1,
        )
    }
}

/// 校验并视作 4D [batch, C, H, W]
pub(crate) fn as_nchw(kind: &str, x: &ArrayD<f32>) -> Result<Array4<f32>, GraphError> {
    if x.ndim() != 4 {
        return Err(GraphError::DimensionMismatch {
            expected: 4,
            got: x.ndim(),
            message: format!("{kind}层要求 NCHW 四维输入，单样本请用 [1, C, H, W]"),
        });
    }
    Ok(x.view().into_dimensionality::<Ix4>().unwrap().to_owned())
}

/// 零填充（NCHW）
pub(crate) fn pad_nchw(x: &Array4<f32>, pad: (usize, usize, usize, usize)) -> Array4<f32> {
    let (pt, pb, pl, pr) = pad;
    if pt == 0 && pb == 0 && pl == 0 && pr == 0 {
        return x.clone();
    }
    let (n, c, h, w) = x.dim();
    let mut out = Array4::zeros((n, c, h + pt + pb, w + pl + pr));
    out.slice_mut(ndarray::s![.., .., pt..pt + h, pl..pl + w])
        .assign(x);
    out
}

/// 剥除填充（NCHW，对称于 `pad_nchw`）
pub(crate) fn strip_pad_nchw(x: &Array4<f32>, pad: (usize, usize, usize, usize)) -> Array4<f32> {
    let (pt, pb, pl, pr) = pad;
    if pt == 0 && pb == 0 && pl == 0 && pr == 0 {
        return x.clone();
    }
    let (_, _, h, w) = x.dim();
    x.slice(ndarray::s![.., .., pt..h - pb, pl..w - pr])
        .to_owned()
}

/// im2col：已填充的 [N, C, H, W] → [N*out_h*out_w, C*kh*kw]
///
/// 行序按 (n, oh, ow)，列序按 (c, kh, kw)，col2im 与权重重排都依赖这一约定。
pub(crate) fn im2col(
    x: &Array4<f32>,
    kernel: (usize, usize),
    stride: (usize, usize),
    out_hw: (usize, usize),
) -> Array2<f32> {
    let (n, c, _, _) = x.dim();
    let (kh, kw) = kernel;
    let (sh, sw) = stride;
    let (oh, ow) = out_hw;

    let mut col = Array2::zeros((n * oh * ow, c * kh * kw));
    for ni in 0..n {
        for ohi in 0..oh {
            for owi in 0..ow {
                let row = (ni * oh + ohi) * ow + owi;
                let mut cidx = 0;
                for ci in 0..c {
                    for khi in 0..kh {
                        for kwi in 0..kw {
                            col[[row, cidx]] = x[[ni, ci, ohi * sh + khi, owi * sw + kwi]];
                            cidx += 1;
                        }
                    }
                }
            }
        }
    }
    col
}

/// col2im：im2col 的伴随变换，重叠处累加
pub(crate) fn col2im(
    col: &Array2<f32>,
    padded_shape: (usize, usize, usize, usize),
    kernel: (usize, usize),
    stride: (usize, usize),
    out_hw: (usize, usize),
) -> Array4<f32> {
    let (n, c, h, w) = padded_shape;
    let (kh, kw) = kernel;
    let (sh, sw) = stride;
    let (oh, ow) = out_hw;

    let mut img = Array4::zeros((n, c, h, w));
    for ni in 0..n {
        for ohi in 0..oh {
            for owi in 0..ow {
                let row = (ni * oh + ohi) * ow + owi;
                let mut cidx = 0;
                for ci in 0..c {
                    for khi in 0..kh {
                        for kwi in 0..kw {
                            img[[ni, ci, ohi * sh + khi, owi * sw + kwi]] += col[[row, cidx]];
                            cidx += 1;
                        }
                    }
                }
            }
        }
    }
    img
}
