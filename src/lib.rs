//! # Lamina
//!
//! `lamina`是一个层式（layer-based）神经网络训练库：前向计算即时执行的同时
//! 搭建一张由"链接"（Link）组成的计算图，反向传播沿该图走一遍即可把梯度
//! 累积到各层参数上。内置常见层（全连接、卷积、池化、归一化、激活、合并层）、
//! 一族基于梯度的优化器、损失函数、正则化项，以及训练后参数的保存/加载。
//!
//! 张量数学由[ndarray](https://docs.rs/ndarray)提供，本库只消费其稠密数组能力。

pub mod data;
pub mod nn;
pub mod utils;
