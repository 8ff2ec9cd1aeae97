//! DataLoader - 带环绕游标的批迭代器
//!
//! 训练循环的数据入口：可重启、有限、有状态的游标，每次吐出
//! `(x_batch, y_batch, batch_index)`，游标环绕时（配置了随机才）重新洗牌。

use ndarray::{ArrayD, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// 批迭代器
///
/// 样本数不被批大小整除时，尾批按余数吐短批
/// （10 个样本、批大小 7：先 0..=6 共 7 个，再 7,8,9 共 3 个），随后环绕。
///
/// # 示例
/// ```ignore
/// let mut loader = DataLoader::new(train_x, train_y, 32).random(true);
/// for _ in 0..loader.num_batches() {
///     let (xb, yb, _index) = loader.next_batch();
///     model.train_on_batch(&xb, &yb)?;
/// }
/// ```
pub struct DataLoader {
    x: ArrayD<f32>,
    y: ArrayD<f32>,
    batch_size: usize,
    random: bool,
    indices: Vec<usize>,
    cursor: usize,
    batch_index: usize,
    rng: StdRng,
}

impl DataLoader {
    /// # 参数
    /// - `x` / `y`: 批主序数组，第一维都是样本数且必须一致
    /// - `batch_size`: 批大小，必须大于 0
    ///
    /// # Panics
    /// 批大小为 0 或样本数不一致时
    pub fn new(x: ArrayD<f32>, y: ArrayD<f32>, batch_size: usize) -> Self {
        assert!(batch_size > 0, "DataLoader: batch_size 必须大于 0");
        assert_eq!(
            x.shape()[0],
            y.shape()[0],
            "DataLoader: x 和 y 的样本数必须一致，得到 {} vs {}",
            x.shape()[0],
            y.shape()[0]
        );
        let n = x.shape()[0];
        Self {
            x,
            y,
            batch_size,
            random: false,
            indices: (0..n).collect(),
            cursor: 0,
            batch_index: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// 链式配置：是否随机顺序（环绕时重新洗牌）
    pub fn random(mut self, random: bool) -> Self {
        self.random = random;
        if random {
            self.indices.shuffle(&mut self.rng);
        }
        self
    }

    /// 链式配置：洗牌种子（复现用）
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        if self.random {
            // 用新种子重洗一遍，保证顺序只由种子决定
            self.indices = (0..self.len()).collect();
            self.indices.shuffle(&mut self.rng);
        }
        self
    }

    /// 样本总数
    pub fn len(&self) -> usize {
        self.x.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 一轮的批数（尾批不丢）
    pub fn num_batches(&self) -> usize {
        self.len().div_ceil(self.batch_size)
    }

    /// 吐下一批：`(x_batch, y_batch, batch_index)`
    ///
    /// 游标走到尾部吐出短批后环绕归零；随机模式下环绕时重新洗牌。
    pub fn next_batch(&mut self) -> (ArrayD<f32>, ArrayD<f32>, usize) {
        let n = self.len();
        let end = (self.cursor + self.batch_size).min(n);
        let picked = &self.indices[self.cursor..end];

        let xb = self.x.select(Axis(0), picked);
        let yb = self.y.select(Axis(0), picked);
        let index = self.batch_index;

        self.cursor = end;
        self.batch_index += 1;
        if self.cursor >= n {
            self.wrap();
        }
        (xb, yb, index)
    }

    /// 重启游标（批序号一并清零，随机模式下重新洗牌）
    pub fn reset(&mut self) {
        self.batch_index = 0;
        self.wrap();
    }

    /// 游标环绕：归零 + 按需洗牌
    fn wrap(&mut self) {
        self.cursor = 0;
        if self.random {
            self.indices.shuffle(&mut self.rng);
        }
    }
}
