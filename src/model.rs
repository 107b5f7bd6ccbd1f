use crate::error::{Error, Result};
use crate::functions::{Activation, Loss};
use crate::gradcheck::Schedule;
use crate::layers::*;
use crate::optimizer::Optimizer;
use crate::types::*;
use crate::util::*;
use itertools::izip;
use rand::{Rng, RngCore};

/// 一回の学習・評価の結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub loss: f64,
    /// 予測の最大値のラベルが正解と一致した割合
    pub accuracy: f64,
}

/// ネットワークの形。隠れ層の出力次元を並べる(最後はラベル次元にする)
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub hidden: Vec<usize>,
    pub activation: Activation,
    pub loss: Loss,
    /// 交差エントロピーのとき最終層で使う活性化関数
    pub final_activation: Activation,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hidden: vec![10],
            activation: Activation::Tanh,
            loss: Loss::CrossEntropy,
            final_activation: Activation::Sigmoid,
        }
    }
}

/// 隠れ層をいくつか重ね、最後に残差接続つきの損失層をおく
pub struct Network {
    layers: Vec<AffineLayer>,
    loss_layer: ResLoss,
}

impl Network {
    /// data_dim -> hidden[0] -> ... -> label_dim -> ResLoss(label_dim)
    pub fn new<R: Rng + ?Sized>(
        rng: &mut R,
        data_dim: usize,
        label_dim: usize,
        config: &NetworkConfig,
    ) -> Self {
        let mut dims = vec![data_dim];
        dims.extend(config.hidden.iter().cloned());
        dims.push(label_dim);
        let layers = dims
            .windows(2)
            .map(|d| AffineLayer::new(rng, config.activation, d[0], d[1]))
            .collect();
        let loss_layer = ResLoss::new(rng, config.loss, config.final_activation, label_dim);
        Self { layers, loss_layer }
    }
    pub fn layers(&self) -> &[AffineLayer] {
        &self.layers
    }
    /// (データ次元, バッチ次元)から(バッチ次元, ラベル次元)の予測を返す
    pub fn predict(&self, x: Arr2d) -> Arr2d {
        self.forward(x).1.output().clone()
    }
    fn forward(&self, mut x: Arr2d) -> (Vec<AffineCache>, ResLossCache) {
        let mut caches = Vec::with_capacity(self.layers.len());
        for layer in self.layers.iter() {
            let (out, cache) = layer.forward(x);
            caches.push(cache);
            x = out;
        }
        (caches, self.loss_layer.forward(x))
    }
    pub fn evaluate(&self, x: &Arr2d, t: &Arr2d) -> StepReport {
        let (_, cache) = self.forward(x.clone());
        StepReport {
            loss: self.loss_layer.get_loss(&cache, t),
            accuracy: accuracy(cache.output(), t),
        }
    }
    /// forward, backwardを一回ずつ行い、optimizerでパラメータを更新する
    pub fn train_step<O: Optimizer + ?Sized>(
        &mut self,
        x: &Arr2d,
        t: &Arr2d,
        optimizer: &mut O,
    ) -> Result<StepReport> {
        self.step(x, t, optimizer, None)
    }
    /// train_stepに加え、各レイヤーの勾配を有限差分で検証してログに出す
    pub fn train_step_checked<O: Optimizer + ?Sized>(
        &mut self,
        x: &Arr2d,
        t: &Arr2d,
        optimizer: &mut O,
        schedule: &Schedule,
        rng: &mut dyn RngCore,
    ) -> Result<StepReport> {
        self.step(x, t, optimizer, Some((schedule, rng)))
    }
    fn step<O: Optimizer + ?Sized>(
        &mut self,
        x: &Arr2d,
        t: &Arr2d,
        optimizer: &mut O,
        mut check: Option<(&Schedule, &mut dyn RngCore)>,
    ) -> Result<StepReport> {
        let (caches, cache) = self.forward(x.clone());
        let report = StepReport {
            loss: self.loss_layer.get_loss(&cache, t),
            accuracy: accuracy(cache.output(), t),
        };
        let grads = match check.as_mut() {
            Some((schedule, rng)) => {
                self.loss_layer
                    .calculate_gradients_checked(cache, t, *schedule, &mut **rng)
                    .0
            }
            None => self.loss_layer.calculate_gradients(cache, t),
        };
        let mut dout = grads.grad_x;
        // 後ろのレイヤーから順に積む
        let mut thetas = vec![grads.theta];
        let mut grad_thetas = vec![grads.grad_theta];
        for (layer, cache) in izip!(self.layers.iter(), caches).rev() {
            let g = match check.as_mut() {
                Some((schedule, rng)) => {
                    layer.backward_checked(cache, &dout, *schedule, &mut **rng).0
                }
                None => layer.backward(cache, &dout),
            };
            dout = g.grad_x;
            thetas.push(g.theta);
            grad_thetas.push(g.grad_theta);
        }
        thetas.reverse();
        grad_thetas.reverse();
        let theta = concat(&thetas);
        let grad_theta = concat(&grad_thetas);
        let updated = optimizer.update(&theta, &grad_theta);
        self.update_theta(&updated)?;
        Ok(report)
    }
}

fn concat(parts: &[Arr1d]) -> Arr1d {
    parts.iter().flat_map(|p| p.iter().cloned()).collect()
}

/// output: (バッチ次元, ラベル次元), t: (ラベル次元, バッチ次元)
pub fn accuracy(output: &Arr2d, t: &Arr2d) -> f64 {
    let pred = reverse_one_hot(&output.t().to_owned());
    let target = reverse_one_hot(t);
    let hit = izip!(&pred, &target).filter(|(p, t)| p == t).count();
    hit as f64 / target.len() as f64
}

impl Params for Network {
    /// 前のレイヤーから順に、最後に損失層
    fn theta(&self) -> Arr1d {
        let mut parts: Vec<Arr1d> = self.layers.iter().map(|l| l.theta()).collect();
        parts.push(self.loss_layer.theta());
        concat(&parts)
    }
    fn update_theta(&mut self, params: &Arr1d) -> Result<Arr1d> {
        let mut rest = params.clone();
        for layer in self.layers.iter_mut() {
            rest = layer.update_theta(&rest)?;
        }
        self.loss_layer.update_theta(&rest)
    }
    fn param_len(&self) -> usize {
        self.layers.iter().map(|l| l.param_len()).sum::<usize>() + self.loss_layer.param_len()
    }
}

/// 列(サンプル)をランダムにbatch_size個、重複なく選ぶ
pub fn select_batch<R: Rng + ?Sized>(
    rng: &mut R,
    x: &Arr2d,
    t: &Arr2d,
    batch_size: usize,
) -> Result<(Arr2d, Arr2d)> {
    let data_len = x.ncols();
    if data_len == 0 {
        return Err(Error::EmptyDataset("no samples to select from".to_string()));
    }
    assert_eq!(data_len, t.ncols(), "data and labels must have the same length");
    let idx = random_index(rng, data_len);
    let batch_idx = &idx[..batch_size.min(data_len)];
    Ok((pickup_columns(x, batch_idx), pickup_columns(t, batch_idx)))
}
