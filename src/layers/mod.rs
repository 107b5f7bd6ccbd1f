extern crate ndarray;
use crate::error::Result;
use crate::functions::Activation;
use crate::gradcheck::{ErrorSeries, GradTest, Schedule};
use crate::math::inner;
use crate::types::{Arr1d, Arr2d};
use crate::util::*;
use ndarray::Axis;
use rand::Rng;
use tracing::{info, warn};
pub mod loss_layer;

pub use loss_layer::{ResLoss, ResLossCache};

/// 隠れ層では(特徴量次元, バッチ次元)の向きで値を持つ
const FEATURE_AXIS: Axis = Axis(0);

/// backwardが返すもの。grad_thetaとthetaはoptimizerに渡す用
#[derive(Debug, Clone)]
pub struct Gradients {
    /// 前のレイヤーに渡す誤差
    pub grad_x: Arr2d,
    pub grad_w: Arr2d,
    pub grad_b: Arr2d,
    /// flatten(grad_w), flatten(grad_b)の順に並べたもの
    pub grad_theta: Arr1d,
    /// 現在のパラメータ。grad_thetaと同じ並び
    pub theta: Arr1d,
}

/// 学習されるパラメータを一本のベクトルとしてやりとりする
pub trait Params {
    fn theta(&self) -> Arr1d;
    /// 先頭から自分の分を取り出して上書きし、残りを返す
    fn update_theta(&mut self, params: &Arr1d) -> Result<Arr1d>;
    fn param_len(&self) -> usize;
}

/// forwardの結果、backwardに一度だけ渡せる。
pub struct AffineCache {
    input: Arr2d,
    z: Arr2d,
    batch_size: usize,
}

impl AffineCache {
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// 一入力点でのヤコビアン。表現はgradcheck::Roleのもの
#[derive(Debug, Clone)]
pub struct LayerJacobians {
    pub x: Arr2d,
    pub w: Arr2d,
    pub b: Arr2d,
}

/// 隠れ層。アフィン変換の後に活性化関数をかける。
/// residualならさらに入力をそのまま足す: act(Wx + b) + x
pub struct AffineLayer {
    /// (出力次元, 入力次元)
    w: Arr2d,
    /// (出力次元, 1)
    b: Arr2d,
    activation: Activation,
    residual: bool,
}

impl AffineLayer {
    pub fn new<R: Rng + ?Sized>(
        rng: &mut R,
        activation: Activation,
        input_dim: usize,
        output_dim: usize,
    ) -> Self {
        let w = uniform_arr2d(rng, output_dim, input_dim);
        let b = uniform_arr2d(rng, output_dim, 1);
        Self {
            w,
            b,
            activation,
            residual: false,
        }
    }
    /// 入力と出力の次元が同じ、スキップ接続つきの層
    pub fn new_residual<R: Rng + ?Sized>(rng: &mut R, activation: Activation, dim: usize) -> Self {
        Self {
            residual: true,
            ..Self::new(rng, activation, dim, dim)
        }
    }
    pub fn from_name<R: Rng + ?Sized>(
        rng: &mut R,
        activation: &str,
        input_dim: usize,
        output_dim: usize,
    ) -> Result<Self> {
        Ok(Self::new(rng, activation.parse::<Activation>()?, input_dim, output_dim))
    }
    pub fn input_dim(&self) -> usize {
        self.w.ncols()
    }
    pub fn output_dim(&self) -> usize {
        self.w.nrows()
    }
    pub fn activation(&self) -> Activation {
        self.activation
    }
    pub fn is_residual(&self) -> bool {
        self.residual
    }
    /// ログや結果の表で使う名前
    pub fn label(&self) -> String {
        if self.is_residual() {
            format!("{} residual", self.activation().name())
        } else {
            self.activation().name().to_string()
        }
    }
    pub fn w(&self) -> &Arr2d {
        &self.w
    }
    pub fn b(&self) -> &Arr2d {
        &self.b
    }
    /// (入力次元, バッチ次元)の入力に対し、(出力次元, バッチ次元)を返す
    pub fn forward(&self, input: Arr2d) -> (Arr2d, AffineCache) {
        let z = self.w.dot(&input) + &self.b; // バイアスはバッチ方向にブロードキャスト
        let mut result = self.activation.apply(&z, FEATURE_AXIS);
        if self.residual {
            result += &input;
        }
        let batch_size = input.ncols();
        (
            result,
            AffineCache {
                input,
                z,
                batch_size,
            },
        )
    }
    /// (出力次元, バッチ次元)で伝播してきた誤差に対し、各勾配を返す
    pub fn backward(&self, cache: AffineCache, next_grad: &Arr2d) -> Gradients {
        assert_eq!(
            next_grad.dim(),
            cache.z.dim(),
            "upstream gradient does not match the cached forward pass"
        );
        let layer_jac = self.activation.derivative(&cache.z, FEATURE_AXIS);
        let grad_b_per_sample = layer_jac * next_grad; // 活性化前の値についての勾配
        let grad_w = grad_b_per_sample.dot(&cache.input.t()); // バッチについて和をとる
        let mut grad_x = self.w.t().dot(&grad_b_per_sample);
        if self.residual {
            grad_x += next_grad;
        }
        let grad_b = grad_b_per_sample.sum_axis(Axis(1)).insert_axis(Axis(1));
        Gradients {
            grad_theta: flatten_params(&grad_w, &grad_b),
            theta: self.theta(),
            grad_x,
            grad_w,
            grad_b,
        }
    }
    /// backwardに加えて、得られた勾配を有限差分で検証してログに出す。
    /// <next_grad, layer(.)>の勾配がちょうどgrad_w, grad_b, grad_xになる
    pub fn backward_checked<R: Rng + ?Sized>(
        &self,
        cache: AffineCache,
        next_grad: &Arr2d,
        schedule: &Schedule,
        rng: &mut R,
    ) -> (Gradients, Vec<ErrorSeries>) {
        let input = cache.input.clone();
        let grads = self.backward(cache, next_grad);
        let f_w = self.fn_of_weights(input.clone());
        let g_w = |w: &Arr2d| inner(next_grad, &f_w(w));
        let test_w = GradTest::new("W", g_w, self.w.clone(), schedule.clone(), rng);
        let f_b = self.fn_of_biases(input.clone());
        let g_b = |b: &Arr2d| inner(next_grad, &f_b(b));
        let test_b = GradTest::new("B", g_b, self.b.clone(), schedule.clone(), rng);
        let f_x = self.fn_of_input();
        let g_x = |x: &Arr2d| inner(next_grad, &f_x(x));
        let test_x = GradTest::new("X", g_x, input, schedule.clone(), rng);

        let series = vec![
            test_w.run(&grads.grad_w),
            test_b.run(&grads.grad_b),
            test_x.run(&grads.grad_x),
        ];
        let label = self.label();
        for s in &series {
            report(s, schedule, &label);
        }
        (grads, series)
    }
    /// 入力の関数とみなしたforward。重みとバイアスは現在の値で固定
    pub fn fn_of_input(&self) -> impl Fn(&Arr2d) -> Arr2d {
        let (w, b) = (self.w.clone(), self.b.clone());
        let (act, residual) = (self.activation, self.residual);
        move |x: &Arr2d| {
            let out = act.apply(&(w.dot(x) + &b), FEATURE_AXIS);
            if residual {
                out + x
            } else {
                out
            }
        }
    }
    /// 入力を固定し、重みの関数とみなしたforward
    pub fn fn_of_weights(&self, input: Arr2d) -> impl Fn(&Arr2d) -> Arr2d {
        let (b, act) = (self.b.clone(), self.activation);
        let skip = self.skip_term(&input);
        move |w: &Arr2d| act.apply(&(w.dot(&input) + &b), FEATURE_AXIS) + &skip
    }
    pub fn fn_of_biases(&self, input: Arr2d) -> impl Fn(&Arr2d) -> Arr2d {
        let act = self.activation;
        let wx = self.w.dot(&input);
        let skip = self.skip_term(&input);
        move |b: &Arr2d| act.apply(&(&wx + b), FEATURE_AXIS) + &skip
    }
    /// 固定した入力に対して出力に足される項。residualでなければ0
    fn skip_term(&self, input: &Arr2d) -> Arr2d {
        if self.residual {
            input.clone()
        } else {
            Arr2d::zeros((self.output_dim(), input.ncols()))
        }
    }
    /// 入力x: (入力次元, 1)でのヤコビアン
    pub fn jacobians(&self, x: &Arr2d) -> LayerJacobians {
        assert_eq!(x.ncols(), 1, "jacobians are defined for a single sample");
        let z = self.w.dot(x) + &self.b;
        let dz = self.activation.derivative(&z, FEATURE_AXIS);
        let mut jac_x = &self.w * &dz;
        if self.residual {
            jac_x += &Arr2d::eye(self.output_dim());
        }
        LayerJacobians {
            x: jac_x,
            w: dz.dot(&x.t()),
            b: dz,
        }
    }
}

impl Params for AffineLayer {
    fn theta(&self) -> Arr1d {
        flatten_params(&self.w, &self.b)
    }
    fn update_theta(&mut self, params: &Arr1d) -> Result<Arr1d> {
        let (w, b, rest) = split_theta(params, self.w.dim(), self.b.dim())?;
        self.w = w;
        self.b = b;
        Ok(rest)
    }
    fn param_len(&self) -> usize {
        self.w.len() + self.b.len()
    }
}

/// 検証結果をログに出す。学習は止めない
pub(crate) fn report(series: &ErrorSeries, schedule: &Schedule, layer: &str) {
    let verdict = series.verdict(schedule.accept_order);
    let zero = series.zero_order_rate().unwrap_or(std::f64::NAN);
    let first = series.first_order_rate().unwrap_or(std::f64::NAN);
    if verdict.passed() {
        info!(
            layer,
            operand = %series.label,
            zero_order = zero,
            first_order = first,
            "gradient test {}",
            verdict
        );
    } else {
        warn!(
            layer,
            operand = %series.label,
            zero_order = zero,
            first_order = first,
            "gradient test {}",
            verdict
        );
    }
}
