use crate::error::{Error, Result};
use crate::math::Derivative;
use crate::types::Arr2d;
use ndarray::{Axis, Zip};
use ndarray_stats::DeviationExt;
use std::fmt;
use std::str::FromStr;

/// 交差エントロピーのlogの中に足す値
pub const LOG_EPS: f64 = 1e-9;

/// 要素ごとの活性化関数。名前から一度だけ選び、以後は変えない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Identity,
    Sigmoid,
    Tanh,
    Relu,
    /// 特徴量の軸で正規化する。微分は対角成分s*(1-s)のみを使う近似。
    Softmax,
}

impl Activation {
    /// 活性化前の値zに適用する。feature_axisはSoftmaxの正規化にのみ使う。
    pub fn apply(&self, z: &Arr2d, feature_axis: Axis) -> Arr2d {
        match self {
            Activation::Identity => z.clone(),
            Activation::Sigmoid => sigmoid(z),
            Activation::Tanh => z.mapv(f64::tanh),
            Activation::Relu => z.mapv(|x| x.max(0.0)),
            Activation::Softmax => softmax(z, feature_axis),
        }
    }
    /// zにおける微分値(要素ごと)
    pub fn derivative(&self, z: &Arr2d, feature_axis: Axis) -> Arr2d {
        match self {
            Activation::Identity => Arr2d::ones(z.dim()),
            Activation::Sigmoid => sigmoid(z).dsigmoid(),
            Activation::Tanh => z.mapv(f64::tanh).dtanh(),
            Activation::Relu => z.mapv(|x| if x > 0.0 { 1.0 } else { 0.0 }),
            Activation::Softmax => softmax(z, feature_axis).dsigmoid(),
        }
    }
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Identity => "identity",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Relu => "relu",
            Activation::Softmax => "softmax",
        }
    }
}

impl FromStr for Activation {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "identity" | "linear" | "none" => Ok(Activation::Identity),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            "relu" => Ok(Activation::Relu),
            "softmax" => Ok(Activation::Softmax),
            _ => Err(Error::UnknownActivation(s.to_string())),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 出力層で使う損失関数。y_true, y_predは同じ形(バッチ次元, ラベル次元)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    LeastSquares,
    CrossEntropy,
}

impl Loss {
    pub fn apply(&self, y_true: &Arr2d, y_pred: &Arr2d) -> f64 {
        match self {
            Loss::LeastSquares => least_squares(y_true, y_pred),
            Loss::CrossEntropy => cross_entropy(y_true, y_pred),
        }
    }
    pub fn name(&self) -> &'static str {
        match self {
            Loss::LeastSquares => "Least Squares",
            Loss::CrossEntropy => "Cross Entropy",
        }
    }
}

impl FromStr for Loss {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_lowercase().replace(|c: char| c == '_' || c == '-', " ");
        match key.as_str() {
            "least squares" | "mse" => Ok(Loss::LeastSquares),
            "cross entropy" | "bce" => Ok(Loss::CrossEntropy),
            _ => Err(Error::UnknownLoss(s.to_string())),
        }
    }
}

impl fmt::Display for Loss {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn sigmoid(z: &Arr2d) -> Arr2d {
    z.mapv(|a| 1.0 / (1.0 + (-a).exp()))
}

/// feature_axis方向に和が1になるよう正規化する
pub fn softmax(z: &Arr2d, feature_axis: Axis) -> Arr2d {
    // オーバーフローしないよう最大値を引いておく
    let max = z.fold_axis(feature_axis, f64::NEG_INFINITY, |m, &x| m.max(x));
    let e = (z - &max.insert_axis(feature_axis)).mapv(f64::exp);
    let sum = e.sum_axis(feature_axis);
    e / &sum.insert_axis(feature_axis)
}

/// 0.5 * ||y_pred - y_true||^2
pub fn least_squares(y_true: &Arr2d, y_pred: &Arr2d) -> f64 {
    0.5 * y_pred
        .sq_l2_dist(y_true)
        .expect("least_squares: y_true and y_pred must have the same shape")
}

/// 全要素についての二値交差エントロピーの平均
pub fn cross_entropy(y_true: &Arr2d, y_pred: &Arr2d) -> f64 {
    assert_eq!(y_true.dim(), y_pred.dim(), "cross_entropy: shape mismatch");
    let mut total = 0.0;
    Zip::from(y_true).and(y_pred).apply(|&t, &p| {
        total += t * (p + LOG_EPS).ln() + (1.0 - t) * (1.0 - p + LOG_EPS).ln();
    });
    -total / y_true.len() as f64
}
