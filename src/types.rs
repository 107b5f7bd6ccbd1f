extern crate ndarray;
use ndarray::{Array1, Array2};
// 有限差分の誤差がf32の丸め誤差に埋もれるので、f64で計算する
pub type Arr1d = Array1<f64>;
pub type Arr2d = Array2<f64>;
