//! 解析的に求めた勾配・ヤコビアンを、有限差分で検証する。
//!
//! 摂動の大きさを eps_i = eps0 * eps1^i と幾何級数的に小さくしていき、
//! 0次の誤差 |f(x+eps d) - f(x)| と、1次の誤差
//! |f(x+eps d) - f(x) - eps <g, d>| の減り方を比べる。
//! 勾配が正しければ前者は O(eps)、後者は O(eps^2) で小さくなる。
use itertools::izip;
use std::cmp::Ordering;
use std::fmt;

pub mod gradient;
pub mod jacobian;

pub use gradient::GradTest;
pub use jacobian::{JacTest, Role};

/// これより小さい誤差は丸め誤差とみなし、次数の推定に使わない
pub const NOISE_FLOOR: f64 = 1e-13;

/// 摂動の大きさの列と合否判定の閾値
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub eps0: f64,
    pub eps1: f64,
    pub iterations: usize,
    /// 1次の誤差の減衰次数がこれ以上なら合格
    pub accept_order: f64,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            eps0: 1.0,
            eps1: 0.5,
            iterations: 10,
            accept_order: 1.5,
        }
    }
}

impl Schedule {
    pub fn with_iterations(iterations: usize) -> Self {
        Self {
            iterations,
            ..Self::default()
        }
    }
    pub fn step(&self, i: usize) -> f64 {
        self.eps0 * self.eps1.powi(i as i32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        *self == Verdict::Pass
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("pass"),
            Verdict::Fail => f.write_str("FAIL"),
        }
    }
}

/// log|誤差|の列。添字がそのまま反復回数で、順番に意味がある。
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorSeries {
    pub label: String,
    pub steps: Vec<f64>,
    pub zero_order: Vec<f64>,
    pub first_order: Vec<f64>,
}

/// log(0)にならないよう、最小の正の数で下から抑える
fn log_abs(v: f64) -> f64 {
    v.abs().max(std::f64::MIN_POSITIVE).ln()
}

impl ErrorSeries {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            steps: Vec::new(),
            zero_order: Vec::new(),
            first_order: Vec::new(),
        }
    }
    /// 符号付き(またはノルムの)誤差をそのまま渡す
    pub fn push(&mut self, step: f64, zero: f64, first: f64) {
        self.steps.push(step);
        self.zero_order.push(log_abs(zero));
        self.first_order.push(log_abs(first));
    }
    pub fn len(&self) -> usize {
        self.steps.len()
    }
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
    pub fn zero_order_rate(&self) -> Option<f64> {
        self.rate(&self.zero_order)
    }
    pub fn first_order_rate(&self) -> Option<f64> {
        self.rate(&self.first_order)
    }
    /// 後半(漸近的な領域)の各反復での減衰次数
    /// log(e_i / e_i+1) / log(eps_i / eps_i+1) の中央値。
    /// 2次と3次の項が打ち消し合って誤差が一度0を横切っても、外れるのは
    /// その前後の二つだけなので中央値は動かない。
    /// 丸め誤差以下の点を含む反復は除く。一つも残らなければNone
    fn rate(&self, series: &[f64]) -> Option<f64> {
        let noise = NOISE_FLOOR.ln();
        let start = (self.len() / 2).saturating_sub(1);
        let mut orders: Vec<f64> = izip!(self.steps[start..].windows(2), series[start..].windows(2))
            .filter(|(_, e)| e[0] > noise && e[1] > noise)
            .map(|(s, e)| (e[0] - e[1]) / (s[0] / s[1]).ln())
            .collect();
        if orders.is_empty() {
            return None;
        }
        orders.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let mid = orders.len() / 2;
        if orders.len() % 2 == 0 {
            Some((orders[mid - 1] + orders[mid]) / 2.0)
        } else {
            Some(orders[mid])
        }
    }
    /// 1反復ごとに誤差が何分の1になったか
    pub fn decay_factors(series: &[f64]) -> Vec<f64> {
        series.windows(2).map(|w| (w[0] - w[1]).exp()).collect()
    }
    fn tail_at_noise(series: &[f64]) -> bool {
        let noise = NOISE_FLOOR.ln();
        series[series.len() / 2..].iter().all(|e| *e <= noise)
    }
    pub fn verdict(&self, accept_order: f64) -> Verdict {
        match self.first_order_rate() {
            Some(r) if r >= accept_order => Verdict::Pass,
            Some(_) => Verdict::Fail,
            // 1次の誤差が丸め誤差しか残っていない(fが線形な場合など)
            None if !self.is_empty() && Self::tail_at_noise(&self.first_order) => Verdict::Pass,
            None => Verdict::Fail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn series_from(zero: impl Fn(f64) -> f64, first: impl Fn(f64) -> f64) -> ErrorSeries {
        let schedule = Schedule::default();
        let mut s = ErrorSeries::new("t");
        for i in 0..schedule.iterations {
            let eps = schedule.step(i);
            s.push(eps, zero(eps), first(eps));
        }
        s
    }

    #[test]
    fn schedule_halves() {
        let s = Schedule::default();
        assert_abs_diff_eq!(s.step(0), 1.0);
        assert_abs_diff_eq!(s.step(3), 0.125);
    }

    #[test]
    fn rates_of_pure_powers() {
        let s = series_from(|e| 3.0 * e, |e| -0.7 * e * e);
        assert_abs_diff_eq!(s.zero_order_rate().unwrap(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s.first_order_rate().unwrap(), 2.0, epsilon = 1e-9);
        assert_eq!(s.verdict(1.5), Verdict::Pass);
        for f in ErrorSeries::decay_factors(&s.first_order) {
            assert_abs_diff_eq!(f, 4.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn linear_first_order_fails() {
        let s = series_from(|e| 2.0 * e, |e| 0.5 * e + e * e);
        assert!(s.first_order_rate().unwrap() < 1.2);
        assert_eq!(s.verdict(1.5), Verdict::Fail);
    }

    #[test]
    fn one_sign_change_in_the_tail_still_passes() {
        // e^2 - 30e^3 は eps = 1/30 で0を横切る
        let s = series_from(|e| 3.0 * e, |e| e * e - 30.0 * e * e * e);
        let rate = s.first_order_rate().unwrap();
        assert!(rate > 1.6 && rate < 2.1, "rate = {}", rate);
        assert_eq!(s.verdict(1.5), Verdict::Pass);
        // 1次の項が残っていれば、同じように0を横切っても通らない
        let wrong = series_from(|e| 3.0 * e, |e| 0.05 * e - e * e);
        assert_eq!(wrong.verdict(1.5), Verdict::Fail);
    }

    #[test]
    fn exact_zero_is_clamped_and_passes() {
        let s = series_from(|e| e, |_| 0.0);
        assert!(s.first_order.iter().all(|x| x.is_finite()));
        assert_eq!(s.first_order_rate(), None);
        assert_eq!(s.verdict(1.5), Verdict::Pass);
    }

    #[test]
    fn empty_series_fails() {
        assert_eq!(ErrorSeries::new("e").verdict(1.5), Verdict::Fail);
    }
}
