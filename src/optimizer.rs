use crate::types::Arr1d;
use std::str::FromStr;

/// ネットワーク全体のパラメータを一本にしたthetaと、同じ並びの勾配から、
/// 更新後のthetaを計算する
pub trait Optimizer {
    fn update(&mut self, theta: &Arr1d, grad: &Arr1d) -> Arr1d;
}

pub struct SGD {
    pub lr: f64,
}
impl Optimizer for SGD {
    fn update(&mut self, theta: &Arr1d, grad: &Arr1d) -> Arr1d {
        theta - &(grad * self.lr)
    }
}

#[derive(Default)]
pub struct AdaGrad {
    lr: f64,
    h: Arr1d,
}
impl AdaGrad {
    pub fn new(lr: f64) -> Self {
        AdaGrad {
            lr,
            ..AdaGrad::default()
        }
    }
}
impl Optimizer for AdaGrad {
    fn update(&mut self, theta: &Arr1d, grad: &Arr1d) -> Arr1d {
        if self.h.len() != grad.len() {
            self.h = Arr1d::zeros(grad.len());
        }
        self.h += &(grad * grad);
        theta - &(grad * self.lr / (self.h.mapv(f64::sqrt) + 1e-7))
    }
}

#[derive(Default)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    iter: i32,
    m: Arr1d,
    v: Arr1d,
}
impl Adam {
    /// use default lr=0.001, beta1=0.9, beta2=0.999
    pub fn new(lr: f64, beta1: f64, beta2: f64) -> Self {
        Adam {
            lr,
            beta1,
            beta2,
            ..Adam::default()
        }
    }
}
impl Optimizer for Adam {
    fn update(&mut self, theta: &Arr1d, grad: &Arr1d) -> Arr1d {
        if self.m.len() != grad.len() {
            self.m = Arr1d::zeros(grad.len());
            self.v = Arr1d::zeros(grad.len());
        }
        self.iter += 1;
        let lr_t = self.lr * (1.0 - self.beta2.powi(self.iter)).sqrt()
            / (1.0 - self.beta1.powi(self.iter));
        self.m += &((grad - &self.m) * (1.0 - self.beta1));
        self.v += &((grad.mapv(|x| x.powi(2)) - &self.v) * (1.0 - self.beta2));
        theta - &(&self.m * lr_t / (self.v.mapv(f64::sqrt) + 1e-7))
    }
}

/// コマンドラインから選ぶ用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    Sgd,
    AdaGrad,
    Adam,
}

impl OptimizerKind {
    pub fn build(&self, lr: f64) -> Box<dyn Optimizer> {
        match self {
            OptimizerKind::Sgd => Box::new(SGD { lr }),
            OptimizerKind::AdaGrad => Box::new(AdaGrad::new(lr)),
            OptimizerKind::Adam => Box::new(Adam::new(lr, 0.9, 0.999)),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sgd" => Ok(OptimizerKind::Sgd),
            "adagrad" => Ok(OptimizerKind::AdaGrad),
            "adam" => Ok(OptimizerKind::Adam),
            _ => Err(format!("unknown optimizer: {}", s)),
        }
    }
}

impl<O: Optimizer + ?Sized> Optimizer for Box<O> {
    fn update(&mut self, theta: &Arr1d, grad: &Arr1d) -> Arr1d {
        (**self).update(theta, grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn sgd_step() {
        let mut sgd = SGD { lr: 0.5 };
        let theta = sgd.update(&arr1(&[1.0, 2.0]), &arr1(&[2.0, -4.0]));
        assert_eq!(theta, arr1(&[0.0, 4.0]));
    }

    #[test]
    fn adagrad_first_step_is_sign_times_lr() {
        let mut ada = AdaGrad::new(0.1);
        let theta = ada.update(&arr1(&[0.0, 0.0]), &arr1(&[3.0, -0.5]));
        assert_abs_diff_eq!(theta, arr1(&[-0.1, 0.1]), epsilon = 1e-6);
    }

    #[test]
    fn adam_moves_against_gradient() {
        let mut adam = OptimizerKind::Adam.build(0.01);
        let theta = adam.update(&arr1(&[1.0, 1.0]), &arr1(&[1.0, -1.0]));
        assert!(theta[0] < 1.0 && theta[1] > 1.0);
        assert_eq!("ADAM".parse::<OptimizerKind>(), Ok(OptimizerKind::Adam));
        assert!("rmsprop".parse::<OptimizerKind>().is_err());
    }
}
