use ndarray::{Array, Dimension};

pub trait Derivative {
    fn dsigmoid(&self) -> Self;
    fn dtanh(&self) -> Self;
}
impl<D: Dimension> Derivative for Array<f64, D> {
    /// self = sigmoid(x)のとき、dself/dx = self*(1-self)となる
    fn dsigmoid(&self) -> Self {
        self * &(1.0 - self)
    }
    /// self = tanh(x)のとき、dself/dx = 1-self**2となる
    fn dtanh(&self) -> Self {
        1.0 - self * self
    }
}
pub trait Norm {
    fn norm2(&self) -> f64;
    fn norm(&self) -> f64 {
        self.norm2().sqrt()
    }
}
impl<D: Dimension> Norm for Array<f64, D> {
    fn norm2(&self) -> f64 {
        self.map(|x| x * x).sum()
    }
}

/// 二つの配列を同じ形のベクトルとみなしたときの内積
pub fn inner<D: Dimension>(a: &Array<f64, D>, b: &Array<f64, D>) -> f64 {
    (a * b).sum()
}
