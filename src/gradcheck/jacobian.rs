use super::{ErrorSeries, Schedule};
use crate::math::Norm;
use crate::types::Arr2d;
use crate::util::random_direction;
use ndarray::Axis;
use rand::Rng;
use std::fmt;

/// どの変数についてのヤコビアンか。表現の仕方が変数ごとに違う。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// (出力次元, 入力次元)の普通の行列
    Input,
    /// 出力の各行iについて、d f_i / d W_ij を並べた(出力次元, 入力次元)の行列
    Weights,
    /// 対角成分だけを(出力次元, 1)に並べたもの
    Biases,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Role::Input => f.write_str("X"),
            Role::Weights => f.write_str("W"),
            Role::Biases => f.write_str("B"),
        }
    }
}

impl Role {
    /// ヤコビアンとベクトルの積。密な3階テンソルを作らずに同じ値を得る
    pub fn jac_m_v(&self, jac: &Arr2d, v: &Arr2d) -> Arr2d {
        match self {
            Role::Input => jac.dot(v),
            Role::Weights => (v * jac).sum_axis(Axis(1)).insert_axis(Axis(1)),
            Role::Biases => jac * v,
        }
    }
}

/// ベクトル値関数fのヤコビアンを検証する
pub struct JacTest<F> {
    role: Role,
    func: F,
    x0: Arr2d,
    direction: Arr2d,
    schedule: Schedule,
}

impl<F> JacTest<F>
where
    F: Fn(&Arr2d) -> Arr2d,
{
    pub fn new<R: Rng + ?Sized>(
        role: Role,
        func: F,
        x0: Arr2d,
        schedule: Schedule,
        rng: &mut R,
    ) -> Self {
        let direction = random_direction(rng, x0.dim());
        Self {
            role,
            func,
            x0,
            direction,
            schedule,
        }
    }
    pub fn run(&self, jac: &Arr2d) -> ErrorSeries {
        let mut series = ErrorSeries::new(&self.role.to_string());
        let f_x = (self.func)(&self.x0);
        for i in 0..self.schedule.iterations {
            let eps = self.schedule.step(i);
            let eps_d = &self.direction * eps;
            let f_x_eps_d = (self.func)(&(&self.x0 + &eps_d));
            let diff = &f_x_eps_d - &f_x;
            let zero = diff.norm();
            let first = (diff - self.role.jac_m_v(jac, &eps_d)).norm();
            series.push(eps, zero, first);
        }
        series
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradcheck::Verdict;
    use crate::math::inner;
    use crate::util::normalize;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, Array3};

    #[test]
    fn contractions_match_dense() {
        // f(W) = W x なら d f_i / d W_kj = delta_ik x_j
        let x = arr2(&[[1.0], [-2.0], [0.5]]);
        let v = arr2(&[[0.1, 0.2, 0.3], [-0.4, 0.5, 0.6]]);
        let per_row = Arr2d::from_shape_fn((2, 3), |(_, j)| x[[j, 0]]);
        let dense = Array3::from_shape_fn((2, 2, 3), |(i, k, j)| {
            if i == k {
                x[[j, 0]]
            } else {
                0.0
            }
        });
        let expected = Arr2d::from_shape_fn((2, 1), |(i, _)| {
            inner(&dense.index_axis(Axis(0), i).to_owned(), &v)
        });
        assert_abs_diff_eq!(Role::Weights.jac_m_v(&per_row, &v), expected, epsilon = 1e-12);

        let jac = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        let u = arr2(&[[1.0], [1.0]]);
        assert_eq!(Role::Input.jac_m_v(&jac, &u), arr2(&[[3.0], [7.0]]));
        let diag = arr2(&[[2.0], [3.0]]);
        assert_eq!(Role::Biases.jac_m_v(&diag, &u), arr2(&[[2.0], [3.0]]));
    }

    #[test]
    fn elementwise_map_jacobian() {
        // f(x) = tanh(A x), J = diag(1 - tanh^2) A
        let a = arr2(&[[0.5, -0.3], [0.2, 0.9], [1.0, 0.1]]);
        let x0 = arr2(&[[0.4], [-0.7]]);
        let f = {
            let a = a.clone();
            move |x: &Arr2d| a.dot(x).mapv(f64::tanh)
        };
        let dz = a.dot(&x0).mapv(|z| 1.0 - z.tanh().powi(2));
        let jac = &a * &dz;
        let test = JacTest {
            role: Role::Input,
            func: f,
            x0,
            direction: normalize(arr2(&[[1.0], [1.0]])),
            schedule: Schedule::default(),
        };
        let series = test.run(&jac);
        assert_eq!(series.label, "X");
        assert_eq!(series.verdict(1.5), Verdict::Pass);
        assert!(series.zero_order_rate().unwrap() < 1.2);

        let series = test.run(&Arr2d::zeros((3, 2)));
        assert_eq!(series.verdict(1.5), Verdict::Fail);
    }
}
