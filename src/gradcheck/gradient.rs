use super::{ErrorSeries, Schedule};
use crate::math::inner;
use crate::types::Arr2d;
use crate::util::{normalize, random_direction};
use rand::Rng;

/// スカラー関数fの勾配gを検証する。fは検証したい変数以外を固定して
/// カリー化したものを渡す。
pub struct GradTest<F> {
    label: String,
    func: F,
    x0: Arr2d,
    direction: Arr2d,
    schedule: Schedule,
}

impl<F> GradTest<F>
where
    F: Fn(&Arr2d) -> f64,
{
    /// 摂動の方向はここで一度だけ決め、全ての反復で使い回す
    pub fn new<R: Rng + ?Sized>(
        label: &str,
        func: F,
        x0: Arr2d,
        schedule: Schedule,
        rng: &mut R,
    ) -> Self {
        let direction = random_direction(rng, x0.dim());
        Self::with_direction(label, func, x0, direction, schedule)
    }
    pub fn with_direction(
        label: &str,
        func: F,
        x0: Arr2d,
        direction: Arr2d,
        schedule: Schedule,
    ) -> Self {
        assert_eq!(x0.dim(), direction.dim(), "direction must match the operand");
        Self {
            label: label.to_string(),
            func,
            x0,
            direction: normalize(direction),
            schedule,
        }
    }
    /// gはx0における解析的な勾配(x0と同じ形)
    pub fn run(&self, grad: &Arr2d) -> ErrorSeries {
        assert_eq!(grad.dim(), self.x0.dim(), "gradient must match the operand");
        let mut series = ErrorSeries::new(&self.label);
        let f_x = (self.func)(&self.x0);
        let grad_d = inner(grad, &self.direction);
        for i in 0..self.schedule.iterations {
            let eps = self.schedule.step(i);
            let f_x_eps_d = (self.func)(&(&self.x0 + &(&self.direction * eps)));
            let zero = f_x_eps_d - f_x;
            let first = zero - eps * grad_d;
            series.push(eps, zero, first);
        }
        series
    }
}
