use super::{report, Gradients, Params};
use crate::error::Result;
use crate::functions::{cross_entropy, least_squares, Activation, Loss};
use crate::gradcheck::{ErrorSeries, GradTest, Schedule};
use crate::types::{Arr1d, Arr2d};
use crate::util::*;
use ndarray::Axis;
use rand::Rng;

/// 出力は(バッチ次元, ラベル次元)の向き
const FEATURE_AXIS: Axis = Axis(1);

/// forwardの結果。get_lossで何度でも参照でき、calculate_gradientsで消費される
pub struct ResLossCache {
    input: Arr2d,
    output: Arr2d,
    batch_size: usize,
}

impl ResLossCache {
    /// (バッチ次元, ラベル次元)の予測値
    pub fn output(&self) -> &Arr2d {
        &self.output
    }
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// 最終層。アフィン変換の結果に入力をそのまま足し(残差接続)、
/// 交差エントロピーのときだけ活性化関数をかけて損失をとる。
pub struct ResLoss {
    loss: Loss,
    activation: Activation,
    /// (入力次元, ラベル次元)。入力次元とラベル次元は等しい
    w: Arr2d,
    /// (1, ラベル次元)
    b: Arr2d,
}

/// x: (dim, バッチ次元)から(バッチ次元, dim)の出力を計算する
fn output_of(loss: Loss, activation: Activation, x: &Arr2d, w: &Arr2d, b: &Arr2d) -> Arr2d {
    let z = x.t().dot(w) + b; // バイアスは各行に足す
    let residual = &x.t() + &z;
    match loss {
        Loss::CrossEntropy => activation.apply(&residual, FEATURE_AXIS),
        Loss::LeastSquares => residual,
    }
}

/// calculate_gradientsが厳密な勾配を返す目的関数。
/// 二乗誤差は損失をバッチサイズで割ったもの、交差エントロピーは
/// 要素ごとの損失の和をバッチサイズで割ったもの
pub fn objective(loss: Loss, y_true_t: &Arr2d, output: &Arr2d) -> f64 {
    let batch_size = output.nrows() as f64;
    match loss {
        Loss::LeastSquares => least_squares(y_true_t, output) / batch_size,
        Loss::CrossEntropy => {
            cross_entropy(y_true_t, output) * output.len() as f64 / batch_size
        }
    }
}

impl ResLoss {
    pub fn new<R: Rng + ?Sized>(
        rng: &mut R,
        loss: Loss,
        activation: Activation,
        dim: usize,
    ) -> Self {
        let w = uniform_arr2d(rng, dim, dim);
        let b = uniform_arr2d(rng, 1, dim);
        Self {
            loss,
            activation,
            w,
            b,
        }
    }
    /// 名前が分からなければここでエラーにする
    pub fn from_names<R: Rng + ?Sized>(
        rng: &mut R,
        loss_name: &str,
        activation_name: &str,
        dim: usize,
    ) -> Result<Self> {
        let loss: Loss = loss_name.parse()?;
        let activation: Activation = activation_name.parse()?;
        Ok(Self::new(rng, loss, activation, dim))
    }
    pub fn dim(&self) -> usize {
        self.w.nrows()
    }
    pub fn loss(&self) -> Loss {
        self.loss
    }
    /// x: (dim, バッチ次元)
    pub fn forward(&self, x: Arr2d) -> ResLossCache {
        let output = output_of(self.loss, self.activation, &x, &self.w, &self.b);
        ResLossCache {
            batch_size: x.ncols(),
            input: x,
            output,
        }
    }
    /// y_true: (ラベル次元, バッチ次元)
    pub fn get_loss(&self, cache: &ResLossCache, y_true: &Arr2d) -> f64 {
        self.loss.apply(&y_true.t().to_owned(), &cache.output)
    }
    pub fn calculate_gradients(&self, cache: ResLossCache, y_true: &Arr2d) -> Gradients {
        assert_eq!(
            y_true.t().dim(),
            cache.output.dim(),
            "labels do not match the cached forward pass"
        );
        let d_loss_out = (&cache.output - &y_true.t()) / cache.batch_size as f64;
        // 残差接続の分として単位行列を足す
        let grad_x = (Arr2d::eye(self.dim()) + &self.w).dot(&d_loss_out.t());
        let grad_w = cache.input.dot(&d_loss_out);
        let grad_b = d_loss_out.sum_axis(Axis(0)).insert_axis(Axis(0));
        Gradients {
            grad_theta: flatten_params(&grad_w, &grad_b),
            theta: self.theta(),
            grad_x,
            grad_w,
            grad_b,
        }
    }
    /// calculate_gradientsに加えて、W, b, xについての勾配を有限差分で検証する
    pub fn calculate_gradients_checked<R: Rng + ?Sized>(
        &self,
        cache: ResLossCache,
        y_true: &Arr2d,
        schedule: &Schedule,
        rng: &mut R,
    ) -> (Gradients, Vec<ErrorSeries>) {
        let input = cache.input.clone();
        let grads = self.calculate_gradients(cache, y_true);
        let test_w = GradTest::new(
            "W",
            self.loss_fn_of_weights(input.clone(), y_true),
            self.w.clone(),
            schedule.clone(),
            rng,
        );
        let test_b = GradTest::new(
            "B",
            self.loss_fn_of_biases(input.clone(), y_true),
            self.b.clone(),
            schedule.clone(),
            rng,
        );
        let test_x = GradTest::new(
            "X",
            self.loss_fn_of_input(y_true),
            input,
            schedule.clone(),
            rng,
        );
        let series = vec![
            test_w.run(&grads.grad_w),
            test_b.run(&grads.grad_b),
            test_x.run(&grads.grad_x),
        ];
        for s in &series {
            report(s, schedule, self.loss.name());
        }
        (grads, series)
    }
    /// 入力の関数とみなした目的関数。W, bは現在の値、ラベルはy_trueで固定
    pub fn loss_fn_of_input(&self, y_true: &Arr2d) -> impl Fn(&Arr2d) -> f64 {
        let (loss, act) = (self.loss, self.activation);
        let (w, b) = (self.w.clone(), self.b.clone());
        let y_t = y_true.t().to_owned();
        move |x: &Arr2d| objective(loss, &y_t, &output_of(loss, act, x, &w, &b))
    }
    pub fn loss_fn_of_weights(&self, input: Arr2d, y_true: &Arr2d) -> impl Fn(&Arr2d) -> f64 {
        let (loss, act) = (self.loss, self.activation);
        let b = self.b.clone();
        let y_t = y_true.t().to_owned();
        move |w: &Arr2d| objective(loss, &y_t, &output_of(loss, act, &input, w, &b))
    }
    pub fn loss_fn_of_biases(&self, input: Arr2d, y_true: &Arr2d) -> impl Fn(&Arr2d) -> f64 {
        let (loss, act) = (self.loss, self.activation);
        let w = self.w.clone();
        let y_t = y_true.t().to_owned();
        move |b: &Arr2d| objective(loss, &y_t, &output_of(loss, act, &input, &w, b))
    }
}

impl Params for ResLoss {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradcheck::Verdict;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn labels(dim: usize, batch: usize) -> Arr2d {
        let ids: Vec<usize> = (0..batch).map(|i| (i * 7 + 3) % dim).collect();
        convert_one_hot(&ids, dim)
    }

    #[test]
    fn unknown_names_fail_at_construction() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(ResLoss::from_names(&mut rng, "Hinge", "sigmoid", 4).is_err());
        assert!(ResLoss::from_names(&mut rng, "Cross Entropy", "gelu", 4).is_err());
        let layer = ResLoss::from_names(&mut rng, "Least Squares", "sigmoid", 4).unwrap();
        assert_eq!(layer.loss(), Loss::LeastSquares);
    }

    #[test]
    fn forward_shape_regardless_of_loss() {
        let mut rng = StdRng::seed_from_u64(1);
        for loss in [Loss::LeastSquares, Loss::CrossEntropy].iter() {
            let layer = ResLoss::new(&mut rng, *loss, Activation::Sigmoid, 4);
            let x = uniform_arr2d(&mut rng, 4, 5);
            let cache = layer.forward(x);
            assert_eq!(cache.output().dim(), (5, 4));
            assert_eq!(cache.batch_size(), 5);
        }
    }

    #[test]
    fn least_squares_output_has_no_activation() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut layer = ResLoss::new(&mut rng, Loss::LeastSquares, Activation::Sigmoid, 2);
        let params = Arr1d::from(vec![0.0, 0.0, 0.0, 0.0, 1.0, -2.0]);
        layer.update_theta(&params).unwrap();
        let x = Arr2d::from_shape_vec((2, 1), vec![3.0, 4.0]).unwrap();
        // W = 0 なので出力は xᵗ + b
        let cache = layer.forward(x);
        assert_eq!(cache.output(), &Arr2d::from_shape_vec((1, 2), vec![4.0, 2.0]).unwrap());
    }

    #[test]
    fn loss_is_catalog_loss_of_transposed_labels() {
        let mut rng = StdRng::seed_from_u64(3);
        let layer = ResLoss::new(&mut rng, Loss::CrossEntropy, Activation::Sigmoid, 3);
        let x = uniform_arr2d(&mut rng, 3, 6);
        let y = labels(3, 6);
        let cache = layer.forward(x);
        let loss = layer.get_loss(&cache, &y);
        assert!(loss >= 0.0);
        assert_abs_diff_eq!(loss, cross_entropy(&y.t().to_owned(), cache.output()));
    }

    #[test]
    fn gradients_shapes() {
        let mut rng = StdRng::seed_from_u64(4);
        let layer = ResLoss::new(&mut rng, Loss::LeastSquares, Activation::Identity, 4);
        let x = uniform_arr2d(&mut rng, 4, 5);
        let y = labels(4, 5);
        let grads = layer.calculate_gradients(layer.forward(x), &y);
        assert_eq!(grads.grad_x.dim(), (4, 5));
        assert_eq!(grads.grad_w.dim(), (4, 4));
        assert_eq!(grads.grad_b.dim(), (1, 4));
        assert_eq!(grads.grad_theta.len(), 20);
        assert_eq!(grads.theta, layer.theta());
    }

    #[test]
    fn least_squares_gradients_pass() {
        let mut rng = StdRng::seed_from_u64(5);
        let layer = ResLoss::new(&mut rng, Loss::LeastSquares, Activation::Sigmoid, 3);
        let x = uniform_arr2d(&mut rng, 3, 4);
        let y = labels(3, 4);
        let (_, series) =
            layer.calculate_gradients_checked(layer.forward(x), &y, &Schedule::default(), &mut rng);
        for s in &series {
            assert_eq!(s.verdict(1.5), Verdict::Pass, "{}", s.label);
            assert_abs_diff_eq!(s.first_order_rate().unwrap(), 2.0, epsilon = 0.05);
        }
    }

    #[test]
    fn cross_entropy_gradients_pass() {
        let mut rng = StdRng::seed_from_u64(6);
        let layer = ResLoss::new(&mut rng, Loss::CrossEntropy, Activation::Sigmoid, 3);
        let x = uniform_arr2d(&mut rng, 3, 4);
        let y = labels(3, 4);
        let (_, series) =
            layer.calculate_gradients_checked(layer.forward(x), &y, &Schedule::default(), &mut rng);
        for s in &series {
            assert_eq!(s.verdict(1.5), Verdict::Pass, "{}", s.label);
        }
    }

    #[test]
    fn all_ones_residual_term_is_not_the_gradient() {
        let mut rng = StdRng::seed_from_u64(7);
        let layer = ResLoss::new(&mut rng, Loss::LeastSquares, Activation::Identity, 3);
        let x = uniform_arr2d(&mut rng, 3, 2);
        let y = labels(3, 2);
        let cache = layer.forward(x.clone());
        let d_loss_out = (cache.output() - &y.t()) / 2.0;
        let ones_grad_x = (Arr2d::ones((3, 3)) + &layer.w).dot(&d_loss_out.t());
        let grads = layer.calculate_gradients(cache, &y);
        // 二つの勾配の差の方向に摂動すれば、差は必ず1次の誤差に現れる
        let direction = &ones_grad_x - &grads.grad_x;
        let test = GradTest::with_direction(
            "X",
            layer.loss_fn_of_input(&y),
            x,
            direction,
            Schedule::default(),
        );
        assert_eq!(test.run(&grads.grad_x).verdict(1.5), Verdict::Pass);
        assert_eq!(test.run(&ones_grad_x).verdict(1.5), Verdict::Fail);
    }

    #[test]
    fn sgd_step_consistency() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut layer = ResLoss::new(&mut rng, Loss::LeastSquares, Activation::Identity, 3);
        let x = uniform_arr2d(&mut rng, 3, 4);
        let y = labels(3, 4);
        let grads = layer.calculate_gradients(layer.forward(x), &y);
        let lr = 0.05;
        let expected_w = &layer.w - &(&grads.grad_w * lr);
        let expected_b = &layer.b - &(&grads.grad_b * lr);
        let rest = layer
            .update_theta(&(&grads.theta - &(&grads.grad_theta * lr)))
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(layer.w, expected_w);
        assert_eq!(layer.b, expected_b);
    }
}
