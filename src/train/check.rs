use crate::error::Result;
use crate::functions::{Activation, Loss};
use crate::gradcheck::{ErrorSeries, JacTest, Role, Schedule, Verdict};
use crate::io::Save;
use crate::layers::{AffineLayer, ResLoss};
use crate::util::*;
use rand::Rng;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub input_dim: usize,
    /// 隠れ層の出力次元。損失層の次元(=ラベル数)にも使う
    pub output_dim: usize,
    pub batch_size: usize,
    pub schedule: Schedule,
    /// 指定があれば誤差曲線をcsvで書き出す
    pub out_dir: Option<PathBuf>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            input_dim: 4,
            output_dim: 3,
            batch_size: 5,
            schedule: Schedule::default(),
            out_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    /// "sigmoid" や "Cross Entropy" など
    pub layer: String,
    /// "jacobian" か "gradient"
    pub kind: &'static str,
    pub series: ErrorSeries,
    pub verdict: Verdict,
}

impl CheckResult {
    fn new(layer: &str, kind: &'static str, series: ErrorSeries, schedule: &Schedule) -> Self {
        let verdict = series.verdict(schedule.accept_order);
        Self {
            layer: layer.to_string(),
            kind,
            series,
            verdict,
        }
    }
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.csv",
            self.layer.to_lowercase().replace(' ', "_"),
            self.kind,
            self.series.label
        )
    }
}

const HIDDEN_ACTIVATIONS: [Activation; 3] =
    [Activation::Identity, Activation::Sigmoid, Activation::Tanh];
const OUTPUT_LAYERS: [(Loss, Activation); 2] = [
    (Loss::LeastSquares, Activation::Identity),
    (Loss::CrossEntropy, Activation::Sigmoid),
];

/// 隠れ層のヤコビアンと勾配、損失層の勾配をすべて検証する。
/// 隠れ層は活性化関数ごとに一つと、tanhのresidual層を一つ
pub fn run_all<R: Rng + ?Sized>(rng: &mut R, config: &CheckConfig) -> Result<Vec<CheckResult>> {
    let schedule = &config.schedule;
    let mut layers: Vec<AffineLayer> = HIDDEN_ACTIVATIONS
        .iter()
        .map(|&act| AffineLayer::new(&mut *rng, act, config.input_dim, config.output_dim))
        .collect();
    layers.push(AffineLayer::new_residual(rng, Activation::Tanh, config.output_dim));

    let mut results = Vec::new();
    for layer in &layers {
        let label = layer.label();
        // 一サンプルでのヤコビアン
        let x = uniform_arr2d(rng, layer.input_dim(), 1);
        let jac = layer.jacobians(&x);
        let f_x = layer.fn_of_input();
        let jac_x = JacTest::new(Role::Input, f_x, x.clone(), schedule.clone(), rng);
        let jac_w = JacTest::new(
            Role::Weights,
            layer.fn_of_weights(x.clone()),
            layer.w().clone(),
            schedule.clone(),
            rng,
        );
        let jac_b = JacTest::new(
            Role::Biases,
            layer.fn_of_biases(x),
            layer.b().clone(),
            schedule.clone(),
            rng,
        );
        for series in vec![jac_x.run(&jac.x), jac_w.run(&jac.w), jac_b.run(&jac.b)] {
            results.push(CheckResult::new(&label, "jacobian", series, schedule));
        }
        // バッチでのbackward
        let input = uniform_arr2d(rng, layer.input_dim(), config.batch_size);
        let next_grad = uniform_arr2d(rng, layer.output_dim(), config.batch_size);
        let (_, cache) = layer.forward(input);
        let (_, series) = layer.backward_checked(cache, &next_grad, schedule, rng);
        for s in series {
            results.push(CheckResult::new(&label, "gradient", s, schedule));
        }
    }
    for &(loss, act) in OUTPUT_LAYERS.iter() {
        let layer = ResLoss::new(rng, loss, act, config.output_dim);
        let input = uniform_arr2d(rng, config.output_dim, config.batch_size);
        let labels: Vec<usize> = (0..config.batch_size)
            .map(|_| rng.gen_range(0, config.output_dim))
            .collect();
        let y_true = convert_one_hot(&labels, config.output_dim);
        let cache = layer.forward(input);
        let (_, series) = layer.calculate_gradients_checked(cache, &y_true, schedule, rng);
        for s in series {
            results.push(CheckResult::new(loss.name(), "gradient", s, schedule));
        }
    }
    for r in &results {
        if r.kind == "jacobian" {
            let first = r.series.first_order_rate().unwrap_or(std::f64::NAN);
            if r.verdict.passed() {
                info!(
                    layer = %r.layer,
                    operand = %r.series.label,
                    first_order = first,
                    "jacobian test {}",
                    r.verdict
                );
            } else {
                warn!(
                    layer = %r.layer,
                    operand = %r.series.label,
                    first_order = first,
                    "jacobian test {}",
                    r.verdict
                );
            }
        }
    }
    if let Some(dir) = &config.out_dir {
        fs::create_dir_all(dir)?;
        for r in &results {
            r.series.save_as_csv(dir.join(r.file_name()))?;
        }
        info!("wrote {} error curves to {}", results.len(), dir.display());
    }
    Ok(results)
}

/// 結果を表にする
pub fn summary(results: &[CheckResult]) -> String {
    let mut s = format!(
        "{:<16}{:<10}{:<4}{:>10}{:>10}  {}\n",
        "layer", "kind", "op", "zero", "first", "verdict"
    );
    for r in results {
        let fmt_rate = |rate: Option<f64>| match rate {
            Some(v) => format!("{:.3}", v),
            None => "-".to_string(),
        };
        s += &format!(
            "{:<16}{:<10}{:<4}{:>10}{:>10}  {}\n",
            r.layer,
            r.kind,
            r.series.label,
            fmt_rate(r.series.zero_order_rate()),
            fmt_rate(r.series.first_order_rate()),
            r.verdict
        );
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn runs_every_check() {
        let mut rng = StdRng::seed_from_u64(2);
        let results = run_all(&mut rng, &CheckConfig::default()).unwrap();
        // 隠れ層4つ x (ヤコビアン3 + 勾配3) + 損失層2種 x 勾配3
        assert_eq!(results.len(), 4 * 6 + 2 * 3);
        for r in &results {
            assert!(r.verdict.passed(), "{} {} {}", r.layer, r.kind, r.series.label);
        }
        assert!(results.iter().any(|r| r.layer == "tanh residual"));
        let table = summary(&results);
        assert_eq!(table.lines().count(), results.len() + 1);
    }

    #[test]
    fn every_check_passes_across_seeds() {
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let results = run_all(&mut rng, &CheckConfig::default()).unwrap();
            for r in &results {
                assert!(
                    r.verdict.passed(),
                    "seed {}: {} {} {} {:?}",
                    seed,
                    r.layer,
                    r.kind,
                    r.series.label,
                    r.series.first_order
                );
            }
        }
    }

    #[test]
    fn writes_curves() {
        let mut rng = StdRng::seed_from_u64(3);
        let dir = std::env::temp_dir().join(format!("dlgrad_check_{}", std::process::id()));
        let config = CheckConfig {
            schedule: Schedule::with_iterations(6),
            out_dir: Some(dir.clone()),
            ..CheckConfig::default()
        };
        let results = run_all(&mut rng, &config).unwrap();
        assert_eq!(results[0].file_name(), "identity_jacobian_X.csv");
        assert!(results
            .iter()
            .any(|r| r.file_name() == "tanh_residual_gradient_X.csv"));
        for r in &results {
            assert!(dir.join(r.file_name()).exists());
        }
        fs::remove_dir_all(&dir).unwrap();
    }
}
