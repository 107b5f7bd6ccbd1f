use crate::error::Result;
use crate::gradcheck::Schedule;
use crate::model::*;
use crate::optimizer::Optimizer;
use crate::types::Arr2d;
use rand::RngCore;
use tracing::info;

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub iterations: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// この回数ごとに訓練・テストの損失と精度を記録する
    pub eval_interval: usize,
    /// 評価のタイミングで、そのステップの勾配を有限差分で検証する
    pub grad_test: bool,
    pub schedule: Schedule,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            iterations: 1000,
            batch_size: 30,
            learning_rate: 0.1,
            eval_interval: 100,
            grad_test: false,
            schedule: Schedule::default(),
        }
    }
}

/// 評価のたびに一行ずつ増える
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    pub index: Vec<usize>,
    pub train_loss: Vec<f64>,
    pub train_accuracy: Vec<f64>,
    pub test_loss: Vec<f64>,
    pub test_accuracy: Vec<f64>,
}

impl History {
    fn push(&mut self, iter: usize, train: StepReport, test: StepReport) {
        self.index.push(iter);
        self.train_loss.push(train.loss);
        self.train_accuracy.push(train.accuracy);
        self.test_loss.push(test.loss);
        self.test_accuracy.push(test.accuracy);
    }
    pub fn len(&self) -> usize {
        self.index.len()
    }
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

pub struct Trainer<O: Optimizer> {
    pub model: Network,
    optimizer: O,
    config: TrainConfig,
    history: History,
}

impl<O: Optimizer> Trainer<O> {
    pub fn new(model: Network, optimizer: O, config: TrainConfig) -> Self {
        Self {
            model,
            optimizer,
            config,
            history: History::default(),
        }
    }
    pub fn history(&self) -> &History {
        &self.history
    }
    /// data: (データ次元, サンプル数), labels: (ラベル次元, サンプル数)のone-hot
    pub fn fit(
        &mut self,
        rng: &mut dyn RngCore,
        train: (&Arr2d, &Arr2d),
        test: (&Arr2d, &Arr2d),
    ) -> Result<&History> {
        let (x, t) = train;
        let eval_interval = self.config.eval_interval.max(1);
        self.history = History::default();
        //　評価までの間、ミニバッチの損失を平均する
        let mut total_loss = 0.0;
        let mut loss_count = 0;
        for iter in 1..=self.config.iterations {
            let (batch_x, batch_t) = select_batch(rng, x, t, self.config.batch_size)?;
            let evaluating = iter % eval_interval == 0;
            let report = if evaluating && self.config.grad_test {
                let schedule = self.config.schedule.clone();
                self.model
                    .train_step_checked(&batch_x, &batch_t, &mut self.optimizer, &schedule, rng)?
            } else {
                self.model
                    .train_step(&batch_x, &batch_t, &mut self.optimizer)?
            };
            total_loss += report.loss;
            loss_count += 1;
            if evaluating {
                let train_report = self.model.evaluate(x, t);
                let test_report = self.model.evaluate(test.0, test.1);
                info!(
                    "| iter {}/{} | batch loss {:.6} | train loss {:.6} acc {:.3} \
                     | test loss {:.6} acc {:.3}",
                    iter,
                    self.config.iterations,
                    total_loss / loss_count as f64,
                    train_report.loss,
                    train_report.accuracy,
                    test_report.loss,
                    test_report.accuracy
                );
                self.history.push(iter, train_report, test_report);
                total_loss = 0.0;
                loss_count = 0;
            }
        }
        Ok(&self.history)
    }
}
