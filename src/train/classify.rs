use crate::error::{Error, Result};
use crate::io::{csv_to_array, Save};
use crate::model::{Network, NetworkConfig};
use crate::optimizer::OptimizerKind;
use crate::trainer::{History, TrainConfig, Trainer};
use crate::types::Arr2d;
use crate::util::*;
use rand::RngCore;
use std::path::PathBuf;
use tracing::info;

/// 学習データの出どころ
#[derive(Debug, Clone)]
pub enum DataSource {
    Spiral { per_class: usize, classes: usize },
    /// 一行一サンプルのcsv。tはone-hot
    Csv { x: PathBuf, t: PathBuf },
}

/// (データ次元, サンプル数), (ラベル次元, サンプル数)にそろえて返す
pub fn load(rng: &mut dyn RngCore, source: &DataSource) -> Result<(Arr2d, Arr2d)> {
    match source {
        DataSource::Spiral { per_class, classes } => Ok(spiral(rng, *per_class, *classes)),
        DataSource::Csv { x, t } => {
            let data = csv_to_array(x)?;
            let target = csv_to_array(t)?;
            if data.nrows() != target.nrows() {
                return Err(Error::EmptyDataset(format!(
                    "data has {} rows but labels have {}",
                    data.nrows(),
                    target.nrows()
                )));
            }
            Ok((data.reversed_axes(), target.reversed_axes()))
        }
    }
}

/// サンプルをシャッフルして、末尾のtest_ratio分をテスト用にする
pub fn split(
    rng: &mut dyn RngCore,
    x: &Arr2d,
    t: &Arr2d,
    test_ratio: f64,
) -> Result<((Arr2d, Arr2d), (Arr2d, Arr2d))> {
    let n = x.ncols();
    let n_test = ((n as f64) * test_ratio).round() as usize;
    if n_test == 0 || n_test >= n {
        return Err(Error::EmptyDataset(format!(
            "cannot split {} samples with test ratio {}",
            n, test_ratio
        )));
    }
    let idx = random_index(rng, n);
    let (train_idx, test_idx) = idx.split_at(n - n_test);
    Ok((
        (pickup_columns(x, train_idx), pickup_columns(t, train_idx)),
        (pickup_columns(x, test_idx), pickup_columns(t, test_idx)),
    ))
}

pub struct ClassifyConfig {
    pub source: DataSource,
    pub test_ratio: f64,
    pub network: NetworkConfig,
    pub train: TrainConfig,
    pub optimizer: OptimizerKind,
    pub history_out: Option<PathBuf>,
}

pub fn run(rng: &mut dyn RngCore, config: ClassifyConfig) -> Result<History> {
    let (x, t) = load(rng, &config.source)?;
    info!(
        "loaded {} samples, data dim {}, label dim {}",
        x.ncols(),
        x.nrows(),
        t.nrows()
    );
    let ((x_train, t_train), (x_test, t_test)) = split(rng, &x, &t, config.test_ratio)?;
    let model = Network::new(rng, x.nrows(), t.nrows(), &config.network);
    let optimizer = config.optimizer.build(config.train.learning_rate);
    let mut trainer = Trainer::new(model, optimizer, config.train);
    let history = trainer
        .fit(rng, (&x_train, &t_train), (&x_test, &t_test))?
        .clone();
    if let Some(path) = &config.history_out {
        history.save_as_csv(path)?;
        info!("wrote history to {}", path.display());
    }
    Ok(history)
}
