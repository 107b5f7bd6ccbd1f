//! 勾配の検証と、小さな分類器の学習を行うコマンド
//!
//! ```text
//! dlgrad check --out-dir curves
//! dlgrad train --hidden 10 --loss cross_entropy --iterations 3000
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use dlgrad::functions::{Activation, Loss};
use dlgrad::gradcheck::Schedule;
use dlgrad::model::NetworkConfig;
use dlgrad::optimizer::OptimizerKind;
use dlgrad::train::check::{self, CheckConfig};
use dlgrad::train::classify::{self, ClassifyConfig, DataSource};
use dlgrad::trainer::TrainConfig;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "dlgrad")]
#[command(about = "Backprop classifier with finite-difference gradient checks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level: trace, debug, info, warn or error
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    /// Seed for every random draw
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Number of perturbation steps in a gradient test
    #[arg(long, default_value_t = 10)]
    grad_iterations: usize,

    /// Minimum decay order of the first-order error to pass
    #[arg(long, default_value_t = 1.5)]
    accept_order: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify every layer's Jacobians and gradients
    Check {
        #[arg(long, default_value_t = 4)]
        input_dim: usize,

        #[arg(long, default_value_t = 3)]
        output_dim: usize,

        #[arg(long, default_value_t = 5)]
        batch_size: usize,

        /// Write the error curves as csv into this directory
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Train a classifier on the spiral dataset or on csv files
    Train {
        /// Data csv, one sample per row
        #[arg(long, requires = "labels")]
        data: Option<PathBuf>,

        /// One-hot label csv, one sample per row
        #[arg(long, requires = "data")]
        labels: Option<PathBuf>,

        /// Samples per class of the generated spiral
        #[arg(long, default_value_t = 100)]
        per_class: usize,

        #[arg(long, default_value_t = 3)]
        classes: usize,

        /// Hidden layer widths, e.g. --hidden 10 --hidden 10
        #[arg(long, default_value = "10")]
        hidden: Vec<usize>,

        #[arg(long, default_value = "tanh")]
        activation: String,

        /// least_squares or cross_entropy
        #[arg(long, default_value = "cross_entropy")]
        loss: String,

        /// Activation of the output layer (cross entropy only)
        #[arg(long, default_value = "sigmoid")]
        final_activation: String,

        /// sgd, adagrad or adam
        #[arg(long, default_value = "sgd")]
        optimizer: String,

        #[arg(long, default_value_t = 1000)]
        iterations: usize,

        #[arg(long, default_value_t = 30)]
        batch_size: usize,

        #[arg(long, default_value_t = 0.1)]
        learning_rate: f64,

        #[arg(long, default_value_t = 100)]
        eval_interval: usize,

        #[arg(long, default_value_t = 0.2)]
        test_ratio: f64,

        /// Run gradient tests at every evaluation
        #[arg(long, default_value_t = false)]
        grad_test: bool,

        /// Write the loss/accuracy history as csv
        #[arg(long)]
        history: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let schedule = Schedule {
        iterations: cli.grad_iterations,
        accept_order: cli.accept_order,
        ..Schedule::default()
    };

    match cli.command {
        Commands::Check {
            input_dim,
            output_dim,
            batch_size,
            out_dir,
        } => {
            let config = CheckConfig {
                input_dim,
                output_dim,
                batch_size,
                schedule,
                out_dir,
            };
            let results = check::run_all(&mut rng, &config)?;
            print!("{}", check::summary(&results));
            let failed = results.iter().filter(|r| !r.verdict.passed()).count();
            if failed > 0 {
                bail!("{} of {} checks failed", failed, results.len());
            }
            info!("all {} checks passed", results.len());
        }
        Commands::Train {
            data,
            labels,
            per_class,
            classes,
            hidden,
            activation,
            loss,
            final_activation,
            optimizer,
            iterations,
            batch_size,
            learning_rate,
            eval_interval,
            test_ratio,
            grad_test,
            history,
        } => {
            let source = match (data, labels) {
                (Some(x), Some(t)) => DataSource::Csv { x, t },
                _ => DataSource::Spiral { per_class, classes },
            };
            let activation: Activation = activation.parse()?;
            let loss: Loss = loss.parse()?;
            let final_activation: Activation = final_activation.parse()?;
            let optimizer = optimizer.parse::<OptimizerKind>().map_err(anyhow::Error::msg)?;
            let config = ClassifyConfig {
                source,
                test_ratio,
                network: NetworkConfig {
                    hidden,
                    activation,
                    loss,
                    final_activation,
                },
                train: TrainConfig {
                    iterations,
                    batch_size,
                    learning_rate,
                    eval_interval,
                    grad_test,
                    schedule,
                },
                optimizer,
                history_out: history,
            };
            let history = classify::run(&mut rng, config)?;
            if let (Some(loss), Some(acc)) =
                (history.test_loss.last(), history.test_accuracy.last())
            {
                info!("final test loss {:.6}, accuracy {:.3}", loss, acc);
            }
        }
    }

    Ok(())
}
