use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown activation: {0}")]
    UnknownActivation(String),

    #[error("unknown loss function: {0}")]
    UnknownLoss(String),

    /// update_thetaに渡されたパラメータ列が、レイヤーのパラメータ数より短い
    #[error("parameter vector too short: expected at least {expected}, found {found}")]
    ParamLength { expected: usize, found: usize },

    #[error("empty dataset: {0}")]
    EmptyDataset(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
