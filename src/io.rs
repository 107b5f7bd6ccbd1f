use crate::error::{Error, Result};
use crate::gradcheck::ErrorSeries;
use crate::trainer::History;
use crate::types::Arr2d;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub trait Save {
    fn save_as_csv<P: AsRef<Path>>(&self, filename: P) -> Result<()>;
}

impl Save for Arr2d {
    fn save_as_csv<P: AsRef<Path>>(&self, filename: P) -> Result<()> {
        let mut wtr = WriterBuilder::new()
            .has_headers(false)
            .from_path(filename)?;
        for row in self.outer_iter() {
            wtr.serialize(row.to_vec())?
        }
        wtr.flush()?;
        Ok(())
    }
}

/// 誤差曲線の一行。値はどちらもlog|error|
#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct SeriesRow {
    iteration: usize,
    step: f64,
    zero_order: f64,
    first_order: f64,
}

/// グラフ描画用。ラベルはファイル名に任せる
impl Save for ErrorSeries {
    fn save_as_csv<P: AsRef<Path>>(&self, filename: P) -> Result<()> {
        let mut wtr = WriterBuilder::new().from_path(filename)?;
        for (i, ((&step, &zero_order), &first_order)) in self
            .steps
            .iter()
            .zip(&self.zero_order)
            .zip(&self.first_order)
            .enumerate()
        {
            wtr.serialize(SeriesRow {
                iteration: i,
                step,
                zero_order,
                first_order,
            })?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct HistoryRow {
    iteration: usize,
    train_loss: f64,
    train_accuracy: f64,
    test_loss: f64,
    test_accuracy: f64,
}

impl Save for History {
    fn save_as_csv<P: AsRef<Path>>(&self, filename: P) -> Result<()> {
        let mut wtr = WriterBuilder::new().from_path(filename)?;
        for (i, &iteration) in self.index.iter().enumerate() {
            wtr.serialize(HistoryRow {
                iteration,
                train_loss: self.train_loss[i],
                train_accuracy: self.train_accuracy[i],
                test_loss: self.test_loss[i],
                test_accuracy: self.test_accuracy[i],
            })?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// ヘッダ無しの数値csvを(行数, 列数)の配列として読む
pub fn csv_to_array<P: AsRef<Path>>(filename: P) -> Result<Arr2d> {
    let v: Vec<Vec<f64>> = read_csv(filename)?;
    if v.is_empty() {
        return Err(Error::EmptyDataset("csv has no rows".to_string()));
    }
    let cols = v[0].len();
    Ok(Arr2d::from_shape_fn((v.len(), cols), |(i, j)| v[i][j]))
}

pub fn read_csv<T, P: AsRef<Path>>(filename: P) -> Result<Vec<T>>
where
    for<'de> T: Deserialize<'de>,
{
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .from_path(filename)?;
    let mut v = Vec::new();
    for result in rdr.deserialize() {
        let record: T = result?;
        v.push(record);
    }
    Ok(v)
}
