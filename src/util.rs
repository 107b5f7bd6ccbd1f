extern crate ndarray;
use crate::error::{Error, Result};
use crate::math::Norm;
use crate::types::*;
use ndarray::{s, Array, Axis};
use ndarray_rand::rand_distr::{StandardNormal, Uniform};
use ndarray_rand::RandomExt;
use ndarray_stats::QuantileExt;
use rand::seq::SliceRandom;
use rand::Rng;

/// パラメータの初期値。[-0.5, 0.5]の一様分布
pub fn uniform_arr2d<R: Rng + ?Sized>(rng: &mut R, m: usize, n: usize) -> Arr2d {
    Array::random_using((m, n), Uniform::new(-0.5, 0.5), rng)
}

/// 長さ1のランダムな方向。有限差分テストの摂動に使う
pub fn random_direction<R: Rng + ?Sized>(rng: &mut R, shape: (usize, usize)) -> Arr2d {
    let d: Arr2d = Array::random_using(shape, StandardNormal, rng);
    normalize(d)
}

pub fn normalize(d: Arr2d) -> Arr2d {
    let norm = d.norm();
    assert!(norm > 0.0, "cannot normalize a zero direction");
    d / norm
}

/// 重み(行優先)、バイアスの順に並べた一本のベクトルにする
pub fn flatten_params(w: &Arr2d, b: &Arr2d) -> Arr1d {
    w.iter().chain(b.iter()).cloned().collect()
}

/// flatten_paramsの逆。先頭から重み、バイアスの順に取り出し、残りを返す
pub fn split_theta(
    params: &Arr1d,
    w_shape: (usize, usize),
    b_shape: (usize, usize),
) -> Result<(Arr2d, Arr2d, Arr1d)> {
    let w_len = w_shape.0 * w_shape.1;
    let b_len = b_shape.0 * b_shape.1;
    if params.len() < w_len + b_len {
        return Err(Error::ParamLength {
            expected: w_len + b_len,
            found: params.len(),
        });
    }
    let w = Arr2d::from_shape_fn(w_shape, |(i, j)| params[i * w_shape.1 + j]);
    let b = Arr2d::from_shape_fn(b_shape, |(i, j)| params[w_len + i * b_shape.1 + j]);
    let rest = params.slice(s![w_len + b_len..]).to_owned();
    Ok((w, b, rest))
}

pub fn random_index<R: Rng + ?Sized>(rng: &mut R, range: usize) -> Vec<usize> {
    let mut vec: Vec<usize> = (0..range).collect();
    vec.shuffle(rng);
    vec
}

/// 列(サンプル)をidxの順に取り出す
pub fn pickup_columns(x: &Arr2d, idx: &[usize]) -> Arr2d {
    x.select(Axis(1), idx)
}

/// (クラス数, サンプル数)のone-hot行列
pub fn convert_one_hot(labels: &[usize], classes: usize) -> Arr2d {
    let mut arr = Arr2d::zeros((classes, labels.len()));
    for (n, &id) in labels.iter().enumerate() {
        arr[[id, n]] = 1.0;
    }
    arr
}

/// 各列(サンプル)で最大の行番号を返す。one-hotなら正解ラベル
pub fn reverse_one_hot(scores: &Arr2d) -> Vec<usize> {
    scores
        .axis_iter(Axis(1))
        .map(|col| col.argmax().expect("found empty column!"))
        .collect()
}

/// 渦巻き状に並んだclasses個のクラスのデータ。(2, per_class*classes)と
/// one-hotの(classes, per_class*classes)を返す
pub fn spiral<R: Rng + ?Sized>(rng: &mut R, per_class: usize, classes: usize) -> (Arr2d, Arr2d) {
    let n = per_class * classes;
    let mut x = Arr2d::zeros((2, n));
    let mut labels = Vec::with_capacity(n);
    for j in 0..classes {
        for i in 0..per_class {
            let rate = i as f64 / per_class as f64;
            let radius = rate;
            let theta = j as f64 * 4.0 + 4.0 * rate + rng.gen_range(-1.0, 1.0) * 0.2;
            let ix = per_class * j + i;
            x[[0, ix]] = radius * theta.sin();
            x[[1, ix]] = radius * theta.cos();
            labels.push(j);
        }
    }
    (x, convert_one_hot(&labels, classes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn uniform_range() {
        let mut rng = StdRng::seed_from_u64(0);
        let w = uniform_arr2d(&mut rng, 20, 30);
        assert_eq!(w.dim(), (20, 30));
        assert!(w.iter().all(|x| *x >= -0.5 && *x <= 0.5));
    }

    #[test]
    fn direction_is_unit() {
        let mut rng = StdRng::seed_from_u64(1);
        let d = random_direction(&mut rng, (4, 3));
        assert_eq!(d.dim(), (4, 3));
        assert_abs_diff_eq!(d.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn seeded_init_is_reproducible() {
        let a = uniform_arr2d(&mut StdRng::seed_from_u64(7), 3, 3);
        let b = uniform_arr2d(&mut StdRng::seed_from_u64(7), 3, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn flatten_split_roundtrip() {
        let w = arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let b = arr2(&[[7.0], [8.0]]);
        let mut theta = flatten_params(&w, &b).to_vec();
        assert_eq!(theta, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        theta.push(9.0);
        let (w2, b2, rest) = split_theta(&Arr1d::from(theta), (2, 3), (2, 1)).unwrap();
        assert_eq!(w2, w);
        assert_eq!(b2, b);
        assert_eq!(rest, arr1(&[9.0]));
    }

    #[test]
    fn split_too_short() {
        let err = split_theta(&arr1(&[1.0, 2.0]), (2, 3), (2, 1)).unwrap_err();
        assert!(matches!(
            err,
            Error::ParamLength {
                expected: 8,
                found: 2
            }
        ));
    }

    #[test]
    fn one_hot_roundtrip() {
        let labels = vec![2, 0, 1, 1];
        let t = convert_one_hot(&labels, 3);
        assert_eq!(t.dim(), (3, 4));
        assert_eq!(reverse_one_hot(&t), labels);
    }

    #[test]
    fn spiral_shape() {
        let mut rng = StdRng::seed_from_u64(3);
        let (x, t) = spiral(&mut rng, 10, 3);
        assert_eq!(x.dim(), (2, 30));
        assert_eq!(t.dim(), (3, 30));
        assert_abs_diff_eq!(t.sum(), 30.0);
    }

    #[test]
    fn random_index_is_permutation() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut idx = random_index(&mut rng, 10);
        idx.sort();
        assert_eq!(idx, (0..10).collect::<Vec<_>>());
    }
}
