// src/pipeline/estimate.rs

//! Timestamp estimation from id.
//!
//! Ids are assigned in publication order, so a polynomial in the id is a good
//! stand-in for the publish time of records the listing never dated. The fit
//! is ordinary least squares with `t = (id - x_min) / x_scale` mapped onto
//! `u = 2t - 1` and expanded in Legendre polynomials `P_0(u) ..= P_degree(u)`.
//!
//! Observations are folded one row at a time into a triangular factor by
//! Givens rotations, so the design matrix never exists and its conditioning
//! is not squared as with normal equations. Columns are then kept in degree
//! order while they add a direction the lower degrees do not span; the rest
//! get a zero coefficient.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::storage::{CatalogStorage, load_index};

/// A column whose part outside the span of lower degrees is below this
/// fraction of its norm counts as dependent.
const RANK_TOLERANCE: f64 = 1e-10;

const MS_PER_MINUTE: f64 = 60_000.0;

/// Fitted model, persisted as `estimator.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorParams {
    /// Earliest observed timestamp, epoch milliseconds
    pub base: i64,
    pub x_min: u64,
    pub x_scale: f64,
    pub degree: usize,
    /// Legendre coefficients in `u = 2t - 1`, lowest degree first; output
    /// unit is minutes after `base`
    pub coefficients: Vec<f64>,
}

/// Fit the model to `(id, timestamp)` observations.
pub fn fit(observed: &[(u64, DateTime<Utc>)], degree: usize) -> Result<EstimatorParams> {
    let (Some(x_min), Some(base)) = (
        observed.iter().map(|(id, _)| *id).min(),
        observed.iter().map(|(_, at)| at.timestamp_millis()).min(),
    ) else {
        return Err(AppError::estimator("no observed timestamps to fit"));
    };

    let span = observed.iter().map(|(id, _)| id - x_min).max().unwrap_or(0);
    let x_scale = if span == 0 { 1.0 } else { span as f64 };
    let n = degree + 1;

    let mut solver = LeastSquares::new(n);
    let mut row = vec![0.0f64; n];
    for (id, at) in observed {
        let t = (id - x_min) as f64 / x_scale;
        legendre(2.0 * t - 1.0, &mut row);
        let y = (at.timestamp_millis() - base) as f64 / MS_PER_MINUTE;
        solver.add_row(&mut row, y);
    }
    let (coefficients, dropped) = solver.solve();

    if dropped > 0 {
        log::warn!(
            "Estimator: {} of {} basis columns numerically dependent, fixed at 0",
            dropped,
            n
        );
    }
    if coefficients.iter().any(|c| !c.is_finite()) {
        return Err(AppError::estimator("fit produced non-finite coefficients"));
    }

    log::info!(
        "Estimator fitted: degree {} over {} observations (ids {}..={})",
        degree,
        observed.len(),
        x_min,
        x_min + span
    );

    Ok(EstimatorParams {
        base,
        x_min,
        x_scale,
        degree,
        coefficients,
    })
}

/// Estimated publish time of `id`, or `None` outside the representable range.
pub fn estimate(params: &EstimatorParams, id: u64) -> Option<DateTime<Utc>> {
    let t = (id as f64 - params.x_min as f64) / params.x_scale;
    let mut basis = vec![0.0f64; params.coefficients.len()];
    legendre(2.0 * t - 1.0, &mut basis);
    let minutes: f64 = basis
        .iter()
        .zip(&params.coefficients)
        .map(|(p, c)| p * c)
        .sum();
    let millis = params.base as f64 + minutes * MS_PER_MINUTE;
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_millis(millis.round() as i64)
}

/// Fill `out` with `P_0(u) ..`, via `k P_k = (2k - 1) u P_{k-1} - (k - 1) P_{k-2}`.
fn legendre(u: f64, out: &mut [f64]) {
    for k in 0..out.len() {
        out[k] = match k {
            0 => 1.0,
            1 => u,
            _ => {
                let kf = k as f64;
                ((2.0 * kf - 1.0) * u * out[k - 1] - (kf - 1.0) * out[k - 2]) / kf
            }
        };
    }
}

/// Incremental least squares: `R` upper triangular and `Qᵀy`.
struct LeastSquares {
    r: Vec<Vec<f64>>,
    qty: Vec<f64>,
}

impl LeastSquares {
    fn new(n: usize) -> Self {
        Self {
            r: vec![vec![0.0; n]; n],
            qty: vec![0.0; n],
        }
    }

    /// Rotate one observation into the factor. `row` is consumed.
    fn add_row(&mut self, row: &mut [f64], mut y: f64) {
        let n = self.qty.len();
        for k in 0..n {
            if row[k] == 0.0 {
                continue;
            }
            let h = self.r[k][k].hypot(row[k]);
            let (c, s) = (self.r[k][k] / h, row[k] / h);
            self.r[k][k] = h;
            for j in k + 1..n {
                let (a, b) = (self.r[k][j], row[j]);
                self.r[k][j] = c * a + s * b;
                row[j] = c * b - s * a;
            }
            let a = self.qty[k];
            self.qty[k] = c * a + s * y;
            y = c * y - s * a;
        }
    }

    /// Re-triangularize `R` over the independent columns (taken in degree
    /// order) and back-substitute.
    ///
    /// Returns the coefficients and the number of dropped columns.
    fn solve(mut self) -> (Vec<f64>, usize) {
        let n = self.qty.len();
        let norms: Vec<f64> = (0..n)
            .map(|j| (0..n).map(|i| self.r[i][j].powi(2)).sum::<f64>().sqrt())
            .collect();

        // (row, column) of each kept pivot
        let mut kept: Vec<(usize, usize)> = Vec::with_capacity(n);
        let mut row = 0;
        for j in 0..n {
            if row == n {
                break;
            }
            let tail = (row..n).map(|i| self.r[i][j].powi(2)).sum::<f64>().sqrt();
            if norms[j] == 0.0 || tail <= RANK_TOLERANCE * norms[j] {
                continue;
            }

            // Householder reflection mapping r[row.., j] onto -sign · tail · e1
            let alpha = if self.r[row][j] > 0.0 { -tail } else { tail };
            let mut v: Vec<f64> = (row..n).map(|i| self.r[i][j]).collect();
            v[0] -= alpha;
            let v_norm2: f64 = v.iter().map(|x| x * x).sum();

            for col in j..n {
                let dot: f64 = v.iter().zip(row..n).map(|(vi, i)| vi * self.r[i][col]).sum();
                let f = 2.0 * dot / v_norm2;
                for (vi, i) in v.iter().zip(row..n) {
                    self.r[i][col] -= f * vi;
                }
            }
            let dot: f64 = v.iter().zip(row..n).map(|(vi, i)| vi * self.qty[i]).sum();
            let f = 2.0 * dot / v_norm2;
            for (vi, i) in v.iter().zip(row..n) {
                self.qty[i] -= f * vi;
            }

            kept.push((row, j));
            row += 1;
        }

        let mut x = vec![0.0f64; n];
        for (idx, &(i, j)) in kept.iter().enumerate().rev() {
            let sum: f64 = kept[idx + 1..]
                .iter()
                .map(|&(_, col)| self.r[i][col] * x[col])
                .sum();
            x[j] = (self.qty[i] - sum) / self.r[i][j];
        }

        (x, n - kept.len())
    }
}

/// Fit on every observed timestamp, persist the model and fill estimates.
///
/// When no fit is possible the last persisted model fills the gaps instead;
/// without one the fit error is returned.
pub async fn run_estimator(
    config: &Config,
    storage: &dyn CatalogStorage,
) -> Result<EstimatorParams> {
    let (mut index, _) = load_index(storage).await?;
    let observed = index.observed_timestamps();
    let degree = config.estimator.degree;

    let params = match tokio::task::spawn_blocking(move || fit(&observed, degree)).await? {
        Ok(params) => {
            storage.save_estimator(&params).await?;
            params
        }
        Err(AppError::Estimator(message)) => match storage.load_estimator().await? {
            Some(stored) => {
                log::warn!("Fit failed ({}); reusing stored estimator", message);
                stored
            }
            None => return Err(AppError::Estimator(message)),
        },
        Err(e) => return Err(e),
    };

    let filled = index.apply_estimates(|id| estimate(&params, id));
    if filled > 0 {
        storage.save_records(&index.to_vec()).await?;
    }
    log::info!("Estimated timestamps updated for {} records", filled);

    Ok(params)
}
