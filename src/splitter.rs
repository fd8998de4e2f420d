//! Temporal cross-validation folds
//!
//! Distinct calendar dates are cut into `n_splits + 1` contiguous blocks. Fold `k`
//! validates on block `k` and trains on every row stamped at or before midnight
//! of the validation start minus the gap. Rows in between belong to neither set,
//! so a feature with a lookback no longer than the gap cannot straddle the boundary.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::config::MAX_GAP_DAYS;
use crate::error::ComputeError;

/// One train/validation split, as indices into the input rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalFold {
    /// 1-based fold number
    pub fold: usize,
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    /// Latest instant a training row may carry
    pub train_cutoff: DateTime<Utc>,
    pub validation_start: NaiveDate,
    pub validation_end: NaiveDate,
}

/// Gap-aware chronological folds
///
/// Folds whose train or validation set comes out empty are skipped. Fails with
/// [`ComputeError::SplitUnavailable`] only when no fold survives.
pub fn temporal_folds<T, F>(
    rows: &[T],
    timestamp: F,
    n_splits: usize,
    gap_days: i64,
) -> Result<Vec<TemporalFold>, ComputeError>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    if n_splits == 0 {
        return Err(ComputeError::InvalidParameter(
            "n_splits must be at least 1".to_string(),
        ));
    }
    if !(0..=MAX_GAP_DAYS).contains(&gap_days) {
        return Err(ComputeError::InvalidParameter(format!(
            "gap_days must be in [0, {}], got {}",
            MAX_GAP_DAYS, gap_days
        )));
    }

    let stamps: Vec<DateTime<Utc>> = rows.iter().map(|row| timestamp(row)).collect();
    let dates: Vec<NaiveDate> = stamps
        .iter()
        .map(|ts| ts.date_naive())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by_key(|&i| (stamps[i], i));

    let mut folds = Vec::new();
    for (k, block) in split_blocks(&dates, n_splits + 1).into_iter().enumerate().skip(1) {
        let (Some(&validation_start), Some(&validation_end)) = (block.first(), block.last()) else {
            continue;
        };
        let train_cutoff = validation_start.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        let Some(train_cutoff) =
            train_cutoff.and_then(|start| start.checked_sub_signed(Duration::days(gap_days)))
        else {
            continue;
        };

        let train: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&i| stamps[i] <= train_cutoff)
            .collect();
        let validation: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&i| {
                let date = stamps[i].date_naive();
                date >= validation_start && date <= validation_end
            })
            .collect();

        if train.is_empty() || validation.is_empty() {
            debug!(fold = k, "skipping fold with an empty side");
            continue;
        }

        folds.push(TemporalFold {
            fold: k,
            train,
            validation,
            train_cutoff,
            validation_start,
            validation_end,
        });
    }

    if folds.is_empty() {
        return Err(ComputeError::SplitUnavailable(format!(
            "{} rows over {} dates left no fold with both sides populated (n_splits={}, gap_days={})",
            rows.len(),
            dates.len(),
            n_splits,
            gap_days
        )));
    }
    Ok(folds)
}

/// Split into `sections` contiguous blocks; the first `len % sections` get one extra item
fn split_blocks<T>(items: &[T], sections: usize) -> Vec<&[T]> {
    let base = items.len() / sections;
    let extra = items.len() % sections;
    let mut blocks = Vec::with_capacity(sections);
    let mut start = 0;
    for i in 0..sections {
        let size = base + usize::from(i < extra);
        blocks.push(&items[start..start + size]);
        start += size;
    }
    blocks
}
