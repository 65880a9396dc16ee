//! Cleaner - filters relational trips into the document store.
//!
//! The filter stages run in a fixed order and each one sees only the
//! survivors of the previous stage, so every dropped row is counted once.

use crate::db::document::{DocumentStore, TripDocument};
use crate::db::relational::RelationalStore;
use crate::error::{PipelineError, Result};
use crate::model::TripRecord;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

const MIN_PASSENGERS: f64 = 1.0;
const MAX_PASSENGERS: f64 = 8.0;
const MAX_TRIP_DISTANCE: f64 = 100.0;
const MAX_FARE_AMOUNT: f64 = 500.0;

/// Per-batch drop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningStats {
    pub rows_read: u64,
    pub nulls_removed: u64,
    pub negatives_removed: u64,
    pub outliers_removed: u64,
}

impl CleaningStats {
    pub fn rows_kept(&self) -> u64 {
        self.rows_read - self.nulls_removed - self.negatives_removed - self.outliers_removed
    }
}

/// Aggregate over a whole cleaning run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningTotals {
    pub batches: usize,
    pub rows_read: u64,
    pub rows_inserted: u64,
    pub nulls_removed: u64,
    pub negatives_removed: u64,
    pub outliers_removed: u64,
    pub documents_cleared: u64,
}

impl CleaningTotals {
    fn absorb(&mut self, stats: &CleaningStats, inserted: u64) {
        self.batches += 1;
        self.rows_read += stats.rows_read;
        self.rows_inserted += inserted;
        self.nulls_removed += stats.nulls_removed;
        self.negatives_removed += stats.negatives_removed;
        self.outliers_removed += stats.outliers_removed;
    }
}

fn has_timestamps(r: &TripRecord) -> bool {
    r.tpep_pickup_datetime.is_some() && r.tpep_dropoff_datetime.is_some()
}

// A missing value is not "non-negative".
fn has_no_negatives(r: &TripRecord) -> bool {
    [
        r.passenger_count,
        r.trip_distance,
        r.fare_amount,
        r.tip_amount,
        r.tolls_amount,
        r.total_amount,
    ]
    .iter()
    .all(|v| matches!(v, Some(x) if *x >= 0.0))
}

fn within_bounds(r: &TripRecord) -> bool {
    matches!(r.passenger_count, Some(p) if (MIN_PASSENGERS..=MAX_PASSENGERS).contains(&p))
        && matches!(r.trip_distance, Some(d) if d <= MAX_TRIP_DISTANCE)
        && matches!(r.fare_amount, Some(f) if f <= MAX_FARE_AMOUNT)
}

fn retain_counting(rows: &mut Vec<TripRecord>, keep: fn(&TripRecord) -> bool) -> u64 {
    let before = rows.len();
    rows.retain(keep);
    (before - rows.len()) as u64
}

/// Apply the null, negative and outlier stages in order.
pub fn clean_batch(mut rows: Vec<TripRecord>) -> (Vec<TripRecord>, CleaningStats) {
    let rows_read = rows.len() as u64;
    let nulls_removed = retain_counting(&mut rows, has_timestamps);
    let negatives_removed = retain_counting(&mut rows, has_no_negatives);
    let outliers_removed = retain_counting(&mut rows, within_bounds);

    let stats = CleaningStats {
        rows_read,
        nulls_removed,
        negatives_removed,
        outliers_removed,
    };
    (rows, stats)
}

pub struct Cleaner<'a, R: RelationalStore + ?Sized, D: DocumentStore + ?Sized> {
    source: &'a R,
    target: &'a D,
    chunk_size: usize,
}

impl<'a, R, D> Cleaner<'a, R, D>
where
    R: RelationalStore + ?Sized,
    D: DocumentStore + ?Sized,
{
    pub fn new(source: &'a R, target: &'a D) -> Self {
        Self {
            source,
            target,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Clear the collection, then clean every trip batch by batch.
    ///
    /// Stops at the first failing batch; the error carries the totals of
    /// the batches that were already written.
    pub async fn run(&self) -> Result<CleaningTotals> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("clean", run_id = %run_id);

        async {
            let mut totals = CleaningTotals {
                documents_cleared: self.target.clear().await?,
                ..Default::default()
            };
            info!(cleared = totals.documents_cleared, "Document collection cleared");

            let mut after = 0i64;
            loop {
                let batch = totals.batches + 1;
                let rows = self
                    .source
                    .fetch_trips(after, self.chunk_size)
                    .await
                    .map_err(|e| fail(batch, e, &totals))?;
                let Some(last) = rows.last().map(|r| r.id) else { break };
                let fetched = rows.len();

                let (kept, stats) = clean_batch(rows.into_iter().map(|r| r.record).collect());
                let documents: Vec<TripDocument> = kept.into_iter().map(Into::into).collect();
                let inserted = self
                    .target
                    .insert_many(documents)
                    .await
                    .map_err(|e| fail(batch, e, &totals))?;

                totals.absorb(&stats, inserted);
                after = last;
                info!(
                    batch,
                    read = stats.rows_read,
                    inserted,
                    nulls = stats.nulls_removed,
                    negatives = stats.negatives_removed,
                    outliers = stats.outliers_removed,
                    "Batch cleaned"
                );

                if fetched < self.chunk_size {
                    break;
                }
            }

            info!(
                batches = totals.batches,
                read = totals.rows_read,
                inserted = totals.rows_inserted,
                "Cleaning finished"
            );
            Ok(totals)
        }
        .instrument(span)
        .await
    }
}

fn fail(batch: usize, err: PipelineError, totals: &CleaningTotals) -> PipelineError {
    error!(batch, error = %err, "Cleaning batch failed");
    PipelineError::Cleaning {
        batch,
        reason: err.to_string(),
        totals: totals.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_timestamp;

    fn valid_trip() -> TripRecord {
        TripRecord {
            vendor_id: Some(2),
            tpep_pickup_datetime: parse_timestamp("2025-01-01 00:10:00"),
            tpep_dropoff_datetime: parse_timestamp("2025-01-01 00:25:00"),
            passenger_count: Some(1.0),
            trip_distance: Some(3.2),
            fare_amount: Some(15.6),
            tip_amount: Some(3.0),
            tolls_amount: Some(0.0),
            total_amount: Some(22.1),
            ..Default::default()
        }
    }

    #[test]
    fn test_each_stage_drops_one_row() {
        let null_pickup = TripRecord {
            tpep_pickup_datetime: None,
            ..valid_trip()
        };
        let negative = TripRecord {
            passenger_count: Some(-1.0),
            ..valid_trip()
        };
        let outlier = TripRecord {
            passenger_count: Some(9.0),
            ..valid_trip()
        };

        let (kept, stats) = clean_batch(vec![null_pickup, negative, outlier]);
        assert!(kept.is_empty());
        assert_eq!(
            stats,
            CleaningStats {
                rows_read: 3,
                nulls_removed: 1,
                negatives_removed: 1,
                outliers_removed: 1,
            }
        );
    }

    #[test]
    fn test_row_counted_in_first_failing_stage_only() {
        // Null timestamp and negative fare: the null stage claims it.
        let both = TripRecord {
            tpep_dropoff_datetime: None,
            fare_amount: Some(-4.0),
            ..valid_trip()
        };
        let (_, stats) = clean_batch(vec![both]);
        assert_eq!(stats.nulls_removed, 1);
        assert_eq!(stats.negatives_removed, 0);
    }

    #[test]
    fn test_missing_values_fail_value_checks() {
        let no_tip = TripRecord {
            tip_amount: None,
            ..valid_trip()
        };
        let (_, stats) = clean_batch(vec![no_tip]);
        assert_eq!(stats.negatives_removed, 1);
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let edge = TripRecord {
            passenger_count: Some(8.0),
            trip_distance: Some(100.0),
            fare_amount: Some(500.0),
            total_amount: Some(510.0),
            ..valid_trip()
        };
        let far = TripRecord {
            trip_distance: Some(100.5),
            ..valid_trip()
        };
        let zero_passengers = TripRecord {
            passenger_count: Some(0.0),
            ..valid_trip()
        };

        let (kept, stats) = clean_batch(vec![edge.clone(), far, zero_passengers]);
        assert_eq!(kept, vec![edge]);
        assert_eq!(stats.outliers_removed, 2);
    }

    #[test]
    fn test_conservation_and_monotonicity() {
        let mut rows = Vec::new();
        for i in 0..40 {
            let mut r = valid_trip();
            match i % 5 {
                0 => r.tpep_pickup_datetime = None,
                1 => r.total_amount = Some(-1.0),
                2 => r.fare_amount = Some(900.0),
                _ => {}
            }
            rows.push(r);
        }

        let (kept, stats) = clean_batch(rows);
        let after_a = stats.rows_read - stats.nulls_removed;
        let after_b = after_a - stats.negatives_removed;
        let after_c = after_b - stats.outliers_removed;
        assert!(stats.rows_read >= after_a && after_a >= after_b && after_b >= after_c);
        assert_eq!(after_c, kept.len() as u64);
        assert_eq!(stats.rows_kept(), 16);
        assert_eq!(
            stats.rows_read,
            kept.len() as u64 + stats.nulls_removed + stats.negatives_removed + stats.outliers_removed
        );
    }

    #[test]
    fn test_survivors_keep_order_and_values() {
        let a = valid_trip();
        let b = TripRecord {
            vendor_id: Some(7),
            ..valid_trip()
        };
        let (kept, _) = clean_batch(vec![a.clone(), b.clone()]);
        assert_eq!(kept, vec![a, b]);
    }
}
