use std::collections::BTreeMap;

use log::warn;
use rayon::prelude::*;

use super::Aggregator;
use crate::{WorkerId, error::AggregationErr};

const CHUNK_SIZE: usize = 4096;

/// Element-wise arithmetic mean of every contribution.
///
/// Each element is summed in `f64` following the worker id order, so the
/// result is the same however the contributions were inserted.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mean;

impl Aggregator for Mean {
    fn aggregate(
        &self,
        contributions: &BTreeMap<WorkerId, Vec<f32>>,
        dimension: usize,
    ) -> Result<Vec<f32>, AggregationErr> {
        let vectors: Vec<&[f32]> = contributions
            .iter()
            .filter_map(|(worker, vector)| {
                if vector.len() == dimension {
                    return Some(vector.as_slice());
                }

                warn!(
                    worker = *worker;
                    "skipping contribution of length {}, expected {dimension}",
                    vector.len()
                );
                None
            })
            .collect();

        if vectors.is_empty() {
            return Err(AggregationErr::Empty);
        }

        let count = vectors.len() as f64;
        let mut out = vec![0.; dimension];

        out.par_chunks_mut(CHUNK_SIZE)
            .enumerate()
            .for_each(|(chunk, slice)| {
                let offset = chunk * CHUNK_SIZE;
                for (i, x) in slice.iter_mut().enumerate() {
                    let sum: f64 = vectors.iter().map(|v| v[offset + i] as f64).sum();
                    *x = (sum / count) as f32;
                }
            });

        if let Some((index, value)) = out.iter().enumerate().find(|(_, x)| !x.is_finite()) {
            return Err(AggregationErr::NonFinite {
                index,
                value: *value,
            });
        }

        Ok(out)
    }
}
