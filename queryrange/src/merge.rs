//! Merging of partial range-query results.
//!
//! The inputs are answers to pieces of one logical query (time windows or
//! shards). The output is the answer a single unsharded execution would have
//! produced:
//!
//! - The first error result, in input order, is returned unchanged.
//! - Streams are grouped by label set. Groups appear in the order their
//!   label set is first seen, scanning inputs in order and streams within
//!   each input in order.
//! - Samples of a group are combined with a k-way merge on timestamp. A
//!   timestamp present in several inputs is kept once, from the earliest
//!   input. Disagreeing values at the same timestamp are either tolerated or
//!   rejected depending on [`DuplicateSamplePolicy`].
//!
//! Inputs are borrowed and never modified.

use crate::config::{DuplicateSamplePolicy, MergeConfig};
use crate::errors::MergeError;
use crate::model::{ApiResponse, Labels, QueryRangeResponse, ResultType, Sample, SampleStream};
use indexmap::IndexMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

pub fn merge_responses(
    responses: &[ApiResponse],
    config: &MergeConfig,
) -> Result<ApiResponse, MergeError> {
    if let Some(error) = responses.iter().find(|response| response.is_error()) {
        return Ok(error.clone());
    }

    let result_type = resolve_result_type(responses)?;

    let mut groups: IndexMap<&Labels, Vec<&[Sample]>> = IndexMap::new();
    for response in responses {
        for stream in &response.data.result {
            groups
                .entry(&stream.labels)
                .or_default()
                .push(stream.samples.as_slice());
        }
    }

    let result = groups
        .into_iter()
        .map(|(labels, members)| {
            let samples = merge_samples(labels, &members, config.duplicate_samples)?;
            Ok(SampleStream::new(labels.clone(), samples))
        })
        .collect::<Result<Vec<_>, MergeError>>()?;

    Ok(ApiResponse::success(QueryRangeResponse {
        result_type,
        result,
    }))
}

/// Result type of the first input carrying series, falling back to the first
/// input and then to matrix. Inputs carrying series must all agree.
fn resolve_result_type(responses: &[ApiResponse]) -> Result<ResultType, MergeError> {
    let mut with_series = responses
        .iter()
        .filter(|response| !response.data.result.is_empty())
        .map(|response| response.data.result_type);

    let Some(expected) = with_series.next() else {
        return Ok(responses
            .first()
            .map(|response| response.data.result_type)
            .unwrap_or_default());
    };

    match with_series.find(|found| *found != expected) {
        Some(found) => Err(MergeError::ResultTypeMismatch { expected, found }),
        None => Ok(expected),
    }
}

fn merge_samples(
    labels: &Labels,
    members: &[&[Sample]],
    policy: DuplicateSamplePolicy,
) -> Result<Vec<Sample>, MergeError> {
    for samples in members {
        if samples
            .windows(2)
            .any(|pair| pair[0].timestamp_ms >= pair[1].timestamp_ms)
        {
            return Err(MergeError::UnorderedSamples {
                labels: labels.to_string(),
            });
        }
    }

    if let [single] = members {
        return Ok(single.to_vec());
    }

    let capacity = members.iter().map(|samples| samples.len()).sum();
    let mut merged: Vec<Sample> = Vec::with_capacity(capacity);

    // Ties on timestamp pop the lowest member index first, which is the
    // earliest input.
    let mut heap: BinaryHeap<Reverse<(i64, usize, usize)>> = members
        .iter()
        .enumerate()
        .filter_map(|(member, samples)| {
            samples
                .first()
                .map(|sample| Reverse((sample.timestamp_ms, member, 0)))
        })
        .collect();

    while let Some(Reverse((_, member, pos))) = heap.pop() {
        let sample = members[member][pos];
        if let Some(next) = members[member].get(pos + 1) {
            heap.push(Reverse((next.timestamp_ms, member, pos + 1)));
        }

        match merged.last() {
            Some(last) if last.timestamp_ms == sample.timestamp_ms => {
                if !last.same_value(&sample) {
                    if policy == DuplicateSamplePolicy::Reject {
                        return Err(MergeError::ConflictingSamples {
                            labels: labels.to_string(),
                            timestamp_ms: sample.timestamp_ms,
                        });
                    }
                    tracing::warn!(
                        labels = %labels,
                        timestamp_ms = sample.timestamp_ms,
                        kept = last.value,
                        dropped = sample.value,
                        "Dropping conflicting duplicate sample"
                    );
                }
            }
            _ => merged.push(sample),
        }
    }

    Ok(merged)
}
