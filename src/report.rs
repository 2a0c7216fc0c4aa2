use crate::classify::Classification;
use crate::dispatch::ResultRecord;
use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;

/// Aggregated outcome of one target's batch, plus the raw records.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStats {
    pub summary: Summary,
    pub performance: Performance,
    pub accuracy: Accuracy,
    pub details: Vec<ResultRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total_requests: usize,
    pub valid_source_emails: usize,
    pub invalid_source_emails: usize,
    pub requests_per_second_limit: u32,
    pub api_endpoint: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Performance {
    pub total_processing_time: f64,
    pub average_response_time: f64,
    pub max_response_time: f64,
    pub min_response_time: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Accuracy {
    pub classification_counts: BTreeMap<String, usize>,
    pub false_positive_rate_percent: f64,
    pub false_negative_rate_percent: f64,
}

/// Whole-run report, one entry per tested target.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub global_summary: GlobalSummary,
    pub individual_api_results: BTreeMap<String, TargetStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalSummary {
    pub total_apis_tested: usize,
    pub total_emails_per_api: usize,
}

/// Fold a batch of records into duration and accuracy statistics.
///
/// The false-positive rate is invalid-considered-valid over the known
/// invalid population; the false-negative rate is valid-considered-invalid
/// over the known valid population. Both are percentages.
pub fn calculate_statistics(
    results: Vec<ResultRecord>,
    total_valid_source: usize,
    total_invalid_source: usize,
    requests_per_second: u32,
    endpoint: &str,
) -> TargetStats {
    let total_time: f64 = results.iter().map(|r| r.duration).sum();
    let average = if results.is_empty() {
        0.0
    } else {
        total_time / results.len() as f64
    };
    let max = results
        .iter()
        .map(|r| r.duration)
        .reduce(f64::max)
        .unwrap_or(0.0);
    let min = results
        .iter()
        .map(|r| r.duration)
        .reduce(f64::min)
        .unwrap_or(0.0);

    let mut classification_counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in &results {
        *classification_counts
            .entry(record.classification.to_string())
            .or_insert(0) += 1;
    }

    let false_positives = results
        .iter()
        .filter(|r| r.classification == Classification::InvalidConsideredValid)
        .count();
    let false_negatives = results
        .iter()
        .filter(|r| r.classification == Classification::ValidConsideredInvalid)
        .count();

    let false_positive_rate_percent = if total_invalid_source > 0 {
        false_positives as f64 / total_invalid_source as f64 * 100.0
    } else {
        0.0
    };
    let false_negative_rate_percent = if total_valid_source > 0 {
        false_negatives as f64 / total_valid_source as f64 * 100.0
    } else {
        0.0
    };

    log::info!(
        "statistics: {} requests, FP={false_positive_rate_percent:.2}%, FN={false_negative_rate_percent:.2}%",
        results.len()
    );

    TargetStats {
        summary: Summary {
            total_requests: results.len(),
            valid_source_emails: total_valid_source,
            invalid_source_emails: total_invalid_source,
            requests_per_second_limit: requests_per_second,
            api_endpoint: endpoint.to_string(),
        },
        performance: Performance {
            total_processing_time: total_time,
            average_response_time: average,
            max_response_time: max,
            min_response_time: min,
        },
        accuracy: Accuracy {
            classification_counts,
            false_positive_rate_percent,
            false_negative_rate_percent,
        },
        details: results,
    }
}

pub fn save_report(report: &RunReport, path: &str) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(report)?;
    std::fs::write(path, content)
        .with_context(|| format!("failed to write results file: {path}"))?;
    log::info!("results saved to {path}");
    Ok(())
}
