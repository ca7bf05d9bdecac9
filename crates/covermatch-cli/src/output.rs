//! JSON output formatting

use covermatch_core::scoring::OverallSimilarity;
use covermatch_core::ComparisonResult;
use serde::Serialize;

/// One line of a batch run
#[derive(Debug, Serialize)]
pub struct BatchEntry {
    pub job_id: u64,
    pub reference: String,
    pub candidate: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchEntry {
    pub fn completed(job_id: u64, reference: &str, candidate: &str, overall: &OverallSimilarity) -> Self {
        Self {
            job_id,
            reference: reference.to_string(),
            candidate: candidate.to_string(),
            status: "completed".to_string(),
            percentage: Some(overall.similarity_percentage),
            level: Some(overall.similarity_level.to_string()),
            error: None,
        }
    }

    pub fn failed(job_id: u64, reference: &str, candidate: &str, error: impl ToString) -> Self {
        Self {
            job_id,
            reference: reference.to_string(),
            candidate: candidate.to_string(),
            status: "failed".to_string(),
            percentage: None,
            level: None,
            error: Some(error.to_string()),
        }
    }
}

/// Print a comparison result as JSON
pub fn print_json_result(result: &ComparisonResult) {
    match serde_json::to_string_pretty(result) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing result: {}", e),
    }
}

/// Print batch results, most similar pairs first
pub fn print_json_batch(results: &mut [BatchEntry]) {
    results.sort_by(|a, b| {
        b.percentage
            .unwrap_or(-1.0)
            .partial_cmp(&a.percentage.unwrap_or(-1.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let completed = results.iter().filter(|r| r.error.is_none()).count();
    if completed < results.len() {
        log::info!("{} of {} comparisons failed", results.len() - completed, results.len());
    }

    match serde_json::to_string_pretty(results) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing results: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_entry_omits_scores() {
        let entry = BatchEntry::failed(3, "a", "b", "boom");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
        assert!(json.get("percentage").is_none());
    }
}
