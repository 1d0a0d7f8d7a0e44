//! Records handed to result sinks.
//!
//! | Type           | When                                            |
//! |----------------|-------------------------------------------------|
//! | `ResultRecord` | once per successfully processed frame           |
//! | `SystemStatus` | on every engine start/stop, and on `status()`   |
//!
//! Both serialise to camelCase JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Result records
// ---------------------------------------------------------------------------

/// One classification result. Created by the processing loop, handed to the
/// sink, then dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    /// Wall-clock time the record was built.
    pub timestamp: DateTime<Utc>,
    /// Monotonically increasing. Assigned when the record is built, so a
    /// failed delivery leaves a gap in the delivered sequence.
    pub seq: u64,
    /// Best classes, descending by score.
    pub top_k: Vec<ClassScore>,
    /// Inference latency reported by the classifier.
    pub latency_ms: f64,
    /// Process CPU usage at the time of the record.
    pub cpu_percent: f32,
    /// Configured classifier thread count.
    pub threads: usize,
}

impl ResultRecord {
    /// Highest-scoring class, if any.
    pub fn top_class(&self) -> Option<&ClassScore> {
        self.top_k.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub label: String,
    pub score: f32,
}

// ---------------------------------------------------------------------------
// System status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub status: StreamState,
    /// Active model identifier.
    pub model: String,
    pub threads: usize,
}

/// Lifecycle state of a worker or of the whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    #[default]
    Stopped,
    Running,
}

impl StreamState {
    pub fn from_running(running: bool) -> Self {
        if running {
            Self::Running
        } else {
            Self::Stopped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_record_serializes_with_camel_case() {
        let record = ResultRecord {
            timestamp: Utc::now(),
            seq: 7,
            top_k: vec![
                ClassScore {
                    label: "Speech".into(),
                    score: 0.8,
                },
                ClassScore {
                    label: "Music".into(),
                    score: 0.1,
                },
            ],
            latency_ms: 12.5,
            cpu_percent: 3.0,
            threads: 2,
        };

        let json = serde_json::to_value(&record).expect("serialize result record");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["topK"][0]["label"], "Speech");
        assert_eq!(json["latencyMs"], 12.5);
        assert_eq!(json["cpuPercent"], 3.0);
        assert_eq!(json["threads"], 2);
        assert!(json["timestamp"].is_string());
        assert_eq!(record.top_class().map(|c| c.label.as_str()), Some("Speech"));
    }

    #[test]
    fn system_status_uses_lowercase_state() {
        let status = SystemStatus {
            status: StreamState::Running,
            model: "yamnet.onnx".into(),
            threads: 4,
        };
        let json = serde_json::to_value(&status).expect("serialize status");
        assert_eq!(json["status"], "running");
        assert_eq!(json["model"], "yamnet.onnx");

        let back: SystemStatus = serde_json::from_value(json).expect("deserialize status");
        assert_eq!(back, status);
    }

    #[test]
    fn stream_state_defaults_to_stopped() {
        assert_eq!(StreamState::default(), StreamState::Stopped);
        assert_eq!(StreamState::from_running(true), StreamState::Running);
    }
}
