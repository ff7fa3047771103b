use crate::error::GuardError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregations accepted by the aggregate-metric intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricType {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl MetricType {
    pub const ALL: [MetricType; 5] = [
        MetricType::Count,
        MetricType::Sum,
        MetricType::Avg,
        MetricType::Min,
        MetricType::Max,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Count => "COUNT",
            MetricType::Sum => "SUM",
            MetricType::Avg => "AVG",
            MetricType::Min => "MIN",
            MetricType::Max => "MAX",
        }
    }

    fn allowed() -> String {
        MetricType::ALL
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricType::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GuardError::UnsupportedMetric {
                metric: s.chars().take(32).collect(),
                allowed: MetricType::allowed(),
            })
    }
}
