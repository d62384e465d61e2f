//! Performance samples and the statistics derived from them

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// MetricKey
// ============================================================================

/// A tracked performance dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    /// Output latency in milliseconds
    #[default]
    Latency,
    /// CPU usage in percent
    #[serde(alias = "cpuUsage")]
    CpuUsage,
    /// Memory usage in MB
    #[serde(alias = "memoryUsage")]
    MemoryUsage,
    /// Buffer underruns during the sample window
    #[serde(alias = "dropoutCount")]
    DropoutCount,
    /// Perceived quality score, 0-100
    #[serde(alias = "audioQuality")]
    AudioQuality,
    /// Failed operations in percent
    #[serde(alias = "errorRate")]
    ErrorRate,
    /// Crashed sessions in percent
    #[serde(alias = "crashRate")]
    CrashRate,
    /// Time to recover from a dropout in milliseconds
    #[serde(alias = "recoveryTime")]
    RecoveryTime,
}

impl MetricKey {
    pub const ALL: [MetricKey; 8] = [
        MetricKey::Latency,
        MetricKey::CpuUsage,
        MetricKey::MemoryUsage,
        MetricKey::DropoutCount,
        MetricKey::AudioQuality,
        MetricKey::ErrorRate,
        MetricKey::CrashRate,
        MetricKey::RecoveryTime,
    ];

    /// Whether a smaller value is an improvement
    pub fn lower_is_better(&self) -> bool {
        !matches!(self, Self::AudioQuality)
    }

    /// Fixed reference value used to normalise a variant's performance score
    pub fn baseline(&self) -> f64 {
        match self {
            Self::Latency => 50.0,
            Self::CpuUsage => 60.0,
            Self::MemoryUsage => 1024.0,
            Self::DropoutCount => 5.0,
            Self::AudioQuality => 80.0,
            Self::ErrorRate => 1.0,
            Self::CrashRate => 0.1,
            Self::RecoveryTime => 500.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Latency => "latency",
            Self::CpuUsage => "cpu_usage",
            Self::MemoryUsage => "memory_usage",
            Self::DropoutCount => "dropout_count",
            Self::AudioQuality => "audio_quality",
            Self::ErrorRate => "error_rate",
            Self::CrashRate => "crash_rate",
            Self::RecoveryTime => "recovery_time",
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PerformanceMetrics
// ============================================================================

/// One raw sample reported by the audio engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub latency: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub dropout_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_time: Option<f64>,
}

impl PerformanceMetrics {
    /// Create a sample with the four mandatory dimensions
    pub fn new(latency: f64, cpu_usage: f64, memory_usage: f64, dropout_count: u32) -> Self {
        Self {
            latency,
            cpu_usage,
            memory_usage,
            dropout_count,
            ..Default::default()
        }
    }

    pub fn with_audio_quality(mut self, value: f64) -> Self {
        self.audio_quality = Some(value);
        self
    }

    pub fn with_error_rate(mut self, value: f64) -> Self {
        self.error_rate = Some(value);
        self
    }

    pub fn with_crash_rate(mut self, value: f64) -> Self {
        self.crash_rate = Some(value);
        self
    }

    pub fn with_recovery_time(mut self, value: f64) -> Self {
        self.recovery_time = Some(value);
        self
    }

    /// Value of one dimension, `None` when the sample did not report it
    pub fn value(&self, key: MetricKey) -> Option<f64> {
        match key {
            MetricKey::Latency => Some(self.latency),
            MetricKey::CpuUsage => Some(self.cpu_usage),
            MetricKey::MemoryUsage => Some(self.memory_usage),
            MetricKey::DropoutCount => Some(f64::from(self.dropout_count)),
            MetricKey::AudioQuality => self.audio_quality,
            MetricKey::ErrorRate => self.error_rate,
            MetricKey::CrashRate => self.crash_rate,
            MetricKey::RecoveryTime => self.recovery_time,
        }
        .filter(|v| v.is_finite())
    }
}

// ============================================================================
// StatisticalMetrics
// ============================================================================

/// Distribution summary for one metric of one variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticalMetrics {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
    pub p99: f64,
}

impl StatisticalMetrics {
    /// Snapshot of a single observation
    pub fn single(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            mean: value,
            median: value,
            std_dev: 0.0,
            min: value,
            max: value,
            p95: value,
            p99: value,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Merge snapshots by rebuilding a value list.
    ///
    /// Each snapshot contributes its mean repeated `count` times. This is exact for
    /// single-observation snapshots; merging pre-aggregated snapshots loses their spread.
    pub fn aggregate<'a>(snapshots: impl IntoIterator<Item = &'a StatisticalMetrics>) -> Self {
        let mut values: Vec<f64> = snapshots
            .into_iter()
            .flat_map(|s| std::iter::repeat_n(s.mean, s.count))
            .collect();

        Self::from_values(&mut values)
    }

    /// Summarise raw values (sorted in place)
    pub fn from_values(values: &mut [f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        values.sort_by(f64::total_cmp);

        let count = values.len();
        let sum: f64 = values.iter().sum();
        let mean = sum / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

        Self {
            count,
            sum,
            mean,
            median: median(values),
            std_dev: variance.sqrt(),
            min: values[0],
            max: values[count - 1],
            p95: percentile(values, 95.0),
            p99: percentile(values, 99.0),
        }
    }
}

fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;

    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Nearest-rank percentile from a sorted, non-empty list
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }

    let index = (p / 100.0 * (sorted.len() - 1) as f64) as usize;
    sorted[index.min(sorted.len() - 1)]
}

// ============================================================================
// ExperimentMetrics
// ============================================================================

/// One `StatisticalMetrics` per tracked dimension
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMetrics {
    pub latency: StatisticalMetrics,
    pub cpu_usage: StatisticalMetrics,
    pub memory_usage: StatisticalMetrics,
    pub dropout_count: StatisticalMetrics,
    pub audio_quality: StatisticalMetrics,
    pub error_rate: StatisticalMetrics,
    pub crash_rate: StatisticalMetrics,
    pub recovery_time: StatisticalMetrics,
}

impl ExperimentMetrics {
    /// Wrap a raw sample into single-observation snapshots. Unreported dimensions stay empty.
    pub fn from_sample(sample: &PerformanceMetrics) -> Self {
        let mut metrics = Self::default();

        for key in MetricKey::ALL {
            if let Some(value) = sample.value(key) {
                *metrics.get_mut(key) = StatisticalMetrics::single(value);
            }
        }

        metrics
    }

    /// Merge many snapshots dimension by dimension
    pub fn aggregate<'a>(snapshots: impl IntoIterator<Item = &'a ExperimentMetrics> + Clone) -> Self {
        let mut metrics = Self::default();

        for key in MetricKey::ALL {
            *metrics.get_mut(key) =
                StatisticalMetrics::aggregate(snapshots.clone().into_iter().map(|m| m.get(key)));
        }

        metrics
    }

    pub fn get(&self, key: MetricKey) -> &StatisticalMetrics {
        match key {
            MetricKey::Latency => &self.latency,
            MetricKey::CpuUsage => &self.cpu_usage,
            MetricKey::MemoryUsage => &self.memory_usage,
            MetricKey::DropoutCount => &self.dropout_count,
            MetricKey::AudioQuality => &self.audio_quality,
            MetricKey::ErrorRate => &self.error_rate,
            MetricKey::CrashRate => &self.crash_rate,
            MetricKey::RecoveryTime => &self.recovery_time,
        }
    }

    fn get_mut(&mut self, key: MetricKey) -> &mut StatisticalMetrics {
        match key {
            MetricKey::Latency => &mut self.latency,
            MetricKey::CpuUsage => &mut self.cpu_usage,
            MetricKey::MemoryUsage => &mut self.memory_usage,
            MetricKey::DropoutCount => &mut self.dropout_count,
            MetricKey::AudioQuality => &mut self.audio_quality,
            MetricKey::ErrorRate => &mut self.error_rate,
            MetricKey::CrashRate => &mut self.crash_rate,
            MetricKey::RecoveryTime => &mut self.recovery_time,
        }
    }
}
