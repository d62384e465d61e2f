//! Audio optimization settings carried by a variant
//!
//! The audio engine is the only consumer of these values. The engine core only stores
//! them and hands them back through `apply_variant_config`.

use serde::{Deserialize, Serialize};

/// Callback scheduling strategy used by the audio engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingAlgorithm {
    Fifo,
    Priority,
    RoundRobin,
    Adaptive,
}

/// Processing quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Low,
    Medium,
    High,
    Ultra,
}

/// Engine tuning knobs that do not warrant a dedicated field.
///
/// Every key the audio engine recognises is a variant here, so an unknown key is a
/// deserialization error rather than a silently ignored setting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "snake_case")]
pub enum TuningParameter {
    /// Milliseconds of audio rendered ahead of the playback cursor. Higher values trade
    /// latency for dropout resistance.
    LookaheadMs(u32),
    /// Size of the network jitter buffer in milliseconds for streamed sources.
    JitterBufferMs(u32),
    /// Number of decoded frames kept ready per voice.
    PrefetchFrames(u32),
    /// Skip the effect chain entirely; used to isolate DSP cost.
    DspBypass(bool),
    /// Relative OS priority of the render thread, -20 (highest) to 19.
    ThreadPriority(i8),
}

impl TuningParameter {
    /// Stable key name, matching the serialized `key` field
    pub fn key(&self) -> &'static str {
        match self {
            Self::LookaheadMs(_) => "lookahead_ms",
            Self::JitterBufferMs(_) => "jitter_buffer_ms",
            Self::PrefetchFrames(_) => "prefetch_frames",
            Self::DspBypass(_) => "dsp_bypass",
            Self::ThreadPriority(_) => "thread_priority",
        }
    }
}

/// Configuration payload applied by the audio engine for one variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Render buffer size in frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<u32>,
    /// Output sample rate in Hz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling_algorithm: Option<SchedulingAlgorithm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityLevel>,
    /// Number of DSP worker threads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_threads: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_parameters: Vec<TuningParameter>,
}

impl OptimizationConfig {
    /// Create an empty configuration (engine defaults everywhere)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer_size(mut self, frames: u32) -> Self {
        self.buffer_size = Some(frames);
        self
    }

    pub fn with_sample_rate(mut self, hz: u32) -> Self {
        self.sample_rate = Some(hz);
        self
    }

    pub fn with_scheduling(mut self, algorithm: SchedulingAlgorithm) -> Self {
        self.scheduling_algorithm = Some(algorithm);
        self
    }

    pub fn with_quality(mut self, quality: QualityLevel) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_worker_threads(mut self, threads: u16) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Set a tuning parameter, replacing any earlier value for the same key
    pub fn with_parameter(mut self, parameter: TuningParameter) -> Self {
        self.custom_parameters.retain(|p| p.key() != parameter.key());
        self.custom_parameters.push(parameter);
        self
    }

    /// Look up a tuning parameter by key
    pub fn parameter(&self, key: &str) -> Option<&TuningParameter> {
        self.custom_parameters.iter().find(|p| p.key() == key)
    }

    /// Check if any setting deviates from engine defaults
    pub fn has_overrides(&self) -> bool {
        self.buffer_size.is_some()
            || self.sample_rate.is_some()
            || self.scheduling_algorithm.is_some()
            || self.quality.is_some()
            || self.worker_threads.is_some()
            || !self.custom_parameters.is_empty()
    }
}
