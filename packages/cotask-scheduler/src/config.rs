use serde::{Deserialize, Serialize};

/// How a repeating timer computes its next deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatPolicy {
    /// `deadline + interval`. Late passes do not push later firings back, so
    /// skew stays bounded by one pass of latency.
    #[default]
    FromDeadline,
    /// `now + interval`. Lateness accumulates across firings.
    FromNow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Instructions between debug-hook calls once a scripted task is
    /// interrupted. Zero is treated as one.
    pub hook_interval: u32,
    pub repeat_policy: RepeatPolicy,
    /// Chunk name handed to the engine by `parse_and_start`.
    pub chunk_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            hook_interval: 1,
            repeat_policy: RepeatPolicy::FromDeadline,
            chunk_name: "usercode".to_string(),
        }
    }
}
