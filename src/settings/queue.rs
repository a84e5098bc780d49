use crate::error::Result;
use crate::network::core::handle::Handle;
use crate::network::types::param::Param;
use clap::Parser;
use serde::{Deserialize, Serialize};

/// Queue parameter presets applied to a handle after it opens.
///
/// Unset fields keep the native defaults.
#[derive(Parser, Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// Maximum number of packets held in the receive queue (32 to 16384)
    #[arg(long = "queue-length", id = "queue-length")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,

    /// Maximum time a packet may wait in the queue, in milliseconds (100 to 16000)
    #[arg(long = "queue-time", id = "queue-time")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,

    /// Maximum number of bytes held in the receive queue (65535 to 33554432)
    #[arg(long = "queue-size", id = "queue-size")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl QueueOptions {
    /// The parameters this preset sets, in a fixed order.
    pub fn params(&self) -> Vec<(Param, u64)> {
        [
            (Param::QueueLength, self.length),
            (Param::QueueTime, self.time_ms),
            (Param::QueueSize, self.size_bytes),
        ]
        .into_iter()
        .filter_map(|(param, value)| value.map(|v| (param, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.params().is_empty()
    }

    /// Checks every value against its range without touching a handle.
    pub fn validate(&self) -> Result<()> {
        self.params()
            .into_iter()
            .try_for_each(|(param, value)| param.validate(value))
    }

    /// Validates the whole preset, then sets each parameter on `handle`.
    pub fn apply(&self, handle: &Handle) -> Result<()> {
        self.validate()?;
        for (param, value) in self.params() {
            handle.set_param(param, value)?;
        }
        Ok(())
    }
}
