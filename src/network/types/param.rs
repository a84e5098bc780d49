use crate::error::DivertError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime parameters exposed through `get_param` / `set_param`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum Param {
    /// Maximum number of packets held in the receive queue
    QueueLength = 0,
    /// Maximum time in milliseconds a packet may wait in the queue
    QueueTime = 1,
    /// Maximum number of bytes held in the receive queue
    QueueSize = 2,
    /// Major version of the native component (read-only)
    VersionMajor = 3,
    /// Minor version of the native component (read-only)
    VersionMinor = 4,
}

/// Inclusive bounds and default of a writable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamRange {
    pub min: u64,
    pub max: u64,
    pub default: u64,
}

pub const QUEUE_LENGTH: ParamRange = ParamRange {
    min: 32,
    max: 16384,
    default: 4096,
};

pub const QUEUE_TIME: ParamRange = ParamRange {
    min: 100,
    max: 16000,
    default: 2000,
};

pub const QUEUE_SIZE: ParamRange = ParamRange {
    min: 65535,
    max: 33_554_432,
    default: 4_194_304,
};

impl Param {
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Self::QueueLength),
            1 => Some(Self::QueueTime),
            2 => Some(Self::QueueSize),
            3 => Some(Self::VersionMajor),
            4 => Some(Self::VersionMinor),
            _ => None,
        }
    }

    /// The writable range, or `None` for read-only parameters.
    pub fn range(self) -> Option<ParamRange> {
        match self {
            Self::QueueLength => Some(QUEUE_LENGTH),
            Self::QueueTime => Some(QUEUE_TIME),
            Self::QueueSize => Some(QUEUE_SIZE),
            Self::VersionMajor | Self::VersionMinor => None,
        }
    }

    /// Checks a value for `set_param` without touching the native component.
    pub fn validate(self, value: u64) -> Result<(), DivertError> {
        let range = self.range().ok_or(DivertError::UnsupportedParam(self.id()))?;
        if !(range.min..=range.max).contains(&value) {
            return Err(DivertError::InvalidParamValue {
                param: self,
                value,
                min: range.min,
                max: range.max,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::QueueLength => "queue length",
            Self::QueueTime => "queue time",
            Self::QueueSize => "queue size",
            Self::VersionMajor => "major version",
            Self::VersionMinor => "minor version",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_length_bounds() {
        assert!(Param::QueueLength.validate(32).is_ok());
        assert!(Param::QueueLength.validate(16384).is_ok());
        assert_eq!(
            Param::QueueLength.validate(31),
            Err(DivertError::InvalidParamValue {
                param: Param::QueueLength,
                value: 31,
                min: 32,
                max: 16384,
            })
        );
        assert!(Param::QueueLength.validate(16385).is_err());
    }

    #[test]
    fn test_queue_time_and_size_bounds() {
        assert!(Param::QueueTime.validate(99).is_err());
        assert!(Param::QueueTime.validate(QUEUE_TIME.default).is_ok());
        assert!(Param::QueueSize.validate(65535).is_ok());
        assert!(Param::QueueSize.validate(33_554_433).is_err());
    }

    #[test]
    fn test_version_params_are_read_only() {
        assert_eq!(
            Param::VersionMajor.validate(2),
            Err(DivertError::UnsupportedParam(3))
        );
    }

    #[test]
    fn test_ids() {
        for id in 0..5 {
            assert_eq!(Param::from_id(id).map(Param::id), Some(id));
        }
        assert_eq!(Param::from_id(5), None);
    }
}
