use crate::error::DivertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Formatter;
use std::str::FromStr;

/// Represents a handle priority between -3000 and 3000.
///
/// Among handles open at the same layer, higher priorities see packets
/// first. The range is checked on construction, so an out-of-range value is
/// rejected before anything reaches the native component.
///
/// # Example
///
/// ```
/// use divert::network::types::priority::Priority;
///
/// let p = Priority::new(1000).unwrap();
/// assert_eq!(p.value(), 1000);
///
/// assert!(Priority::new(3001).is_err());
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub struct Priority(i16);

impl Priority {
    pub const HIGHEST: Priority = Priority(3000);
    pub const LOWEST: Priority = Priority(-3000);
    pub const DEFAULT: Priority = Priority(0);

    /// Creates a new priority, ensuring it's between -3000 and 3000.
    ///
    /// # Returns
    ///
    /// * `Err(DivertError::InvalidPriority)` - If the value is outside the range
    pub fn new(value: i16) -> Result<Self, DivertError> {
        if !(Self::LOWEST.0..=Self::HIGHEST.0).contains(&value) {
            return Err(DivertError::InvalidPriority(value));
        }

        Ok(Priority(value))
    }

    /// Returns the underlying priority value.
    pub fn value(&self) -> i16 {
        self.0
    }
}

impl TryFrom<i16> for Priority {
    type Error = DivertError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        Priority::new(value)
    }
}

impl FromStr for Priority {
    type Err = DivertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i16 = s
            .trim()
            .parse()
            .map_err(|_| DivertError::Config(format!("'{}' is not a valid priority", s)))?;
        Priority::new(value)
    }
}

impl From<Priority> for i16 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
