pub mod flags;
pub mod param;
pub mod priority;

pub use flags::{ChecksumFlags, OpenFlags, Shutdown};
pub use param::{Param, ParamRange};
pub use priority::Priority;
