//! Line-atomic, timestamped log stream shared by the runner and its checks.

pub mod line;

pub use line::{Logger, MemorySink};
