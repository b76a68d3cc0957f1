mod host_preparer;
mod manual_clock;
mod memory_topic;
mod system_clock;

pub use host_preparer::HostPreparer;
pub use manual_clock::ManualClock;
pub use memory_topic::{MemoryNetwork, MemoryTopic};
pub use system_clock::SystemClock;
