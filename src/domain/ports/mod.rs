mod clock;
mod preparer;
mod topic;

pub use clock::Clock;
pub use preparer::{NoopPreparer, PrepareError, Preparer};
pub use topic::{Message, MessageValidator, RelayHandle, Topic, TopicError, ValidationResult};
