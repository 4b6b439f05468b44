//! Job runner adapters.

pub mod local_process;
pub mod mock;
pub mod throttled;

pub use local_process::LocalProcessRunner;
pub use mock::{MockJobRunner, MockResult, MockStep};
pub use throttled::ThrottledRunner;
