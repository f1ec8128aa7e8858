mod frontend;
mod polling;

pub use frontend::{ContactlessFrontend, NfcError, NullFrontend, SensedTarget};
pub use polling::{IterationOutcome, PollingLoop};
