pub mod controller;
pub mod registry;
pub mod state;

pub use controller::{StatusSource, WaitConfig, WaitSnapshot};
pub use registry::{RegistryError, WaitRegistry};
pub use state::JobStatus;
