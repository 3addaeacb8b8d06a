pub mod adapter;
#[cfg(feature = "bluetooth")]
pub mod bluez;
pub mod config;
pub mod device;
pub mod error;
pub mod filter;
pub mod notify;
pub mod replay;
pub mod report;
pub mod scanner;
pub mod signal;
pub mod swarm;

pub use adapter::{Adapter, AdapterState, Advertisement};
pub use config::Config;
pub use device::Device;
pub use error::{Error, Result};
pub use scanner::Scanner;
pub use signal::{accuracy, distance, ReferencePower};
pub use swarm::Swarm;
