pub mod clienv;
pub mod config;
pub mod error;
pub mod rebuild;
pub mod rotation;
pub mod stove;
pub mod trigger;
pub mod watcher;

pub use config::{ConfigSource, FileConfigSource, StoveConfig};
pub use error::{Result, StoveError};
pub use rotation::{Address, RelayListener, RotationController, WorkerEntry, WorkerSupervisor};
pub use stove::{Shutdown, Stove};
