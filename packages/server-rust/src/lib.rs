//! cloudkv server — transaction logger backends, the replay engine, the
//! REST and RPC frontends, the config watcher, and the service
//! supervisor that wires them together.

pub mod frontend;
pub mod logger;
pub mod replay;
pub mod supervisor;
pub mod watcher;

pub use replay::{replay, ReplayError};
pub use supervisor::{Supervisor, SupervisorError};
