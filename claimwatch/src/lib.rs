pub mod awake;
pub mod config;
pub mod console;
pub mod consumer;
pub mod mailbox;
pub mod monitor;
pub mod producer;
pub mod supervisor;
pub mod ticket;

// re-export selected public API
pub use config::{Settings, load_or_default};
pub use supervisor::{ManagedService, ServiceDescriptor};
