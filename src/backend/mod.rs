pub mod command_bus;
pub mod disk;
pub mod instance_cache;
pub mod manager;
pub mod parse;
pub mod runner;

pub use command_bus::CommandBus;
pub use instance_cache::InstanceCache;
pub use manager::{ManagerOptions, MumuManager};
pub use runner::ProcessRunner;
