pub mod chrome;
pub mod hooks;
pub mod listener;

pub use chrome::{ChromeDriver, ConnectionMode};
pub use hooks::{install_hooks, BINDING_NAME};
pub use listener::{decode_signal, spawn_listener};
