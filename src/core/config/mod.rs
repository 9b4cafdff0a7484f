pub mod data;
pub mod defaults;
pub mod io;
pub mod printing;

pub use data::{AnimationSettings, Config};
pub use io::ConfigError;

#[cfg(test)]
mod tests;
