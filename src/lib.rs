// Porchlight - Library Entry Point

pub mod clock;
pub mod config;
pub mod connection;
pub mod constants;
pub mod db;
pub mod detection;
pub mod error;
pub mod events;
pub mod runtime;
pub mod source;
pub mod timer;
pub mod tools;

pub use error::{PorchlightError, Result};
