pub mod config;
pub mod controller;

pub use config::{Config, LoadError};
pub use controller::{Options, Smtpw};
