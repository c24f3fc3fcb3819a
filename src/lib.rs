pub mod buffer;
pub mod config;
pub mod connection;
pub mod controller;
pub mod error;
pub mod event;
pub mod frame;
pub mod handlers;
pub mod hello_napp;
pub mod listener;
pub mod napp;
pub mod server;
mod shutdown;
pub mod switch;

pub use config::Config;
pub use controller::Controller;
pub use error::{Error, Result};
pub use frame::{Codec, OpenFlowHelloCodec, OpenFlowMessage};
