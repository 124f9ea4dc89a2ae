pub mod camera;
pub mod catalog;
pub mod client;
pub mod config;
pub mod encode;
pub mod error;
pub mod logging;
pub mod presentation;
pub mod protocol;
pub mod sampler;
pub mod session;
pub mod state;
