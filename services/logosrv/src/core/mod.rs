//! Core of the LOGO! bridge

pub mod bootstrap;
pub mod config;
pub mod device;
pub mod mapper;
pub mod mqtt;
pub mod status;
pub mod transport;
