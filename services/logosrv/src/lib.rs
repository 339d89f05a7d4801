//! LOGO! MQTT bridge library (logosrv)
//!
//! Mirrors the local variable memory of Siemens LOGO! controllers to an MQTT
//! broker and writes values received over MQTT back to the controllers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │   LOGO! (S7)    │◄──►│  Device + polled│───►│   Mappings      │
//! │   port 102      │    │  memory regions │    │  (codec)        │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!                                 │                       │
//!                                 ▼                       ▼
//!                        ┌─────────────────┐    ┌─────────────────┐
//!                        │ Status reporter │───►│  MQTT channels  │
//!                        │                 │    │  (rumqttc)      │
//!                        └─────────────────┘    └─────────────────┘
//! ```
//!
//! - **`core::transport`**: S7 over ISO-on-TCP client and an in-memory mock
//! - **`core::device`**: connection state machine, polled regions, typed variables
//! - **`core::mqtt`**: broker sessions with reconnect and resubscribe
//! - **`core::mapper`**: topic to variable wiring and the text payload codec
//! - **`core::status`**: status side channel with last will
//! - **`core::config`**: configuration file, env overrides and validation
//! - **`runtime`**: application context and its lifecycle

pub mod core;
pub mod error;
pub mod runtime;

pub use error::{LogoSrvError, Result};
pub use runtime::AppContext;
