//! Transport layer
//!
//! ```text
//!   Device (memory regions, variables)
//!                 │
//!                 ▼
//!   DeviceTransport trait: connect / read_area / write_area
//!                 │
//!        ┌────────┴────────┐
//!        ▼                 ▼
//!   S7Transport       MockTransport
//!   (ISO-on-TCP)      (in-memory PLC)
//! ```

pub mod mock;
pub mod s7;
pub mod traits;

pub use mock::{MockPlc, MockTransport, VM_SIZE};
pub use s7::{S7Config, S7Transport};
pub use traits::{ConnectionState, DeviceTransport, TransportError, TransportStats};
