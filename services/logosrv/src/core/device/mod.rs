//! LOGO! device model: connection, polled memory regions, typed variables

pub mod connection;
pub mod memory;
pub mod notification;
pub mod variable;

pub use connection::{Device, DeviceLink};
pub use memory::{MemoryImage, MemoryRegion, RegionSpec, FAILURE_BACKOFF, RECONNECT_THRESHOLD};
pub use notification::{ChangeHandler, NotificationRegistry, SubscriptionId};
pub use variable::{
    AnyVariable, ByteCodec, FloatCodec, IntegerCodec, Value, ValueType, Variable, VariableCodec,
};
