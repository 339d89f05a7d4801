//! Typed views over variable memory
//!
//! A [`Variable`] is an address plus a [`VariableCodec`]: reads decode from the
//! region cache, writes go straight to the controller. The cache only changes
//! when the next poll cycle picks the write up.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use super::connection::DeviceLink;
use super::memory::MemoryRegion;
use super::notification::{ChangeHandler, SubscriptionId};
use crate::error::{LogoSrvError, Result};

/// Value types a channel can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ValueType {
    #[default]
    Byte,
    Integer,
    Float,
}

impl ValueType {
    /// Width in controller memory
    pub fn width(self) -> usize {
        match self {
            ValueType::Byte => ByteCodec::WIDTH,
            ValueType::Integer => IntegerCodec::WIDTH,
            ValueType::Float => FloatCodec::WIDTH,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A decoded value of any supported type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Byte(u8),
    Integer(i16),
    Float(f32),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Byte(_) => ValueType::Byte,
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
        }
    }

    /// Zero of the given type
    pub fn zero(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Byte => Value::Byte(0),
            ValueType::Integer => Value::Integer(0),
            ValueType::Float => Value::Float(0.0),
        }
    }
}

/// Encoding of one value type in controller memory
pub trait VariableCodec: Send + Sync + 'static {
    type Value: Copy + fmt::Debug + Send + Sync + 'static;
    const WIDTH: usize;
    const TYPE: ValueType;

    /// `bytes` is exactly `WIDTH` long
    fn decode(bytes: &[u8]) -> Self::Value;
    fn encode(value: Self::Value) -> Vec<u8>;
    fn wrap(value: Self::Value) -> Value;
    fn extract(value: Value) -> Option<Self::Value>;
}

/// Unsigned byte
#[derive(Debug)]
pub struct ByteCodec;

impl VariableCodec for ByteCodec {
    type Value = u8;
    const WIDTH: usize = 1;
    const TYPE: ValueType = ValueType::Byte;

    fn decode(bytes: &[u8]) -> u8 {
        bytes[0]
    }

    fn encode(value: u8) -> Vec<u8> {
        vec![value]
    }

    fn wrap(value: u8) -> Value {
        Value::Byte(value)
    }

    fn extract(value: Value) -> Option<u8> {
        match value {
            Value::Byte(v) => Some(v),
            _ => None,
        }
    }
}

/// Signed 16 bit word, big endian
#[derive(Debug)]
pub struct IntegerCodec;

impl VariableCodec for IntegerCodec {
    type Value = i16;
    const WIDTH: usize = 2;
    const TYPE: ValueType = ValueType::Integer;

    fn decode(bytes: &[u8]) -> i16 {
        i16::from_be_bytes([bytes[0], bytes[1]])
    }

    fn encode(value: i16) -> Vec<u8> {
        value.to_be_bytes().to_vec()
    }

    fn wrap(value: i16) -> Value {
        Value::Integer(value)
    }

    fn extract(value: Value) -> Option<i16> {
        match value {
            Value::Integer(v) => Some(v),
            _ => None,
        }
    }
}

/// IEEE 754 single precision, big endian
#[derive(Debug)]
pub struct FloatCodec;

impl VariableCodec for FloatCodec {
    type Value = f32;
    const WIDTH: usize = 4;
    const TYPE: ValueType = ValueType::Float;

    fn decode(bytes: &[u8]) -> f32 {
        f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn encode(value: f32) -> Vec<u8> {
        value.to_be_bytes().to_vec()
    }

    fn wrap(value: f32) -> Value {
        Value::Float(value)
    }

    fn extract(value: Value) -> Option<f32> {
        match value {
            Value::Float(v) => Some(v),
            _ => None,
        }
    }
}

/// Typed variable at a fixed address
pub struct Variable<C: VariableCodec> {
    region: Arc<MemoryRegion>,
    link: Arc<DeviceLink>,
    address: usize,
    codec: PhantomData<fn() -> C>,
}

impl<C: VariableCodec> Clone for Variable<C> {
    fn clone(&self) -> Self {
        Self {
            region: self.region.clone(),
            link: self.link.clone(),
            address: self.address,
            codec: PhantomData,
        }
    }
}

impl<C: VariableCodec> fmt::Debug for Variable<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("device", &self.link.name())
            .field("address", &self.address)
            .field("type", &C::TYPE)
            .finish()
    }
}

impl<C: VariableCodec> Variable<C> {
    pub(crate) fn new(region: Arc<MemoryRegion>, link: Arc<DeviceLink>, address: usize) -> Self {
        Self {
            region,
            link,
            address,
            codec: PhantomData,
        }
    }

    pub fn address(&self) -> usize {
        self.address
    }

    /// Value from the last completed poll cycle
    pub fn get(&self) -> Result<C::Value> {
        let bytes = self
            .region
            .get_bytes(self.address as i32, C::WIDTH as i32)?;
        Ok(C::decode(&bytes))
    }

    /// Same as [`Variable::get`], tagged with its type
    pub fn value(&self) -> Result<Value> {
        Ok(C::wrap(self.get()?))
    }

    /// Write `value` to the controller
    pub async fn set(&self, value: C::Value) -> Result<()> {
        let data = C::encode(value);
        let start = u16::try_from(self.address).map_err(|_| {
            LogoSrvError::invalid_address(format!("Address {} too large", self.address))
        })?;
        self.link.write("set", start, &data).await
    }

    /// Run `callback` after every poll cycle that changed this variable's bytes.
    ///
    /// The callback gets the value that cycle read, which may already be
    /// stale in the cache when the callback runs.
    pub fn subscribe_to_change_notification<F, Fut>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(Variable<C>, C::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let variable = self.clone();
        let handler: ChangeHandler = Arc::new(move |window: &[u8]| {
            callback(variable.clone(), C::decode(window)).boxed()
        });
        self.region
            .subscribe_to_change(self.address as i32, C::WIDTH as i32, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.region.unsubscribe(id)
    }
}

/// A variable of a type chosen at runtime
#[derive(Debug, Clone)]
pub enum AnyVariable {
    Byte(Variable<ByteCodec>),
    Integer(Variable<IntegerCodec>),
    Float(Variable<FloatCodec>),
}

impl AnyVariable {
    pub fn value_type(&self) -> ValueType {
        match self {
            AnyVariable::Byte(_) => ValueType::Byte,
            AnyVariable::Integer(_) => ValueType::Integer,
            AnyVariable::Float(_) => ValueType::Float,
        }
    }

    pub fn address(&self) -> usize {
        match self {
            AnyVariable::Byte(v) => v.address(),
            AnyVariable::Integer(v) => v.address(),
            AnyVariable::Float(v) => v.address(),
        }
    }

    pub fn get(&self) -> Result<Value> {
        match self {
            AnyVariable::Byte(v) => v.value(),
            AnyVariable::Integer(v) => v.value(),
            AnyVariable::Float(v) => v.value(),
        }
    }

    /// Write `value`; its type must match the variable's
    pub async fn set(&self, value: Value) -> Result<()> {
        match self {
            AnyVariable::Byte(v) => v.set(Self::expect::<ByteCodec>(value)?).await,
            AnyVariable::Integer(v) => v.set(Self::expect::<IntegerCodec>(value)?).await,
            AnyVariable::Float(v) => v.set(Self::expect::<FloatCodec>(value)?).await,
        }
    }

    fn expect<C: VariableCodec>(value: Value) -> Result<C::Value> {
        C::extract(value).ok_or_else(|| {
            LogoSrvError::data(format!(
                "{} value given for a {} variable",
                value.value_type(),
                C::TYPE
            ))
        })
    }

    pub fn subscribe_to_change_notification<F, Fut>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(AnyVariable, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        match self {
            AnyVariable::Byte(v) => v.subscribe_to_change_notification(move |v, value| {
                callback(AnyVariable::Byte(v), Value::Byte(value))
            }),
            AnyVariable::Integer(v) => v.subscribe_to_change_notification(move |v, value| {
                callback(AnyVariable::Integer(v), Value::Integer(value))
            }),
            AnyVariable::Float(v) => v.subscribe_to_change_notification(move |v, value| {
                callback(AnyVariable::Float(v), Value::Float(value))
            }),
        }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self {
            AnyVariable::Byte(v) => v.unsubscribe(id),
            AnyVariable::Integer(v) => v.unsubscribe(id),
            AnyVariable::Float(v) => v.unsubscribe(id),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::device::{Device, RegionSpec};
    use crate::core::transport::MockPlc;
    use std::time::Duration;

    #[test]
    fn test_codecs() {
        assert_eq!(IntegerCodec::encode(1337), vec![0x05, 0x39]);
        assert_eq!(IntegerCodec::decode(&[0xFF, 0xFE]), -2);
        assert_eq!(FloatCodec::encode(13.3), 13.3f32.to_be_bytes().to_vec());
        assert!(FloatCodec::decode(&FloatCodec::encode(f32::NAN)).is_nan());
        assert_eq!(ByteCodec::decode(&[200]), 200);
    }

    #[test]
    fn test_value_type_width() {
        assert_eq!(ValueType::Byte.width(), 1);
        assert_eq!(ValueType::Integer.width(), 2);
        assert_eq!(ValueType::Float.width(), 4);
        assert_eq!(Value::zero(ValueType::Float), Value::Float(0.0));
    }

    #[tokio::test]
    async fn test_set_does_not_touch_cache() {
        let plc = MockPlc::new();
        let device = Device::new(
            "logo",
            Box::new(plc.transport()),
            &[RegionSpec::new(0, 32, Duration::from_secs(60))],
            None,
        )
        .unwrap();
        assert!(device.link().connect().await);

        let variable = device.integer_at(17).unwrap();
        variable.set(1337).await.unwrap();
        assert_eq!(plc.get(17, 2), vec![0x05, 0x39]);
        assert_eq!(variable.get().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_any_variable_type_mismatch() {
        let plc = MockPlc::new();
        let device = Device::new(
            "logo",
            Box::new(plc.transport()),
            &[RegionSpec::new(0, 32, Duration::from_secs(60))],
            None,
        )
        .unwrap();
        assert!(device.link().connect().await);

        let variable = device.variable(4, ValueType::Byte).unwrap();
        assert!(matches!(
            variable.set(Value::Float(1.0)).await,
            Err(LogoSrvError::DataError(_))
        ));
        variable.set(Value::Byte(9)).await.unwrap();
        assert_eq!(plc.writes(), 1);
    }
}
