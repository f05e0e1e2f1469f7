//! [`SignalBuffer`] – byte-accurate storage for every signal of one direction.
//!
//! A buffer is only ever created through [`SignalBuffer::allocate`], which
//! sizes it from the signal table and tags it with the owning adapter's byte
//! order.  Element access goes through the [`SignalMetadata`] offsets and
//! always honours that tag, so a buffer produced by a little-endian adapter
//! can be decoded correctly by a big-endian one.

use serde::Serialize;

use crate::signal::{ByteOrder, DataType, SignalMetadata};
use crate::time::SimTime;
use crate::BridgeError;

/// Fixed-length, byte-order-tagged signal buffer with a read cursor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalBuffer {
    data: Vec<u8>,
    byte_order: ByteOrder,
    position: usize,
}

impl SignalBuffer {
    /// Allocate a zeroed buffer large enough for `signals`.
    pub fn allocate(signals: &[SignalMetadata], byte_order: ByteOrder) -> Self {
        let len = signals
            .iter()
            .map(|s| s.offset() + s.byte_len())
            .max()
            .unwrap_or(0);
        Self {
            data: vec![0; len],
            byte_order,
            position: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the cursor back to the start.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Decode element `index` of `signal` as `f64`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Layout`] when the element lies outside the
    /// signal or the buffer.
    pub fn read_value(&self, signal: &SignalMetadata, index: usize) -> Result<f64, BridgeError> {
        let (start, width) = self.element(signal, index)?;
        let mut raw = [0u8; 8];
        raw[..width].copy_from_slice(&self.data[start..start + width]);
        if self.byte_order == ByteOrder::Little {
            raw[..width].reverse();
        }

        let value = match signal.data_type() {
            DataType::Float32 => f64::from(f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
            DataType::Float64 => f64::from_be_bytes(raw),
            DataType::Int8 => f64::from(i8::from_be_bytes([raw[0]])),
            DataType::Int16 => f64::from(i16::from_be_bytes([raw[0], raw[1]])),
            DataType::Int32 => f64::from(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
        };
        Ok(value)
    }

    /// Encode `value` into element `index` of `signal` and leave the cursor
    /// just past it.
    ///
    /// Integer types round to nearest and saturate at the type bounds; NaN
    /// becomes zero.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Layout`] when the element lies outside the
    /// signal or the buffer.
    pub fn write_value(
        &mut self,
        signal: &SignalMetadata,
        index: usize,
        value: f64,
    ) -> Result<(), BridgeError> {
        let (start, width) = self.element(signal, index)?;
        let mut raw = [0u8; 8];
        match signal.data_type() {
            DataType::Float32 => raw[..4].copy_from_slice(&(value as f32).to_be_bytes()),
            DataType::Float64 => raw.copy_from_slice(&value.to_be_bytes()),
            DataType::Int8 => raw[..1].copy_from_slice(&(value.round() as i8).to_be_bytes()),
            DataType::Int16 => raw[..2].copy_from_slice(&(value.round() as i16).to_be_bytes()),
            DataType::Int32 => raw[..4].copy_from_slice(&(value.round() as i32).to_be_bytes()),
        }
        if self.byte_order == ByteOrder::Little {
            raw[..width].reverse();
        }
        self.data[start..start + width].copy_from_slice(&raw[..width]);
        self.position = start + width;
        Ok(())
    }

    /// Decode every element of `signal`.
    pub fn read_all(&self, signal: &SignalMetadata) -> Result<Vec<f64>, BridgeError> {
        (0..signal.length())
            .map(|i| self.read_value(signal, i))
            .collect()
    }

    fn element(&self, signal: &SignalMetadata, index: usize) -> Result<(usize, usize), BridgeError> {
        if index >= signal.length() {
            return Err(BridgeError::Layout(format!(
                "index {index} out of range for signal '{}' (length {})",
                signal.name(),
                signal.length()
            )));
        }
        let width = signal.data_type().width();
        let start = signal.offset() + index * width;
        if start + width > self.data.len() {
            return Err(BridgeError::Layout(format!(
                "signal '{}' lies outside a {}-byte buffer",
                signal.name(),
                self.data.len()
            )));
        }
        Ok((start, width))
    }
}

/// A buffer in flight between the two procedures, tagged with the time it
/// was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub buffer: SignalBuffer,
    pub origin: SimTime,
}

impl Frame {
    pub fn new(buffer: SignalBuffer, origin: SimTime) -> Self {
        Self { buffer, origin }
    }
}
