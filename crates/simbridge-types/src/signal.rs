//! Signal metadata and the fixed binary layout derived from it.
//!
//! A [`SignalLayout`] is built once at startup from an ordered list of
//! [`SignalDefinition`]s.  Each direction gets its own buffer; signals are
//! packed back to back in declaration order and every [`SignalMetadata`]
//! records its byte offset into that buffer.
//!
//! ```
//! use simbridge_types::{DataType, Direction, SignalDefinition, SignalLayout};
//!
//! let layout = SignalLayout::build(vec![
//!     SignalDefinition::new("speed", DataType::Float64, Direction::ToExternalSystem),
//!     SignalDefinition::new("valve", DataType::Int16, Direction::ToProcessModel).with_length(4),
//!     SignalDefinition::new("flow", DataType::Float32, Direction::ToExternalSystem),
//! ])
//! .unwrap();
//!
//! assert_eq!(layout.buffer_len(Direction::ToExternalSystem), 12);
//! assert_eq!(layout.buffer_len(Direction::ToProcessModel), 8);
//! assert_eq!(layout.find("flow").unwrap().offset(), 8);
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::BridgeError;

// ────────────────────────────────────────────────────────────────────────────
// Enumerations
// ────────────────────────────────────────────────────────────────────────────

/// Logical nature of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    #[default]
    Analog,
    Digital,
}

name_table!(SignalKind {
    Analog => "analog",
    Digital => "digital",
});

/// Primitive element type stored in the shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Float32,
    Float64,
    Int8,
    Int16,
    Int32,
}

name_table!(DataType {
    Float32 => "float32",
    Float64 => "float64",
    Int8 => "int8",
    Int16 => "int16",
    Int32 => "int32",
});

impl DataType {
    /// Size of one element in bytes.
    pub fn width(self) -> usize {
        match self {
            DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Float32 | DataType::Int32 => 4,
            DataType::Float64 => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DataType::Int8 | DataType::Int16 | DataType::Int32)
    }
}

/// Which way a signal travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Produced by the process model, consumed by the external system.
    ToExternalSystem,
    /// Produced by the external system, consumed by the process model.
    ToProcessModel,
}

name_table!(Direction {
    ToExternalSystem => "to_external_system",
    ToProcessModel => "to_process_model",
});

/// Byte order of an adapter's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

name_table!(ByteOrder {
    Big => "big",
    Little => "little",
});

// ────────────────────────────────────────────────────────────────────────────
// Definitions (input) and metadata (built)
// ────────────────────────────────────────────────────────────────────────────

fn default_length() -> usize {
    1
}

/// One signal as declared by the signal list, before offsets are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDefinition {
    pub name: String,
    #[serde(default)]
    pub kind: SignalKind,
    pub data_type: DataType,
    /// Number of consecutive elements (array signals have `length > 1`).
    #[serde(default = "default_length")]
    pub length: usize,
    pub direction: Direction,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub sink: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl SignalDefinition {
    /// A scalar analog signal with empty source/sink.
    pub fn new(name: impl Into<String>, data_type: DataType, direction: Direction) -> Self {
        Self {
            name: name.into(),
            kind: SignalKind::Analog,
            data_type,
            length: 1,
            direction,
            source: String::new(),
            sink: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    pub fn with_kind(mut self, kind: SignalKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_endpoints(mut self, source: impl Into<String>, sink: impl Into<String>) -> Self {
        self.source = source.into();
        self.sink = sink.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Immutable description of one signal and its place in the shared buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalMetadata {
    name: String,
    kind: SignalKind,
    data_type: DataType,
    length: usize,
    direction: Direction,
    source: String,
    sink: String,
    attributes: BTreeMap<String, String>,
    offset: usize,
}

impl SignalMetadata {
    fn from_definition(def: SignalDefinition, offset: usize) -> Self {
        Self {
            name: def.name,
            kind: def.kind,
            data_type: def.data_type,
            length: def.length,
            direction: def.direction,
            source: def.source,
            sink: def.sink,
            attributes: def.attributes,
            offset,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Repeat length (element count).
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn sink(&self) -> &str {
        &self.sink
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Byte offset of the first element inside this direction's buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total bytes occupied by this signal.
    pub fn byte_len(&self) -> usize {
        self.data_type.width() * self.length
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SignalLayout
// ────────────────────────────────────────────────────────────────────────────

/// The complete, direction-split signal table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignalLayout {
    to_external_system: Vec<SignalMetadata>,
    to_process_model: Vec<SignalMetadata>,
}

impl SignalLayout {
    /// Assign offsets and split `definitions` by direction, preserving order.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Layout`] for an empty name, a duplicate name, a
    /// zero repeat length, or a signal whose offset or size overflows `usize`.
    pub fn build(definitions: Vec<SignalDefinition>) -> Result<Self, BridgeError> {
        let mut seen = HashSet::new();
        let mut layout = SignalLayout::default();
        let mut es_offset: usize = 0;
        let mut pm_offset: usize = 0;

        for def in definitions {
            if def.name.trim().is_empty() {
                return Err(BridgeError::Layout("signal with empty name".to_string()));
            }
            if def.length == 0 {
                return Err(BridgeError::Layout(format!(
                    "signal '{}' has zero length",
                    def.name
                )));
            }
            if !seen.insert(def.name.clone()) {
                return Err(BridgeError::Layout(format!(
                    "duplicate signal name '{}'",
                    def.name
                )));
            }

            let offset = match def.direction {
                Direction::ToExternalSystem => &mut es_offset,
                Direction::ToProcessModel => &mut pm_offset,
            };
            let end = def
                .data_type
                .width()
                .checked_mul(def.length)
                .and_then(|size| offset.checked_add(size))
                .ok_or_else(|| BridgeError::Layout(format!("signal '{}' is too large", def.name)))?;
            let meta = SignalMetadata::from_definition(def, *offset);
            *offset = end;
            match meta.direction() {
                Direction::ToExternalSystem => layout.to_external_system.push(meta),
                Direction::ToProcessModel => layout.to_process_model.push(meta),
            }
        }
        Ok(layout)
    }

    /// Signals travelling in `direction`, in declaration order.
    pub fn signals(&self, direction: Direction) -> &[SignalMetadata] {
        match direction {
            Direction::ToExternalSystem => &self.to_external_system,
            Direction::ToProcessModel => &self.to_process_model,
        }
    }

    /// Size in bytes of the buffer for `direction`.
    pub fn buffer_len(&self, direction: Direction) -> usize {
        self.signals(direction).iter().map(SignalMetadata::byte_len).sum()
    }

    /// Find a signal by name in either direction.
    pub fn find(&self, name: &str) -> Option<&SignalMetadata> {
        self.to_external_system
            .iter()
            .chain(self.to_process_model.iter())
            .find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.to_external_system.len() + self.to_process_model.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
