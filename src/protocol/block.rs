//! Column blocks.
//!
//! The engine hands back results in a compact raw layout:
//!
//! ```text
//! [columns: u8][rows: u8] then per column [name: string][type: string][values]
//! ```
//!
//! where strings are varint-length-prefixed and values are `rows` length-prefixed strings
//! for `String` columns or `rows * width` little-endian bytes for fixed-width numerics.
//!
//! On the wire a block is a [`BlockInfo`] preamble, varint column and row counts, then per
//! column its name, type, a custom-serialization flag (always 0) and the values in the
//! same per-type encoding.
use std::{
    io::{Read, Write},
    string::FromUtf8Error,
};

use thiserror::Error;

use super::{
    ProtocolError, ProtocolTransport, TransportError,
    revision::{Feature, Revision},
    transport::{fill, read_exact_vec},
    varint,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    UInt8,
    Int8,
    Bool,
    UInt16,
    Int16,
    Date,
    UInt32,
    Int32,
    Float32,
    DateTime,
    UInt64,
    Int64,
    Float64,
}

impl ColumnType {
    pub fn parse(tag: &str) -> Option<Self> {
        let ty = match tag {
            "String" => ColumnType::String,
            "UInt8" => ColumnType::UInt8,
            "Int8" => ColumnType::Int8,
            "Bool" => ColumnType::Bool,
            "UInt16" => ColumnType::UInt16,
            "Int16" => ColumnType::Int16,
            "Date" => ColumnType::Date,
            "UInt32" => ColumnType::UInt32,
            "Int32" => ColumnType::Int32,
            "Float32" => ColumnType::Float32,
            "DateTime" => ColumnType::DateTime,
            "UInt64" => ColumnType::UInt64,
            "Int64" => ColumnType::Int64,
            "Float64" => ColumnType::Float64,
            _ => return None,
        };
        Some(ty)
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::String => "String",
            ColumnType::UInt8 => "UInt8",
            ColumnType::Int8 => "Int8",
            ColumnType::Bool => "Bool",
            ColumnType::UInt16 => "UInt16",
            ColumnType::Int16 => "Int16",
            ColumnType::Date => "Date",
            ColumnType::UInt32 => "UInt32",
            ColumnType::Int32 => "Int32",
            ColumnType::Float32 => "Float32",
            ColumnType::DateTime => "DateTime",
            ColumnType::UInt64 => "UInt64",
            ColumnType::Int64 => "Int64",
            ColumnType::Float64 => "Float64",
        }
    }

    /// Bytes per value, `None` for length-prefixed strings.
    pub fn width(self) -> Option<usize> {
        match self {
            ColumnType::String => None,
            ColumnType::UInt8 | ColumnType::Int8 | ColumnType::Bool => Some(1),
            ColumnType::UInt16 | ColumnType::Int16 | ColumnType::Date => Some(2),
            ColumnType::UInt32 | ColumnType::Int32 | ColumnType::Float32 | ColumnType::DateTime => {
                Some(4)
            }
            ColumnType::UInt64 | ColumnType::Int64 | ColumnType::Float64 => Some(8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnData {
    Strings(Vec<Vec<u8>>),
    /// Values back to back, little-endian.
    Fixed(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub data: ColumnData,
}

impl Column {
    pub fn rows(&self) -> usize {
        match (&self.data, self.ty.width()) {
            (ColumnData::Strings(values), _) => values.len(),
            (ColumnData::Fixed(bytes), Some(width)) => bytes.len() / width,
            (ColumnData::Fixed(_), None) => 0,
        }
    }

    /// Render one value for display.
    pub fn display(&self, row: usize) -> Option<String> {
        let value = match &self.data {
            ColumnData::Strings(values) => {
                return values
                    .get(row)
                    .map(|v| String::from_utf8_lossy(v).into_owned());
            }
            ColumnData::Fixed(bytes) => {
                let width = self.ty.width()?;
                bytes.get(row * width..(row + 1) * width)?
            }
        };

        let mut buf = [0u8; 8];
        buf[..value.len()].copy_from_slice(value);
        let text = match self.ty {
            ColumnType::UInt8 => value[0].to_string(),
            ColumnType::Int8 => (value[0] as i8).to_string(),
            ColumnType::Bool => (value[0] != 0).to_string(),
            ColumnType::UInt16 | ColumnType::Date => u16::from_le_bytes([buf[0], buf[1]]).to_string(),
            ColumnType::Int16 => i16::from_le_bytes([buf[0], buf[1]]).to_string(),
            ColumnType::UInt32 | ColumnType::DateTime => {
                u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]).to_string()
            }
            ColumnType::Int32 => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]).to_string(),
            ColumnType::Float32 => f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]).to_string(),
            ColumnType::UInt64 => u64::from_le_bytes(buf).to_string(),
            ColumnType::Int64 => i64::from_le_bytes(buf).to_string(),
            ColumnType::Float64 => f64::from_le_bytes(buf).to_string(),
            ColumnType::String => return None,
        };
        Some(text)
    }
}

/// Raw engine output that does not follow the block layout. Reported to the client as
/// an exception; the connection itself is unaffected.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("result truncated")]
    Truncated,

    #[error("malformed length in result: {0}")]
    Malformed(TransportError),

    #[error("unsupported column type '{0}'")]
    UnknownType(String),

    #[error("column name is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),

    #[error("column '{column}' has {actual} rows, block has {expected}")]
    RowMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("{0} unexpected bytes after the last column")]
    TrailingBytes(usize),
}

impl From<TransportError> for BlockError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::ConnectionClosed => BlockError::Truncated,
            TransportError::InvalidUtf8(e) => BlockError::InvalidUtf8(e),
            other => BlockError::Malformed(other),
        }
    }
}

fn take_u8(raw: &mut &[u8]) -> Result<u8, BlockError> {
    let mut byte = [0u8; 1];
    fill(raw, &mut byte)?;
    Ok(byte[0])
}

fn take_binary(raw: &mut &[u8]) -> Result<Vec<u8>, BlockError> {
    let len = varint::decode(raw)?;
    Ok(read_exact_vec(raw, len)?)
}

fn take_string(raw: &mut &[u8]) -> Result<String, BlockError> {
    Ok(String::from_utf8(take_binary(raw)?)?)
}

/// Fixed header preceding every block: `(1, is_overflows: u8)`, `(2, bucket_num: i32)`,
/// then a 0 terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub is_overflows: bool,
    pub bucket_num: i32,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self {
            is_overflows: false,
            bucket_num: -1,
        }
    }
}

impl BlockInfo {
    pub fn write<T: Read + Write>(
        &self,
        transport: &mut ProtocolTransport<T>,
    ) -> Result<(), TransportError> {
        transport.write_varint(1);
        transport.write_u8(self.is_overflows as u8)?;
        transport.write_varint(2);
        transport.write_i32(self.bucket_num)?;
        transport.write_varint(0);
        Ok(())
    }

    pub fn read<T: Read + Write>(
        transport: &mut ProtocolTransport<T>,
    ) -> Result<Self, ProtocolError> {
        let mut info = Self::default();
        loop {
            match transport.read_varint()? {
                0 => return Ok(info),
                1 => info.is_overflows = transport.read_u8()? != 0,
                2 => info.bucket_num = transport.read_i32()?,
                other => return Err(ProtocolError::MalformedBlockInfo(other)),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultBlock {
    pub info: BlockInfo,
    pub rows: usize,
    pub columns: Vec<Column>,
}

impl ResultBlock {
    /// A block with no columns and no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a block, checking every column has the same number of rows.
    pub fn new(columns: Vec<Column>) -> Result<Self, BlockError> {
        let rows = columns.first().map(Column::rows).unwrap_or(0);
        if let Some(column) = columns.iter().find(|c| c.rows() != rows) {
            return Err(BlockError::RowMismatch {
                column: column.name.clone(),
                expected: rows,
                actual: column.rows(),
            });
        }
        Ok(Self {
            info: BlockInfo::default(),
            rows,
            columns,
        })
    }

    /// Parse the engine's raw result layout. No bytes at all is an empty block.
    pub fn from_raw(raw: &[u8]) -> Result<Self, BlockError> {
        if raw.is_empty() {
            return Ok(Self::empty());
        }

        let mut cursor = raw;
        let column_count = take_u8(&mut cursor)?;
        let rows = take_u8(&mut cursor)? as usize;

        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let name = take_string(&mut cursor)?;
            let tag = take_string(&mut cursor)?;
            let ty = ColumnType::parse(&tag).ok_or(BlockError::UnknownType(tag))?;
            let data = match ty.width() {
                None => ColumnData::Strings(
                    (0..rows)
                        .map(|_| take_binary(&mut cursor))
                        .collect::<Result<_, _>>()?,
                ),
                Some(width) => ColumnData::Fixed(read_exact_vec(&mut cursor, (width * rows) as u64)?),
            };
            columns.push(Column { name, ty, data });
        }

        if !cursor.is_empty() {
            return Err(BlockError::TrailingBytes(cursor.len()));
        }

        Ok(Self {
            info: BlockInfo::default(),
            rows,
            columns,
        })
    }

    pub fn write<T: Read + Write>(
        &self,
        transport: &mut ProtocolTransport<T>,
        revision: Revision,
    ) -> Result<(), TransportError> {
        self.info.write(transport)?;
        transport.write_varint(self.columns.len() as u64);
        transport.write_varint(self.rows as u64);

        for column in &self.columns {
            transport.write_string(&column.name);
            transport.write_string(column.ty.name());
            // Peers below this revision read the values right after the type name.
            if revision.supports(Feature::CustomSerialization) {
                transport.write_u8(0)?;
            }
            match &column.data {
                ColumnData::Strings(values) => {
                    for value in values {
                        transport.write_binary(value);
                    }
                }
                ColumnData::Fixed(bytes) => transport.write_raw(bytes),
            }
        }
        Ok(())
    }

    pub fn read<T: Read + Write>(
        transport: &mut ProtocolTransport<T>,
        revision: Revision,
    ) -> Result<Self, ProtocolError> {
        let info = BlockInfo::read(transport)?;
        let column_count = transport.read_varint()?;
        let rows = transport.read_varint()?;

        let mut columns = Vec::new();
        for _ in 0..column_count {
            let name = transport.read_string()?;
            let tag = transport.read_string()?;
            let ty = ColumnType::parse(&tag)
                .ok_or_else(|| ProtocolError::UnknownColumnType(tag.clone()))?;
            if revision.supports(Feature::CustomSerialization) && transport.read_u8()? != 0 {
                return Err(ProtocolError::UnknownColumnType(format!(
                    "{tag} with custom serialization"
                )));
            }
            let data = match ty.width() {
                None => {
                    let mut values = Vec::new();
                    for _ in 0..rows {
                        values.push(transport.read_binary()?);
                    }
                    ColumnData::Strings(values)
                }
                Some(width) => {
                    ColumnData::Fixed(transport.read_raw((width as u64).saturating_mul(rows))?)
                }
            };
            columns.push(Column { name, ty, data });
        }

        Ok(Self {
            info,
            rows: rows as usize,
            columns,
        })
    }
}
