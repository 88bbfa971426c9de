use std::{
    io::{self, BufReader, ErrorKind, Read, Write},
    string::FromUtf8Error,
};

use bincode::{
    Decode, Encode,
    config::{Configuration, Fixint, LittleEndian},
    decode_from_std_read, encode_into_std_write,
};
use log::trace;
use thiserror::Error;

use super::varint::{self, MAX_VARINT_BYTES};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("malformed varint: continuation past {MAX_VARINT_BYTES} bytes")]
    MalformedVarint,
    #[error("string is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),
    #[error("failed to encode fixed-width integer: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode fixed-width integer: {0}")]
    Decode(bincode::error::DecodeError),
    #[error("Transport IO Error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => TransportError::ConnectionClosed,
            _ => TransportError::Io(value),
        }
    }
}

impl From<bincode::error::DecodeError> for TransportError {
    fn from(value: bincode::error::DecodeError) -> Self {
        match value {
            bincode::error::DecodeError::UnexpectedEnd { .. } => TransportError::ConnectionClosed,
            bincode::error::DecodeError::Io { inner, .. } => inner.into(),
            other => TransportError::Decode(other),
        }
    }
}

/// Fill `buf` completely or report that the peer went away.
pub(crate) fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError> {
    reader.read_exact(buf)?;
    Ok(())
}

/// Read exactly `len` bytes without trusting `len` for the allocation up front.
pub(crate) fn read_exact_vec<R: Read>(reader: &mut R, len: u64) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::new();
    let read = reader.take(len).read_to_end(&mut buf)?;
    if (read as u64) < len {
        return Err(TransportError::ConnectionClosed);
    }
    Ok(buf)
}

/// Frame-level reader/writer for the native protocol.
///
/// Reads go straight to the (buffered) stream; writes accumulate in an outgoing buffer
/// that is pushed to the peer by [`ProtocolTransport::flush`], so a whole response leaves
/// in one piece.
pub struct ProtocolTransport<T: Read + Write> {
    stream: BufReader<T>,
    out: Vec<u8>,
    config: Configuration<LittleEndian, Fixint>,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        let config = bincode::config::standard()
            .with_little_endian()
            .with_fixed_int_encoding();
        Self {
            stream: BufReader::new(stream),
            out: Vec::new(),
            config,
        }
    }

    pub fn get_ref(&self) -> &T {
        self.stream.get_ref()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.stream.get_mut()
    }

    pub fn read_varint(&mut self) -> Result<u64, TransportError> {
        varint::decode(&mut self.stream)
    }

    pub fn read_u8(&mut self) -> Result<u8, TransportError> {
        self.read_fixed()
    }

    pub fn read_i32(&mut self) -> Result<i32, TransportError> {
        self.read_fixed()
    }

    pub fn read_u64(&mut self) -> Result<u64, TransportError> {
        self.read_fixed()
    }

    /// Exactly `len` raw bytes, no length prefix.
    pub fn read_raw(&mut self, len: u64) -> Result<Vec<u8>, TransportError> {
        read_exact_vec(&mut self.stream, len)
    }

    /// A varint length followed by that many bytes.
    pub fn read_binary(&mut self) -> Result<Vec<u8>, TransportError> {
        let len = self.read_varint()?;
        trace!("reading {len} byte frame");
        self.read_raw(len)
    }

    pub fn read_string(&mut self) -> Result<String, TransportError> {
        let bytes = self.read_binary()?;
        Ok(String::from_utf8(bytes)?)
    }

    pub fn write_varint(&mut self, value: u64) {
        varint::encode(value, &mut self.out);
    }

    pub fn write_signed_varint(&mut self, value: i64) {
        varint::encode_signed(value, &mut self.out);
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), TransportError> {
        self.write_fixed(value)
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), TransportError> {
        self.write_fixed(value)
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), TransportError> {
        self.write_fixed(value)
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    pub fn write_binary(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.write_raw(bytes);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_binary(value.as_bytes());
    }

    /// Bytes written but not yet flushed.
    pub fn pending(&self) -> &[u8] {
        &self.out
    }

    pub fn flush(&mut self) -> Result<(), TransportError> {
        if self.out.is_empty() {
            return Ok(());
        }
        trace!("flushing {} bytes", self.out.len());
        let stream = self.stream.get_mut();
        stream.write_all(&self.out)?;
        stream.flush()?;
        self.out.clear();
        Ok(())
    }

    fn read_fixed<V: Decode<()>>(&mut self) -> Result<V, TransportError> {
        Ok(decode_from_std_read(&mut self.stream, self.config)?)
    }

    fn write_fixed<V: Encode>(&mut self, value: V) -> Result<(), TransportError> {
        encode_into_std_write(value, &mut self.out, self.config)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! An in-memory peer: reads come from a fixed script, writes are collected.
    use std::io::Cursor;

    use super::*;

    pub(crate) struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Duplex {
        pub(crate) fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }

        pub(crate) fn written(&self) -> &[u8] {
            &self.output
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn reader(bytes: Vec<u8>) -> ProtocolTransport<Cursor<Vec<u8>>> {
        ProtocolTransport::new(Cursor::new(bytes))
    }

    #[test]
    fn strings_are_length_prefixed() {
        let mut transport = reader(Vec::new());
        transport.write_string("num");
        transport.write_string("");
        assert_eq!(transport.pending(), &[3, b'n', b'u', b'm', 0]);
    }

    #[test]
    fn read_write_strings() {
        let mut transport = reader(Vec::new());
        transport.write_string("");
        transport.write_string("héllo");
        transport.write_binary(&[0xff, 0x00]);
        let bytes = transport.pending().to_vec();

        let mut transport = reader(bytes);
        assert_eq!(transport.read_string().unwrap(), "");
        assert_eq!(transport.read_string().unwrap(), "héllo");
        assert_eq!(transport.read_binary().unwrap(), vec![0xff, 0x00]);
    }

    #[test]
    fn fixed_width_integers_are_little_endian() {
        let mut transport = reader(Vec::new());
        transport.write_u8(7).unwrap();
        transport.write_i32(-1).unwrap();
        transport.write_u64(0x0102).unwrap();
        assert_eq!(
            transport.pending(),
            &[7, 0xff, 0xff, 0xff, 0xff, 0x02, 0x01, 0, 0, 0, 0, 0, 0]
        );

        let bytes = transport.pending().to_vec();
        let mut transport = reader(bytes);
        assert_eq!(transport.read_u8().unwrap(), 7);
        assert_eq!(transport.read_i32().unwrap(), -1);
        assert_eq!(transport.read_u64().unwrap(), 0x0102);
    }

    #[test]
    fn short_string_is_connection_closed() {
        let mut transport = reader(vec![5, b'a', b'b']);
        assert!(matches!(
            transport.read_string(),
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[test]
    fn short_u64_is_connection_closed() {
        let mut transport = reader(vec![1, 2, 3]);
        assert!(matches!(
            transport.read_u64(),
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let mut transport = reader(vec![2, 0xc3, 0x28]);
        assert!(matches!(
            transport.read_string(),
            Err(TransportError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn flush_writes_and_clears() {
        let mut transport = reader(Vec::new());
        transport.write_varint(4);
        transport.flush().unwrap();
        assert!(transport.pending().is_empty());
        assert_eq!(transport.get_ref().get_ref(), &vec![4]);
    }
}
