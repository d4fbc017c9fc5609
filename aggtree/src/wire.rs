//! Wire format serialization and deserialization.
//!
//! A subset of the NDN TLV packet format. Every element is
//! `TLV-TYPE (var) || TLV-LENGTH (var) || value`.
//!
//! ## VAR-NUMBER
//!
//! ```text
//! 0..=252          1 byte
//! 253 || u16 BE    3 bytes
//! 254 || u32 BE    5 bytes
//! 255 || u64 BE    9 bytes
//! ```
//!
//! The decoder rejects any value written wider than necessary.
//!
//! ## Request (Interest)
//!
//! ```text
//! 0x05 { Name 0x07 { Component* }, [InterestLifetime 0x0C (nonneg int, ms)] }
//! ```
//!
//! ## Response (Data)
//!
//! ```text
//! 0x06 { Name 0x07 { Component* }, Content 0x15 (u64 BE) }
//! ```
//!
//! Unknown elements inside a packet (MetaInfo, signatures, nonces) are skipped.

use alloc::vec::Vec;
use core::fmt;

use crate::name::{parse_decimal, Component, Name};
use crate::time::Duration;
use crate::types::{
    Request, Response, DEFAULT_REQUEST_LIFETIME, MAX_PACKET_SIZE, TLV_CONTENT, TLV_DATA,
    TLV_INTEREST, TLV_INTEREST_LIFETIME, TLV_NAME,
};

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of buffer.
    UnexpectedEof,
    /// VAR-NUMBER written wider than necessary.
    NonCanonicalVarNumber,
    /// Invalid length value or trailing bytes.
    InvalidLength,
    /// Unexpected TLV type where a specific element was required.
    InvalidType,
    /// Element present but its value is unusable.
    InvalidValue,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "unexpected end of buffer"),
            DecodeError::NonCanonicalVarNumber => write!(f, "non-canonical var-number"),
            DecodeError::InvalidLength => write!(f, "invalid length"),
            DecodeError::InvalidType => write!(f, "unexpected tlv type"),
            DecodeError::InvalidValue => write!(f, "invalid element value"),
        }
    }
}

/// Zero-copy reader over a byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a new reader over a byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the number of bytes remaining.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Returns true if there are no more bytes to read.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the current position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        if self.pos >= self.buf.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a VAR-NUMBER, rejecting non-minimal encodings.
    pub fn read_var_number(&mut self) -> Result<u64, DecodeError> {
        let start_pos = self.pos;
        let first = self.read_u8()?;
        let (value, min) = match first {
            0..=252 => return Ok(first as u64),
            253 => (be_uint(self.read_bytes(2)?), 253),
            254 => (be_uint(self.read_bytes(4)?), 0x1_0000),
            255 => (be_uint(self.read_bytes(8)?), 0x1_0000_0000),
        };
        if value < min {
            self.pos = start_pos; // Reset position for error recovery
            return Err(DecodeError::NonCanonicalVarNumber);
        }
        Ok(value)
    }

    /// Read a TLV header, returning (type, length).
    pub fn read_tlv_header(&mut self) -> Result<(u64, usize), DecodeError> {
        let typ = self.read_var_number()?;
        let len = self.read_var_number()?;
        let len = usize::try_from(len).map_err(|_| DecodeError::InvalidLength)?;
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok((typ, len))
    }

    /// Read a whole element of the expected type and return its value.
    pub fn read_tlv(&mut self, expected: u64) -> Result<&'a [u8], DecodeError> {
        let (typ, len) = self.read_tlv_header()?;
        if typ != expected {
            return Err(DecodeError::InvalidType);
        }
        self.read_bytes(len)
    }
}

fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// NonNegativeInteger: 1, 2, 4 or 8 bytes big-endian.
fn read_nonneg(bytes: &[u8]) -> Result<u64, DecodeError> {
    match bytes.len() {
        1 | 2 | 4 | 8 => Ok(be_uint(bytes)),
        _ => Err(DecodeError::InvalidLength),
    }
}

/// Writer for encoding packets.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Create a new empty writer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Returns the current length of written data.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if no data has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Write a slice of bytes.
    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Write a VAR-NUMBER in its shortest form.
    pub fn write_var_number(&mut self, v: u64) {
        if v <= 252 {
            self.write_u8(v as u8);
        } else if v <= u16::MAX as u64 {
            self.write_u8(253);
            self.write_bytes(&(v as u16).to_be_bytes());
        } else if v <= u32::MAX as u64 {
            self.write_u8(254);
            self.write_bytes(&(v as u32).to_be_bytes());
        } else {
            self.write_u8(255);
            self.write_bytes(&v.to_be_bytes());
        }
    }

    /// Write a complete TLV element.
    pub fn write_tlv(&mut self, typ: u64, value: &[u8]) {
        self.write_var_number(typ);
        self.write_var_number(value.len() as u64);
        self.write_bytes(value);
    }

    /// Write a NonNegativeInteger element in its shortest width.
    pub fn write_nonneg_tlv(&mut self, typ: u64, v: u64) {
        if v <= u8::MAX as u64 {
            self.write_tlv(typ, &[v as u8]);
        } else if v <= u16::MAX as u64 {
            self.write_tlv(typ, &(v as u16).to_be_bytes());
        } else if v <= u32::MAX as u64 {
            self.write_tlv(typ, &(v as u32).to_be_bytes());
        } else {
            self.write_tlv(typ, &v.to_be_bytes());
        }
    }

    /// Finish writing and return the buffer.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    /// Get the buffer as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

/// Trait for types that can be encoded to wire format.
pub trait Encode {
    /// Encode this value to the writer.
    fn encode(&self, w: &mut Writer);

    /// Encode and return the bytes.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.finish()
    }
}

/// Trait for types that can be decoded from wire format.
pub trait Decode: Sized {
    /// Decode a value from the reader.
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decode from a byte slice (strict: rejects trailing bytes).
    fn decode_from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(DecodeError::InvalidLength);
        }
        let mut r = Reader::new(data);
        let result = Self::decode(&mut r)?;
        if !r.is_empty() {
            return Err(DecodeError::InvalidLength);
        }
        Ok(result)
    }
}

/// Top-level packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    Request(Request),
    Response(Response),
}

impl Packet {
    pub fn name(&self) -> &Name {
        match self {
            Packet::Request(r) => &r.name,
            Packet::Response(r) => &r.name,
        }
    }
}

impl Encode for Name {
    fn encode(&self, w: &mut Writer) {
        let mut inner = Writer::new();
        for component in self.components() {
            inner.write_tlv(component.typ() as u64, component.value());
        }
        w.write_tlv(TLV_NAME, inner.as_slice());
    }
}

impl Decode for Name {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let mut inner = Reader::new(r.read_tlv(TLV_NAME)?);
        let mut components = Vec::new();
        while !inner.is_empty() {
            let (typ, len) = inner.read_tlv_header()?;
            let typ = u32::try_from(typ).map_err(|_| DecodeError::InvalidType)?;
            components.push(Component::new(typ, inner.read_bytes(len)?.to_vec()));
        }
        Ok(Name::from_components(components))
    }
}

impl Encode for Request {
    fn encode(&self, w: &mut Writer) {
        let mut inner = Writer::new();
        self.name.encode(&mut inner);
        inner.write_nonneg_tlv(TLV_INTEREST_LIFETIME, self.lifetime.as_millis());
        w.write_tlv(TLV_INTEREST, inner.as_slice());
    }
}

impl Decode for Request {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let mut inner = Reader::new(r.read_tlv(TLV_INTEREST)?);
        let name = Name::decode(&mut inner)?;
        let mut lifetime = DEFAULT_REQUEST_LIFETIME;
        while !inner.is_empty() {
            let (typ, len) = inner.read_tlv_header()?;
            let value = inner.read_bytes(len)?;
            if typ == TLV_INTEREST_LIFETIME {
                lifetime = Duration::from_millis(read_nonneg(value)?);
            }
        }
        Ok(Request { name, lifetime })
    }
}

impl Encode for Response {
    fn encode(&self, w: &mut Writer) {
        let mut inner = Writer::new();
        self.name.encode(&mut inner);
        inner.write_tlv(TLV_CONTENT, &self.value.to_be_bytes());
        w.write_tlv(TLV_DATA, inner.as_slice());
    }
}

impl Decode for Response {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let mut inner = Reader::new(r.read_tlv(TLV_DATA)?);
        let name = Name::decode(&mut inner)?;
        let mut value = None;
        while !inner.is_empty() {
            let (typ, len) = inner.read_tlv_header()?;
            let bytes = inner.read_bytes(len)?;
            if typ == TLV_CONTENT {
                value = Some(content_value(bytes)?);
            }
        }
        let value = value.ok_or(DecodeError::InvalidValue)?;
        Ok(Response { name, value })
    }
}

/// Content is an 8-byte big-endian integer. Some producers send ASCII
/// decimal instead, which is accepted.
fn content_value(bytes: &[u8]) -> Result<u64, DecodeError> {
    if bytes.len() == 8 {
        return Ok(be_uint(bytes));
    }
    parse_decimal(bytes).ok_or(DecodeError::InvalidValue)
}

impl Encode for Packet {
    fn encode(&self, w: &mut Writer) {
        match self {
            Packet::Request(r) => r.encode(w),
            Packet::Response(r) => r.encode(w),
        }
    }
}

impl Decode for Packet {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        // Peek the outer type without consuming it
        let start = r.position();
        let typ = {
            let mut peek = Reader::new(&r.buf[start..]);
            peek.read_var_number()?
        };
        match typ {
            TLV_INTEREST => Ok(Packet::Request(Request::decode(r)?)),
            TLV_DATA => Ok(Packet::Response(Response::decode(r)?)),
            _ => Err(DecodeError::InvalidType),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::name::IdSet;

    fn ids(list: &[u64]) -> IdSet {
        list.iter().copied().collect()
    }

    #[test]
    fn test_var_number_widths() {
        let cases: [(u64, usize); 5] = [(0, 1), (252, 1), (253, 3), (65_536, 5), (1 << 32, 9)];
        for (val, width) in cases {
            let mut w = Writer::new();
            w.write_var_number(val);
            let encoded = w.finish();
            assert_eq!(encoded.len(), width, "width for {}", val);

            let mut r = Reader::new(&encoded);
            assert_eq!(r.read_var_number(), Ok(val));
            assert!(r.is_empty());
        }
    }

    #[test]
    fn test_var_number_rejects_non_canonical() {
        // 5 written in the 3-byte form
        let mut r = Reader::new(&[253, 0x00, 0x05]);
        assert_eq!(r.read_var_number(), Err(DecodeError::NonCanonicalVarNumber));
        assert_eq!(r.position(), 0);

        // 0x1234 written in the 5-byte form
        let mut r = Reader::new(&[254, 0x00, 0x00, 0x12, 0x34]);
        assert_eq!(r.read_var_number(), Err(DecodeError::NonCanonicalVarNumber));
    }

    #[test]
    fn test_request_exact_bytes() {
        let request = Request::new(Name::identifier(1));
        let encoded = request.encode_to_vec();

        let mut expected = vec![0x05, 0x14, 0x07, 0x0E, 0x08, 0x09];
        expected.extend_from_slice(b"aggregate");
        expected.extend_from_slice(&[0x08, 0x01, 0x01]);
        expected.extend_from_slice(&[0x0C, 0x02, 0x07, 0xD0]);
        assert_eq!(encoded, expected);

        let decoded = Packet::decode_from_slice(&encoded).unwrap();
        assert_eq!(decoded, Packet::Request(request));
    }

    #[test]
    fn test_response_carries_name_and_value() {
        let name = Name::aggregate(&ids(&[1, 2, 3]), Some(4));
        let response = Response::new(name.clone(), 60);
        let decoded = Packet::decode_from_slice(&response.encode_to_vec()).unwrap();
        match decoded {
            Packet::Response(r) => {
                assert_eq!(r.name, name);
                assert_eq!(r.name.parse_ids(), ids(&[1, 2, 3]));
                assert_eq!(r.value, 60);
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_lifetime_uses_default() {
        let mut inner = Writer::new();
        Name::identifier(7).encode(&mut inner);
        let mut w = Writer::new();
        w.write_tlv(TLV_INTEREST, inner.as_slice());

        let request = Request::decode_from_slice(&w.finish()).unwrap();
        assert_eq!(request.lifetime, DEFAULT_REQUEST_LIFETIME);
    }

    #[test]
    fn test_unknown_elements_skipped() {
        let mut inner = Writer::new();
        Name::identifier(7).encode(&mut inner);
        inner.write_tlv(0x14, &[0x18, 0x01, 0x00]); // MetaInfo
        inner.write_tlv(TLV_CONTENT, &42u64.to_be_bytes());
        inner.write_tlv(0x16, &[0x1B, 0x01, 0x00]); // SignatureInfo
        inner.write_tlv(0x17, &[0u8; 32]); // SignatureValue
        let mut w = Writer::new();
        w.write_tlv(TLV_DATA, inner.as_slice());

        let response = Response::decode_from_slice(&w.finish()).unwrap();
        assert_eq!(response.value, 42);
    }

    #[test]
    fn test_ascii_content_fallback() {
        let mut inner = Writer::new();
        Name::identifier(3).encode(&mut inner);
        inner.write_tlv(TLV_CONTENT, b"30");
        let mut w = Writer::new();
        w.write_tlv(TLV_DATA, inner.as_slice());
        assert_eq!(Response::decode_from_slice(&w.finish()).unwrap().value, 30);
    }

    #[test]
    fn test_bad_content_rejected() {
        let mut inner = Writer::new();
        Name::identifier(3).encode(&mut inner);
        inner.write_tlv(TLV_CONTENT, &[0xFF, 0x00, 0x01]);
        let mut w = Writer::new();
        w.write_tlv(TLV_DATA, inner.as_slice());
        assert_eq!(
            Response::decode_from_slice(&w.finish()),
            Err(DecodeError::InvalidValue)
        );
    }

    #[test]
    fn test_missing_content_rejected() {
        let mut inner = Writer::new();
        Name::identifier(3).encode(&mut inner);
        let mut w = Writer::new();
        w.write_tlv(TLV_DATA, inner.as_slice());
        assert_eq!(
            Response::decode_from_slice(&w.finish()),
            Err(DecodeError::InvalidValue)
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut encoded = Request::new(Name::identifier(1)).encode_to_vec();
        encoded.push(0x00);
        assert_eq!(
            Packet::decode_from_slice(&encoded),
            Err(DecodeError::InvalidLength)
        );
    }

    #[test]
    fn test_truncated_packet() {
        let encoded = Response::new(Name::identifier(1), 5).encode_to_vec();
        assert_eq!(
            Packet::decode_from_slice(&encoded[..encoded.len() - 3]),
            Err(DecodeError::UnexpectedEof)
        );
    }

    #[test]
    fn test_unknown_packet_type() {
        assert_eq!(
            Packet::decode_from_slice(&[0x64, 0x00]),
            Err(DecodeError::InvalidType)
        );
        assert_eq!(Packet::decode_from_slice(&[]), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn test_bad_lifetime_width() {
        let mut inner = Writer::new();
        Name::identifier(1).encode(&mut inner);
        inner.write_tlv(TLV_INTEREST_LIFETIME, &[0x00, 0x01, 0x02]);
        let mut w = Writer::new();
        w.write_tlv(TLV_INTEREST, inner.as_slice());
        assert_eq!(
            Request::decode_from_slice(&w.finish()),
            Err(DecodeError::InvalidLength)
        );
    }
}
