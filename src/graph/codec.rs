//! Length-prefixed binary wire format
//!
//! Every record on the wire is a fixed sequence of fields: fixed-width
//! integers are big-endian, variable-length byte strings carry a `u32`
//! length prefix. Decoding never reads past the input and rejects trailing
//! bytes, so a truncated or padded record is malformed before anything is
//! hashed or verified.

use bytes::{Buf, BufMut};

use super::GraphError;

/// A record with a canonical byte encoding.
pub trait WireEncode {
    fn encode(&self, out: &mut Vec<u8>);

    fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// A record that can be read back from its canonical encoding.
pub trait WireDecode: Sized {
    fn decode(input: &mut &[u8]) -> Result<Self, GraphError>;

    /// Decode a complete record, rejecting trailing bytes.
    fn from_wire(bytes: &[u8]) -> Result<Self, GraphError> {
        let mut input = bytes;
        let value = Self::decode(&mut input)?;
        if input.has_remaining() {
            return Err(GraphError::Malformed(format!(
                "{} trailing bytes",
                input.remaining()
            )));
        }
        Ok(value)
    }
}

fn ensure(input: &&[u8], needed: usize, what: &str) -> Result<(), GraphError> {
    if input.remaining() < needed {
        return Err(GraphError::Malformed(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            needed,
            input.remaining()
        )));
    }
    Ok(())
}

pub fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.put_u32(bytes.len() as u32);
    out.put_slice(bytes);
}

pub fn get_bytes(input: &mut &[u8], what: &str) -> Result<Vec<u8>, GraphError> {
    let len = get_u32(input, what)? as usize;
    ensure(input, len, what)?;
    let mut bytes = vec![0u8; len];
    input.copy_to_slice(&mut bytes);
    Ok(bytes)
}

pub fn get_array<const N: usize>(input: &mut &[u8], what: &str) -> Result<[u8; N], GraphError> {
    ensure(input, N, what)?;
    let mut bytes = [0u8; N];
    input.copy_to_slice(&mut bytes);
    Ok(bytes)
}

pub fn get_u32(input: &mut &[u8], what: &str) -> Result<u32, GraphError> {
    ensure(input, 4, what)?;
    Ok(input.get_u32())
}

pub fn get_u64(input: &mut &[u8], what: &str) -> Result<u64, GraphError> {
    ensure(input, 8, what)?;
    Ok(input.get_u64())
}

pub fn get_i64(input: &mut &[u8], what: &str) -> Result<i64, GraphError> {
    ensure(input, 8, what)?;
    Ok(input.get_i64())
}

pub fn put_string(out: &mut Vec<u8>, value: &str) {
    put_bytes(out, value.as_bytes());
}

pub fn get_string(input: &mut &[u8], what: &str) -> Result<String, GraphError> {
    let bytes = get_bytes(input, what)?;
    String::from_utf8(bytes).map_err(|e| GraphError::Malformed(format!("{}: {}", what, e)))
}
