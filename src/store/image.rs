//! Flash record image for the config store
//!
//! Layout: `[magic "TLKV"][version u8][count u16 LE][entries][crc16 u16 LE]`.
//! Each entry is `[namespace u8][key_len u8][key][tag u8][value]`; strings are
//! `[len u8][bytes]`, numbers are little-endian. The CRC covers everything
//! before it.

use crate::store::backend::{EntryTable, Namespace, StoreError, Value};
use crc::{Crc, CRC_16_XMODEM};

const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

pub const MAGIC: [u8; 4] = *b"TLKV";
pub const IMAGE_VERSION: u8 = 1;

/// Magic + version + count
const HEADER_LEN: usize = 7;

mod tag {
    pub const U8: u8 = 0;
    pub const U16: u8 = 1;
    pub const U32: u8 = 2;
    pub const F32: u8 = 3;
    pub const BOOL: u8 = 4;
    pub const STR: u8 = 5;
}

/// Why an image was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    /// Erased flash or foreign data
    BadMagic,
    UnsupportedVersion,
    Truncated,
    CrcMismatch,
    BadEntry,
}

fn calculate_crc(data: &[u8]) -> u16 {
    CRC.checksum(data)
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn put(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        let end = self.pos + bytes.len();
        self.buf
            .get_mut(self.pos..end)
            .ok_or(StoreError::Full)?
            .copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }
}

/// Serialise `table` into `buf`; returns the image length
pub fn encode(table: &EntryTable, buf: &mut [u8]) -> Result<usize, StoreError> {
    let mut w = Writer { buf, pos: 0 };
    w.put(&MAGIC)?;
    w.put(&[IMAGE_VERSION])?;
    w.put(&(table.len() as u16).to_le_bytes())?;

    for entry in table.iter() {
        w.put(&[entry.namespace.id(), entry.key.len() as u8])?;
        w.put(entry.key.as_bytes())?;
        match &entry.value {
            Value::U8(v) => w.put(&[tag::U8, *v])?,
            Value::U16(v) => {
                w.put(&[tag::U16])?;
                w.put(&v.to_le_bytes())?;
            }
            Value::U32(v) => {
                w.put(&[tag::U32])?;
                w.put(&v.to_le_bytes())?;
            }
            Value::F32(v) => {
                w.put(&[tag::F32])?;
                w.put(&v.to_le_bytes())?;
            }
            Value::Bool(v) => w.put(&[tag::BOOL, *v as u8])?,
            Value::Str(s) => {
                w.put(&[tag::STR, s.len() as u8])?;
                w.put(s.as_bytes())?;
            }
        }
    }

    let crc = calculate_crc(&w.buf[..w.pos]);
    w.put(&crc.to_le_bytes())?;
    Ok(w.pos)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], ImageError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or(ImageError::Truncated)?;
        self.pos += len;
        Ok(bytes)
    }

    fn byte(&mut self) -> Result<u8, ImageError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ImageError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

/// Parse an image read back from flash
///
/// Trailing bytes after the CRC (erased flash) are ignored.
pub fn decode(data: &[u8]) -> Result<EntryTable, ImageError> {
    if data.len() < HEADER_LEN + 2 {
        return Err(ImageError::Truncated);
    }
    if data[..4] != MAGIC {
        return Err(ImageError::BadMagic);
    }
    if data[4] != IMAGE_VERSION {
        return Err(ImageError::UnsupportedVersion);
    }
    let count = u16::from_le_bytes([data[5], data[6]]) as usize;

    let mut r = Reader {
        data,
        pos: HEADER_LEN,
    };
    let mut table = EntryTable::new();

    for _ in 0..count {
        let namespace = Namespace::from_id(r.byte()?).ok_or(ImageError::BadEntry)?;
        let key_len = r.byte()? as usize;
        let key = core::str::from_utf8(r.take(key_len)?).map_err(|_| ImageError::BadEntry)?;
        let value = match r.byte()? {
            tag::U8 => Value::U8(r.byte()?),
            tag::U16 => Value::U16(u16::from_le_bytes(r.array()?)),
            tag::U32 => Value::U32(u32::from_le_bytes(r.array()?)),
            tag::F32 => Value::F32(f32::from_le_bytes(r.array()?)),
            tag::BOOL => Value::Bool(r.byte()? != 0),
            tag::STR => {
                let len = r.byte()? as usize;
                let text = core::str::from_utf8(r.take(len)?).map_err(|_| ImageError::BadEntry)?;
                Value::str(text).ok_or(ImageError::BadEntry)?
            }
            _ => return Err(ImageError::BadEntry),
        };
        table
            .put(namespace, key, value)
            .map_err(|_| ImageError::BadEntry)?;
    }

    let body_len = r.pos;
    let received_crc = u16::from_le_bytes(r.array()?);
    if calculate_crc(&data[..body_len]) != received_crc {
        return Err(ImageError::CrcMismatch);
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> EntryTable {
        let mut table = EntryTable::new();
        table.put(Namespace::System, "camera_id", Value::U8(5)).unwrap();
        table.put(Namespace::System, "udp_port", Value::U16(8888)).unwrap();
        table
            .put(Namespace::Lora, "frequency", Value::U32(869.5f32.to_bits()))
            .unwrap();
        table.put(Namespace::Eth, "dhcp_enabled", Value::Bool(false)).unwrap();
        table.put(Namespace::Wifi, "ap_ssid", Value::str("STUDIO").unwrap()).unwrap();
        table
    }

    #[test]
    fn test_encode_decode() {
        let table = sample_table();
        let mut buf = [0xFFu8; 256];
        let len = encode(&table, &mut buf).unwrap();

        assert_eq!(&buf[..4], b"TLKV");
        assert_eq!(buf[4], IMAGE_VERSION);
        assert_eq!(u16::from_le_bytes([buf[5], buf[6]]), 5);

        // Erased flash after the image is ignored
        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded.len(), 5);
        assert_eq!(decoded.get(Namespace::System, "camera_id"), Some(&Value::U8(5)));
        assert_eq!(
            decoded.get(Namespace::Wifi, "ap_ssid"),
            Some(&Value::str("STUDIO").unwrap())
        );
        assert!(len < buf.len());
    }

    #[test]
    fn test_known_layout() {
        let mut table = EntryTable::new();
        table.put(Namespace::Lora, "sync_word", Value::U8(0x34)).unwrap();
        let mut buf = [0u8; 32];
        let len = encode(&table, &mut buf).unwrap();

        let mut expected = [0u8; 22];
        expected[..7].copy_from_slice(&[b'T', b'L', b'K', b'V', 1, 1, 0]);
        expected[7..9].copy_from_slice(&[4, 9]);
        expected[9..18].copy_from_slice(b"sync_word");
        expected[18..20].copy_from_slice(&[0, 0x34]);
        let crc = CRC.checksum(&expected[..20]);
        expected[20..].copy_from_slice(&crc.to_le_bytes());

        assert_eq!(&buf[..len], &expected);
    }

    #[test]
    fn test_erased_flash_is_bad_magic() {
        let buf = [0xFFu8; 64];
        assert_eq!(decode(&buf).err(), Some(ImageError::BadMagic));
    }

    #[test]
    fn test_crc_mismatch() {
        let mut buf = [0u8; 256];
        let len = encode(&sample_table(), &mut buf).unwrap();
        buf[10] ^= 0x01;
        assert_eq!(decode(&buf[..len]).err(), Some(ImageError::CrcMismatch));
    }

    #[test]
    fn test_truncated_image() {
        let mut buf = [0u8; 256];
        let len = encode(&sample_table(), &mut buf).unwrap();
        assert_eq!(decode(&buf[..len - 3]).err(), Some(ImageError::Truncated));
        assert_eq!(decode(&buf[..5]).err(), Some(ImageError::Truncated));
    }

    #[test]
    fn test_wrong_version() {
        let mut buf = [0u8; 64];
        encode(&EntryTable::new(), &mut buf).unwrap();
        buf[4] = 9;
        assert_eq!(decode(&buf).err(), Some(ImageError::UnsupportedVersion));
    }

    #[test]
    fn test_buffer_too_small() {
        let mut buf = [0u8; 12];
        assert_eq!(encode(&sample_table(), &mut buf), Err(StoreError::Full));
    }
}
