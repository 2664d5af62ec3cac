//! Bounded payload readers
//!
//! [`PayloadReader`] walks a little-endian binary payload front to back and
//! [`BitReader`] walks an MSB-first bit stream. Both refuse to read past the
//! end and report [`DecodeError::Truncated`] instead.

use bytes::Buf;

use super::DecodeError;

/// Little-endian cursor over a message payload
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    consumed: usize,
}

macro_rules! read_le {
    ($name:ident, $ty:ty, $get:ident) => {
        #[doc = concat!("Read a little-endian `", stringify!($ty), "`")]
        pub fn $name(&mut self) -> Result<$ty, DecodeError> {
            self.ensure(std::mem::size_of::<$ty>())?;
            self.consumed += std::mem::size_of::<$ty>();
            Ok(self.buf.$get())
        }
    };
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, consumed: 0 }
    }

    /// Bytes read so far
    pub fn position(&self) -> usize {
        self.consumed
    }

    /// Bytes still available
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::Truncated {
                offset: self.consumed,
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    read_le!(read_u8, u8, get_u8);
    read_le!(read_i8, i8, get_i8);
    read_le!(read_u16, u16, get_u16_le);
    read_le!(read_i16, i16, get_i16_le);
    read_le!(read_u32, u32, get_u32_le);
    read_le!(read_i32, i32, get_i32_le);
    read_le!(read_f32, f32, get_f32_le);
    read_le!(read_f64, f64, get_f64_le);

    /// Skip reserved bytes
    pub fn skip(&mut self, count: usize) -> Result<(), DecodeError> {
        self.ensure(count)?;
        self.buf.advance(count);
        self.consumed += count;
        Ok(())
    }

    /// Read a fixed number of raw bytes
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        self.consumed += N;
        Ok(out)
    }

    /// Read a fixed-width, NUL padded ASCII field
    pub fn read_fixed_str(&mut self, width: usize) -> Result<String, DecodeError> {
        self.ensure(width)?;
        let raw = &self.buf[..width];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
        let text = String::from_utf8_lossy(&raw[..end]).into_owned();
        self.buf.advance(width);
        self.consumed += width;
        Ok(text)
    }
}

/// MSB-first bit cursor, as used by RTCM 3 message bodies
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    pub fn bits_remaining(&self) -> usize {
        self.data.len() * 8 - self.bit_pos
    }

    /// Read up to 64 bits as an unsigned value
    pub fn read_bits(&mut self, count: usize) -> Result<u64, DecodeError> {
        debug_assert!(count <= 64);
        if self.bits_remaining() < count {
            return Err(DecodeError::Truncated {
                offset: self.bit_pos / 8,
                needed: count.div_ceil(8),
                available: self.bits_remaining() / 8,
            });
        }

        let mut value: u64 = 0;
        for _ in 0..count {
            let byte = self.data[self.bit_pos / 8];
            let bit = (byte >> (7 - (self.bit_pos % 8))) & 1;
            value = (value << 1) | bit as u64;
            self.bit_pos += 1;
        }
        Ok(value)
    }

    /// Read a two's complement signed field
    pub fn read_signed(&mut self, count: usize) -> Result<i64, DecodeError> {
        let raw = self.read_bits(count)?;
        if count == 0 || count == 64 {
            return Ok(raw as i64);
        }
        let shift = 64 - count;
        Ok(((raw << shift) as i64) >> shift)
    }

    pub fn read_flag(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_bits(1)? == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_little_endian() {
        let data = [0x01, 0x34, 0x12, 0xFE, 0xFF, 0xFF, 0xFF];
        let mut reader = PayloadReader::new(&data);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_i32().unwrap(), -2);
        assert_eq!(reader.remaining(), 0);
        assert_eq!(reader.position(), 7);
    }

    #[test]
    fn test_read_past_end_fails() {
        let data = [0x01, 0x02];
        let mut reader = PayloadReader::new(&data);
        assert!(matches!(
            reader.read_u32(),
            Err(DecodeError::Truncated { offset: 0, needed: 4, available: 2 })
        ));
        // A failed read consumes nothing
        assert_eq!(reader.read_u16().unwrap(), 0x0201);
    }

    #[test]
    fn test_fixed_str() {
        let mut data = b"ROM CORE 3.01".to_vec();
        data.resize(30, 0);
        let mut reader = PayloadReader::new(&data);
        assert_eq!(reader.read_fixed_str(30).unwrap(), "ROM CORE 3.01");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_bit_reader() {
        // 0x3ED -> 1005 in the top 12 bits
        let data = [0x3E, 0xD0, 0xFF];
        let mut bits = BitReader::new(&data);
        assert_eq!(bits.read_bits(12).unwrap(), 1005);
        assert_eq!(bits.read_bits(4).unwrap(), 0);
        assert_eq!(bits.read_signed(8).unwrap(), -1);
        assert!(bits.read_flag().is_err());
    }
}
