//! Byte-level reading primitives the header grammar is built from.
//!
//! A blanket trait over any `Read` provides fixed-width reads. Every read
//! here is big-endian: the wire format fixes byte order, there is no
//! negotiation.

use std::io::Read;

use anyhow::Result;

use crate::header::SizeClass;

pub trait ConspackRead: Read {
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_be_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn read_be_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_be_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    fn read_be_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    fn read_be_i16(&mut self) -> Result<i16> {
        Ok(self.read_be_u16()? as i16)
    }

    fn read_be_i32(&mut self) -> Result<i32> {
        Ok(self.read_be_u32()? as i32)
    }

    fn read_be_i64(&mut self) -> Result<i64> {
        Ok(self.read_be_u64()? as i64)
    }

    fn read_be_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_be_u32()?))
    }

    fn read_be_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_be_u64()?))
    }

    /// Reads exactly 16 big-endian bytes, the wire form for both `Int128`
    /// and `Uint128` — both always take the full two's-complement span.
    fn read_be_u128_bytes(&mut self) -> Result<u128> {
        let mut buf = [0u8; 16];
        self.read_exact(&mut buf)?;
        Ok(u128::from_be_bytes(buf))
    }

    /// Reads a length/size value per the header's size-class sub-field.
    fn read_size_class(&mut self, class: SizeClass) -> Result<u64> {
        Ok(match class {
            SizeClass::Size8 => self.read_u8()?.into(),
            SizeClass::Size16 => self.read_be_u16()?.into(),
            SizeClass::Size32 => self.read_be_u32()?.into(),
            SizeClass::Size64 => self.read_be_u64()?,
        })
    }

    fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl<R: Read> ConspackRead for R {}
