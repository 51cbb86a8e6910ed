//! Bit-packed header grammar: one byte discriminates every encoded value,
//! with a handful of size/kind sub-fields packed into the low bits.
//!
//! Includes the reserved, never-dispatched `COMPLEX` and `RATIONAL`
//! numeric codes and the reserved `PROPERTIES` group, kept here so a
//! header carrying them still classifies instead of panicking.

use anyhow::Result;
use num_enum::TryFromPrimitive;

use crate::error::{conspack_err, ConspackErrorKind};
use crate::reader::ConspackRead;

pub const BOOL: u8 = 0x00;
pub const BOOL_MASK: u8 = 0xFE;

pub const NUMBER: u8 = 0x10;
pub const NUMBER_MASK: u8 = 0xF0;
pub const NUMBER_TYPE_MASK: u8 = 0x0F;

pub const CONTAINER: u8 = 0x20;
pub const CONTAINER_MASK: u8 = 0xE0;

pub const STRING: u8 = 0x40;
pub const STRING_MASK: u8 = 0xFC;

pub const REF: u8 = 0x60;
pub const REF_MASK: u8 = 0xFC;
pub const REF_INLINE_MASK: u8 = 0xF0;

pub const REMOTE_REF: u8 = 0x64;
pub const REMOTE_REF_MASK: u8 = 0xFF;

pub const POINTER: u8 = 0x68;
pub const POINTER_MASK: u8 = 0xFC;

pub const TAG: u8 = 0xE0;
pub const TAG_MASK: u8 = 0xFC;
pub const TAG_INLINE_MASK: u8 = 0xF0;

pub const CONS: u8 = 0x80;
pub const CONS_MASK: u8 = 0xFF;

pub const PACKAGE: u8 = 0x81;
pub const PACKAGE_MASK: u8 = 0xFF;

pub const SYMBOL: u8 = 0x82;
pub const SYMBOL_MASK: u8 = 0xFE;

pub const CHARACTER: u8 = 0x84;
pub const CHARACTER_MASK: u8 = 0xFC;

pub const PROPERTIES: u8 = 0x88;
pub const PROPERTIES_MASK: u8 = 0xFF;

pub const INDEX: u8 = 0xA0;
pub const INDEX_MASK: u8 = 0xE0;

pub const SIZE_MASK: u8 = 0x03;

pub const CONTAINER_VECTOR: u8 = 0x00;
pub const CONTAINER_LIST: u8 = 0x08;
pub const CONTAINER_MAP: u8 = 0x10;
pub const CONTAINER_TMAP: u8 = 0x18;
pub const CONTAINER_TYPE_MASK: u8 = 0x18;
pub const CONTAINER_FIXED: u8 = 0x04;

pub const REFTAG_INLINE: u8 = 0x10;
pub const REFTAG_INLINE_VALUE: u8 = 0x0F;
pub const SYMBOL_KEYWORD: u8 = 0x01;

pub const INT8: u8 = 0x0;
pub const INT16: u8 = 0x1;
pub const INT32: u8 = 0x2;
pub const INT64: u8 = 0x3;
pub const UINT8: u8 = 0x4;
pub const UINT16: u8 = 0x5;
pub const UINT32: u8 = 0x6;
pub const UINT64: u8 = 0x7;
pub const SINGLE_FLOAT: u8 = 0x8;
pub const DOUBLE_FLOAT: u8 = 0x9;
pub const INT128: u8 = 0xA;
pub const UINT128: u8 = 0xB;
pub const COMPLEX: u8 = 0xC;
pub const RATIONAL: u8 = 0xF;

pub fn is_bool(h: u8) -> bool {
    (h & BOOL_MASK) == BOOL
}

pub fn is_number(h: u8) -> bool {
    (h & NUMBER_MASK) == NUMBER
}

pub fn is_container(h: u8) -> bool {
    (h & CONTAINER_MASK) == CONTAINER
}

pub fn is_string(h: u8) -> bool {
    (h & STRING_MASK) == STRING
}

pub fn is_ref(h: u8) -> bool {
    (h & REF_MASK) == REF || (h & REF_INLINE_MASK) == (REF | REFTAG_INLINE)
}

pub fn is_rref(h: u8) -> bool {
    (h & REMOTE_REF_MASK) == REMOTE_REF
}

pub fn is_pointer(h: u8) -> bool {
    (h & POINTER_MASK) == POINTER
}

pub fn is_tag(h: u8) -> bool {
    (h & TAG_MASK) == TAG || (h & TAG_INLINE_MASK) == (TAG | REFTAG_INLINE)
}

pub fn is_cons(h: u8) -> bool {
    (h & CONS_MASK) == CONS
}

pub fn is_package(h: u8) -> bool {
    (h & PACKAGE_MASK) == PACKAGE
}

pub fn is_symbol(h: u8) -> bool {
    (h & SYMBOL_MASK) == SYMBOL
}

pub fn is_keyword(h: u8) -> bool {
    is_symbol(h) && (h & SYMBOL_KEYWORD) == SYMBOL_KEYWORD
}

pub fn is_character(h: u8) -> bool {
    (h & CHARACTER_MASK) == CHARACTER
}

pub fn is_properties(h: u8) -> bool {
    (h & PROPERTIES_MASK) == PROPERTIES
}

pub fn is_index(h: u8) -> bool {
    (h & INDEX_MASK) == INDEX
}

/// The grammar group a header byte classifies into. Groups are tested in a
/// fixed priority order (bool before number before index before container
/// before cons before string before character before rref before pointer
/// before package before symbol before tag before ref) since several
/// groups' bit patterns would otherwise overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderGroup {
    Bool,
    Number,
    Index,
    Container,
    Cons,
    String,
    Character,
    RemoteRef,
    Pointer,
    Package,
    Symbol,
    Tag,
    Ref,
}

pub fn classify(h: u8) -> Result<HeaderGroup> {
    if is_bool(h) {
        Ok(HeaderGroup::Bool)
    } else if is_number(h) {
        Ok(HeaderGroup::Number)
    } else if is_index(h) {
        Ok(HeaderGroup::Index)
    } else if is_container(h) {
        Ok(HeaderGroup::Container)
    } else if is_cons(h) {
        Ok(HeaderGroup::Cons)
    } else if is_string(h) {
        Ok(HeaderGroup::String)
    } else if is_character(h) {
        Ok(HeaderGroup::Character)
    } else if is_rref(h) {
        Ok(HeaderGroup::RemoteRef)
    } else if is_pointer(h) {
        Ok(HeaderGroup::Pointer)
    } else if is_package(h) {
        Ok(HeaderGroup::Package)
    } else if is_symbol(h) {
        Ok(HeaderGroup::Symbol)
    } else if is_tag(h) {
        Ok(HeaderGroup::Tag)
    } else if is_ref(h) {
        Ok(HeaderGroup::Ref)
    } else if is_properties(h) {
        Err(conspack_err!(
            ConspackErrorKind::BadHeader,
            "the properties header (0b{h:08b}) is reserved and unused"
        ))
    } else {
        Err(conspack_err!(
            ConspackErrorKind::BadHeader,
            "unrecognized header byte 0b{h:08b}"
        ))
    }
}

/// The 2-bit field selecting how many bytes a length/index/tag/pointer tail
/// occupies. Writers pick the smallest class that fits; readers honor
/// whatever the wire specifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Size8,
    Size16,
    Size32,
    Size64,
}

impl SizeClass {
    pub fn from_bits(bits: u8) -> Result<Self> {
        match bits & SIZE_MASK {
            0 => Ok(Self::Size8),
            1 => Ok(Self::Size16),
            2 => Ok(Self::Size32),
            3 => Ok(Self::Size64),
            _ => unreachable!("masked to 2 bits"),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Size8 => 0,
            Self::Size16 => 1,
            Self::Size32 => 2,
            Self::Size64 => 3,
        }
    }

    /// The smallest size class that can hold `n`. Lengths beyond `u64::MAX`
    /// are rejected at write time.
    pub fn from_len(n: u64) -> Self {
        if n < (1u64 << 8) {
            Self::Size8
        } else if n < (1u64 << 16) {
            Self::Size16
        } else if n < (1u64 << 32) {
            Self::Size32
        } else {
            Self::Size64
        }
    }

    pub fn byte_count(self) -> usize {
        match self {
            Self::Size8 => 1,
            Self::Size16 => 2,
            Self::Size32 => 4,
            Self::Size64 => 8,
        }
    }

    pub fn read_len(self, r: &mut impl ConspackRead) -> Result<u64> {
        r.read_size_class(self)
    }

    /// Big-endian bytes for `n`, exactly `byte_count()` long. Panics if `n`
    /// does not fit the class; callers must have chosen the class via
    /// [`SizeClass::from_len`] first.
    pub fn encode_len(self, n: u64) -> Vec<u8> {
        match self {
            Self::Size8 => vec![n as u8],
            Self::Size16 => (n as u16).to_be_bytes().to_vec(),
            Self::Size32 => (n as u32).to_be_bytes().to_vec(),
            Self::Size64 => n.to_be_bytes().to_vec(),
        }
    }
}

/// The four container kinds sharing the `CONTAINER` header group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ContainerKind {
    Vector = CONTAINER_VECTOR,
    List = CONTAINER_LIST,
    Map = CONTAINER_MAP,
    Tmap = CONTAINER_TMAP,
}

impl ContainerKind {
    pub fn from_header(h: u8) -> Result<Self> {
        Self::try_from(h & CONTAINER_TYPE_MASK).map_err(|_| {
            conspack_err!(
                ConspackErrorKind::BadHeader,
                "invalid container type bits in 0b{h:08b}"
            )
        })
    }
}

/// The widths an `Integer` value can be narrowed to; matches the order
/// `guess_int` tries them in (signed-then-unsigned per bit width).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
    W128,
}

/// The `NUMBER` group's 4-bit type code. `Complex`/`Rational` are defined
/// (so a header carrying them classifies cleanly) but never constructible
/// as a `Value` nor written by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum NumericType {
    Int8 = INT8,
    Int16 = INT16,
    Int32 = INT32,
    Int64 = INT64,
    Uint8 = UINT8,
    Uint16 = UINT16,
    Uint32 = UINT32,
    Uint64 = UINT64,
    SingleFloat = SINGLE_FLOAT,
    DoubleFloat = DOUBLE_FLOAT,
    Int128 = INT128,
    Uint128 = UINT128,
    Complex = COMPLEX,
    Rational = RATIONAL,
}

impl NumericType {
    pub fn from_header(h: u8) -> Result<Self> {
        let code = h & NUMBER_TYPE_MASK;
        Self::try_from(code)
            .map_err(|_| conspack_err!(ConspackErrorKind::BadHeader, "unknown numeric type {code:#x}"))
            .and_then(|t| match t {
                Self::Complex | Self::Rational => Err(conspack_err!(
                    ConspackErrorKind::BadHeader,
                    "numeric type {t:?} is reserved and not implemented"
                )),
                other => Ok(other),
            })
    }

    /// Byte count of the fixed-width wire payload for this type (16 for the
    /// 128-bit widths, which always take the full two's-complement span).
    pub fn byte_count(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::SingleFloat => 4,
            Self::Int64 | Self::Uint64 | Self::DoubleFloat => 8,
            Self::Int128 | Self::Uint128 => 16,
            Self::Complex | Self::Rational => unreachable!("rejected in from_header"),
        }
    }
}

/// Picks the narrowest signed/unsigned width that represents `i`: smallest
/// signed width first, then that width's unsigned counterpart, widening
/// until 128 bits.
pub fn guess_int(i: i128) -> Result<(NumericType, IntWidth, bool)> {
    if (-(1i128 << 7)..=(1i128 << 7) - 1).contains(&i) {
        Ok((NumericType::Int8, IntWidth::W8, true))
    } else if (0..=(1i128 << 8) - 1).contains(&i) {
        Ok((NumericType::Uint8, IntWidth::W8, false))
    } else if (-(1i128 << 15)..=(1i128 << 15) - 1).contains(&i) {
        Ok((NumericType::Int16, IntWidth::W16, true))
    } else if (0..=(1i128 << 16) - 1).contains(&i) {
        Ok((NumericType::Uint16, IntWidth::W16, false))
    } else if (-(1i128 << 31)..=(1i128 << 31) - 1).contains(&i) {
        Ok((NumericType::Int32, IntWidth::W32, true))
    } else if (0..=(1i128 << 32) - 1).contains(&i) {
        Ok((NumericType::Uint32, IntWidth::W32, false))
    } else if (-(1i128 << 63)..=(1i128 << 63) - 1).contains(&i) {
        Ok((NumericType::Int64, IntWidth::W64, true))
    } else if (0..=(1i128 << 64) - 1).contains(&i) {
        Ok((NumericType::Uint64, IntWidth::W64, false))
    } else if (-(1i128 << 127)..=(1i128 << 127) - 1).contains(&i) {
        Ok((NumericType::Int128, IntWidth::W128, true))
    } else if i >= 0 {
        // u128::MAX doesn't fit in i128, so this arm is unreachable with an
        // i128 input; kept for symmetry with the signed W128 arm above.
        Ok((NumericType::Uint128, IntWidth::W128, false))
    } else {
        Err(conspack_err!(
            ConspackErrorKind::OutOfRange,
            "{i} is out of range for any supported integer width"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_spec_table() {
        assert_eq!(classify(0x00).unwrap(), HeaderGroup::Bool);
        assert_eq!(classify(0x01).unwrap(), HeaderGroup::Bool);
        assert_eq!(classify(0x10).unwrap(), HeaderGroup::Number);
        assert_eq!(classify(0x21).unwrap(), HeaderGroup::Container);
        assert_eq!(classify(0x40).unwrap(), HeaderGroup::String);
        assert_eq!(classify(0x64).unwrap(), HeaderGroup::RemoteRef);
        assert_eq!(classify(0x68).unwrap(), HeaderGroup::Pointer);
        assert_eq!(classify(0x80).unwrap(), HeaderGroup::Cons);
        assert_eq!(classify(0x81).unwrap(), HeaderGroup::Package);
        assert_eq!(classify(0x82).unwrap(), HeaderGroup::Symbol);
        assert_eq!(classify(0x84).unwrap(), HeaderGroup::Character);
        assert_eq!(classify(0xA0).unwrap(), HeaderGroup::Index);
        assert_eq!(classify(0xB3).unwrap(), HeaderGroup::Index);
        assert_eq!(classify(0xE0).unwrap(), HeaderGroup::Tag);
        assert_eq!(classify(0xF3).unwrap(), HeaderGroup::Tag);
        assert_eq!(classify(0x60).unwrap(), HeaderGroup::Ref);
        assert_eq!(classify(0x73).unwrap(), HeaderGroup::Ref);
    }

    #[test]
    fn properties_and_gaps_are_bad_header() {
        assert!(classify(0x88).is_err());
        assert!(classify(0x65).is_err());
    }

    #[test]
    fn size_class_minimality() {
        assert_eq!(SizeClass::from_len(0), SizeClass::Size8);
        assert_eq!(SizeClass::from_len(255), SizeClass::Size8);
        assert_eq!(SizeClass::from_len(256), SizeClass::Size16);
        assert_eq!(SizeClass::from_len(65535), SizeClass::Size16);
        assert_eq!(SizeClass::from_len(65536), SizeClass::Size32);
        assert_eq!(SizeClass::from_len(u32::MAX as u64), SizeClass::Size32);
        assert_eq!(SizeClass::from_len(u32::MAX as u64 + 1), SizeClass::Size64);
    }

    #[test]
    fn guess_int_narrows() {
        assert_eq!(guess_int(42).unwrap().1, IntWidth::W8);
        assert_eq!(guess_int(-1).unwrap().1, IntWidth::W8);
        assert_eq!(guess_int(300).unwrap().1, IntWidth::W16);
        assert_eq!(guess_int(200).unwrap().1, IntWidth::W8);
        assert_eq!(guess_int(70_000).unwrap().1, IntWidth::W32);
    }
}
