//! Binary program layout.
//!
//! A compiled program is a contiguous blob:
//!
//! ```text
//! ProgramHeader
//! binary section            (text, then aligned constant data)
//! FFI library declarations  (zero or more FFILibDecl records)
//! ```
//!
//! The header stores every section offset as a 64 bit little-endian integer:
//!
//! ```text
//! struct ProgramHeader {
//!     u64 magic;
//!     u64 version;
//!     u64 textOffset;      // from start of blob to the first opcode
//!     u64 binarySize;      // bytes of the binary section
//!     u64 startAddress;    // entry offset within the binary section
//!     u64 ffiTableOffset;  // from start of blob to the FFI declarations
//! }
//! ```
//!
//! Each `FFILibDecl` is `u32 nameLen, name bytes, u32 funcCount` followed by
//! `funcCount` records of `u32 slot, u32 index, u32 nameLen, name bytes,
//! u32 argCount, argCount argument type bytes, 1 return type byte`. The
//! declaration sequence runs to the end of the blob.

use thiserror::Error;

/// Marks the start of every Scatha program image.
pub const MAGIC: u64 = 0x73_63_61_74_68_61_00_01;

/// Current binary format version.
pub const VERSION: u64 = 1;

/// Byte size of the serialized program header.
pub const HEADER_SIZE: usize = 48;

/// Scalar type of a foreign function parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FfiType {
    Void = 0,
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    Float = 5,
    Double = 6,
    Pointer = 7,
    /// Fat array pointer; dereferenced like [`FfiType::Pointer`] when
    /// marshalled, but occupies two argument registers.
    ArrayPointer = 8,
}

impl FfiType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(FfiType::Void),
            1 => Some(FfiType::Int8),
            2 => Some(FfiType::Int16),
            3 => Some(FfiType::Int32),
            4 => Some(FfiType::Int64),
            5 => Some(FfiType::Float),
            6 => Some(FfiType::Double),
            7 => Some(FfiType::Pointer),
            8 => Some(FfiType::ArrayPointer),
            _ => None,
        }
    }

    pub fn is_pointer(self) -> bool {
        matches!(self, FfiType::Pointer | FfiType::ArrayPointer)
    }

    /// Number of argument register slots the type occupies.
    pub fn register_slots(self) -> usize {
        match self {
            FfiType::Void => 0,
            FfiType::ArrayPointer => 2,
            _ => 1,
        }
    }
}

/// Declaration of one foreign function within a library.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FfiFuncDecl {
    pub slot: u32,
    pub index: u32,
    pub name: String,
    pub arg_types: Vec<FfiType>,
    pub return_type: FfiType,
}

/// Declaration of one foreign library and its imported functions.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FfiLibDecl {
    pub name: String,
    pub functions: Vec<FfiFuncDecl>,
}

/// An assembled program, still in structured form.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Text followed by constant data.
    pub binary: Vec<u8>,
    /// Size of the instruction stream prefix of `binary`.
    pub text_size: usize,
    /// Entry offset within `binary`.
    pub start_address: u64,
    pub ffi_decls: Vec<FfiLibDecl>,
}

impl Program {
    /// Serialize to the contiguous blob layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.binary.len());
        let ffi_table_offset = (HEADER_SIZE + self.binary.len()) as u64;
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(HEADER_SIZE as u64).to_le_bytes());
        out.extend_from_slice(&(self.binary.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.start_address.to_le_bytes());
        out.extend_from_slice(&ffi_table_offset.to_le_bytes());
        out.extend_from_slice(&self.binary);
        for lib in &self.ffi_decls {
            write_str(&mut out, &lib.name);
            out.extend_from_slice(&(lib.functions.len() as u32).to_le_bytes());
            for func in &lib.functions {
                out.extend_from_slice(&func.slot.to_le_bytes());
                out.extend_from_slice(&func.index.to_le_bytes());
                write_str(&mut out, &func.name);
                out.extend_from_slice(
                    &(func.arg_types.len() as u32).to_le_bytes(),
                );
                for ty in &func.arg_types {
                    out.push(*ty as u8);
                }
                out.push(func.return_type as u8);
            }
        }
        out
    }
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Failures while parsing a program image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    #[error("program image is truncated")]
    Truncated,
    #[error("bad magic number {0:#x}")]
    BadMagic(u64),
    #[error("unsupported binary format version {0}")]
    UnsupportedVersion(u64),
    #[error("malformed FFI declaration table")]
    MalformedFfiTable,
}

/// Structured view over a serialized program blob.
#[derive(Debug, Clone)]
pub struct ProgramView {
    pub binary: Vec<u8>,
    pub start_address: u64,
    pub ffi_decls: Vec<FfiLibDecl>,
}

impl ProgramView {
    pub fn parse(bytes: &[u8]) -> Result<Self, ProgramError> {
        let mut cursor = Cursor { bytes, pos: 0 };
        let magic = cursor.read_u64()?;
        if magic != MAGIC {
            return Err(ProgramError::BadMagic(magic));
        }
        let version = cursor.read_u64()?;
        if version != VERSION {
            return Err(ProgramError::UnsupportedVersion(version));
        }
        let text_offset = cursor.read_u64()? as usize;
        let binary_size = cursor.read_u64()? as usize;
        let start_address = cursor.read_u64()?;
        let ffi_table_offset = cursor.read_u64()? as usize;
        let binary = bytes
            .get(text_offset..text_offset + binary_size)
            .ok_or(ProgramError::Truncated)?
            .to_vec();
        if ffi_table_offset > bytes.len() {
            return Err(ProgramError::Truncated);
        }
        let mut cursor = Cursor { bytes, pos: ffi_table_offset };
        let mut ffi_decls = Vec::new();
        while cursor.pos < bytes.len() {
            ffi_decls.push(parse_lib(&mut cursor)?);
        }
        Ok(Self { binary, start_address, ffi_decls })
    }
}

fn parse_lib(cursor: &mut Cursor) -> Result<FfiLibDecl, ProgramError> {
    let name = cursor.read_str()?;
    let func_count = cursor.read_u32()?;
    let mut functions = Vec::with_capacity(func_count as usize);
    for _ in 0..func_count {
        let slot = cursor.read_u32()?;
        let index = cursor.read_u32()?;
        let name = cursor.read_str()?;
        let arg_count = cursor.read_u32()?;
        let mut arg_types = Vec::with_capacity(arg_count as usize);
        for _ in 0..arg_count {
            let byte = cursor.read_u8()?;
            arg_types.push(
                FfiType::from_byte(byte)
                    .ok_or(ProgramError::MalformedFfiTable)?,
            );
        }
        let return_type = FfiType::from_byte(cursor.read_u8()?)
            .ok_or(ProgramError::MalformedFfiTable)?;
        functions.push(FfiFuncDecl { slot, index, name, arg_types, return_type });
    }
    Ok(FfiLibDecl { name, functions })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn read_u8(&mut self) -> Result<u8, ProgramError> {
        let byte = *self.bytes.get(self.pos).ok_or(ProgramError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u32(&mut self) -> Result<u32, ProgramError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + 4)
            .ok_or(ProgramError::Truncated)?;
        self.pos += 4;
        Ok(u32::from_le_bytes(slice.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64, ProgramError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + 8)
            .ok_or(ProgramError::Truncated)?;
        self.pos += 8;
        Ok(u64::from_le_bytes(slice.try_into().unwrap()))
    }

    fn read_str(&mut self) -> Result<String, ProgramError> {
        let len = self.read_u32()? as usize;
        let slice = self
            .bytes
            .get(self.pos..self.pos + len)
            .ok_or(ProgramError::Truncated)?;
        self.pos += len;
        String::from_utf8(slice.to_vec())
            .map_err(|_| ProgramError::MalformedFfiTable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let program = Program {
            binary: vec![1, 2, 3, 4, 5],
            text_size: 5,
            start_address: 2,
            ffi_decls: vec![FfiLibDecl {
                name: "libm".into(),
                functions: vec![FfiFuncDecl {
                    slot: 2,
                    index: 0,
                    name: "sin".into(),
                    arg_types: vec![FfiType::Double],
                    return_type: FfiType::Double,
                }],
            }],
        };
        let bytes = program.to_bytes();
        let view = ProgramView::parse(&bytes).unwrap();
        assert_eq!(view.binary, program.binary);
        assert_eq!(view.start_address, 2);
        assert_eq!(view.ffi_decls, program.ffi_decls);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = Program::default().to_bytes();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            ProgramView::parse(&bytes),
            Err(ProgramError::BadMagic(_))
        ));
    }
}
