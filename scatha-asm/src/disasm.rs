//! Instruction stream decoder.
//!
//! Decodes a text section back into `(offset, opcode, operand bytes)`
//! records. Re-encoding the records reproduces the input bit-exactly, which
//! is the round-trip law the assembler tests rely on.

use core::fmt;

use thiserror::Error;

use crate::opcode::{code_size, Opcode};

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disassembled {
    /// Byte offset of the opcode within the text section.
    pub offset: usize,
    pub opcode: Opcode,
    /// Raw operand bytes exactly as encoded.
    pub operands: Vec<u8>,
}

impl Disassembled {
    /// Append the instruction's encoding to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.opcode as u8);
        out.extend_from_slice(&self.operands);
    }
}

impl fmt::Display for Disassembled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:6}: {}", self.offset, self.opcode.mnemonic())?;
        for byte in &self.operands {
            write!(f, " {byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisassemblyError {
    #[error("invalid opcode {byte:#04x} at offset {offset}")]
    InvalidOpcode { byte: u8, offset: usize },
    #[error("truncated instruction at offset {offset}")]
    Truncated { offset: usize },
}

/// Decode a whole text section.
pub fn disassemble(text: &[u8]) -> Result<Vec<Disassembled>, DisassemblyError> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < text.len() {
        let byte = text[offset];
        let opcode = Opcode::from_byte(byte)
            .ok_or(DisassemblyError::InvalidOpcode { byte, offset })?;
        let size = code_size(opcode);
        let operands = text
            .get(offset + 1..offset + size)
            .ok_or(DisassemblyError::Truncated { offset })?
            .to_vec();
        out.push(Disassembled { offset, opcode, operands });
        offset += size;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_and_reencodes() {
        let text = [
            Opcode::Mov64RV as u8,
            0,
            42,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            Opcode::Ret as u8,
        ];
        let decoded = disassemble(&text).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].opcode, Opcode::Mov64RV);
        assert_eq!(decoded[1].offset, 10);
        let mut reencoded = Vec::new();
        for inst in &decoded {
            inst.encode(&mut reencoded);
        }
        assert_eq!(reencoded, text);
    }

    #[test]
    fn rejects_invalid_opcode() {
        let text = [0xFE];
        assert!(matches!(
            disassemble(&text),
            Err(DisassemblyError::InvalidOpcode { byte: 0xFE, offset: 0 })
        ));
    }
}
