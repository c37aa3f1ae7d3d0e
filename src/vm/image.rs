//! Binary image loading and encoding.
//!
//! Binary format (a flat sequence of little-endian 64-bit words):
//! - Literal count N
//! - N literal records: byte length L, `L / 8 + 1` data words holding the
//!   bytes NUL-padded, then a refcount word that must be -1 (immortal)
//! - Instruction count M
//! - M instruction records: a control word followed by one word per operand
//!
//! Control word layout:
//! - bits 0-47: opcode number
//! - bits 48-51: "operand is a literal index" flag per operand position
//! - bits 52-55: "operand is a register" flag per operand position
//! - bits 56-63: operand count

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use super::ops::Opcode;

/// Width of one image word in bytes.
pub const WORD: usize = 8;

/// Maximum operands per instruction.
pub const MAX_OPERANDS: usize = 4;

/// Refcount word every literal record must carry.
pub const IMMORTAL_REFCOUNT: i64 = -1;

const OPCODE_MASK: u64 = (1 << 48) - 1;
const LITERAL_FLAGS_SHIFT: u32 = 48;
const REGISTER_FLAGS_SHIFT: u32 = 52;
const COUNT_SHIFT: u32 = 56;

/// Error type for image decoding
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("malformed image: byte length {len} is not a multiple of 8")]
    PartialWord { len: usize },

    #[error("malformed image: truncated at word {word} while reading {what}")]
    Truncated { word: usize, what: &'static str },

    #[error("malformed image: {what} declares {declared} but only {available} words remain")]
    CountExceedsImage {
        what: &'static str,
        declared: u64,
        available: usize,
    },

    #[error("malformed image: instruction {index} declares {count} operands (at most 4)")]
    TooManyOperands { index: usize, count: u64 },
}

/// A decoded operand, still holding its raw word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Integer literal (the word reinterpreted as signed).
    Int(i64),
    /// Index into the literal table.
    Literal(u64),
    /// Stack slot, read at every execution.
    Register(u64),
}

impl Operand {
    fn decode(raw: u64, position: usize, literal_flags: u64, register_flags: u64) -> Self {
        let bit = 1 << position;
        if register_flags & bit != 0 {
            Operand::Register(raw)
        } else if literal_flags & bit != 0 {
            Operand::Literal(raw)
        } else {
            Operand::Int(raw as i64)
        }
    }

    pub fn raw(self) -> u64 {
        match self {
            Operand::Int(n) => n as u64,
            Operand::Literal(i) | Operand::Register(i) => i,
        }
    }
}

/// One decoded instruction record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Raw opcode number from the control word.
    pub code: u64,
    /// `None` when the number is outside the instruction set.
    pub op: Option<Opcode>,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(op: Opcode, operands: Vec<Operand>) -> Self {
        Self {
            code: op.code(),
            op: Some(op),
            operands,
        }
    }

    /// Re-encode the control word.
    pub fn control_word(&self) -> u64 {
        let mut literal_flags = 0u64;
        let mut register_flags = 0u64;
        for (i, operand) in self.operands.iter().take(MAX_OPERANDS).enumerate() {
            match operand {
                Operand::Literal(_) => literal_flags |= 1 << i,
                Operand::Register(_) => register_flags |= 1 << i,
                Operand::Int(_) => {}
            }
        }
        (self.code & OPCODE_MASK)
            | (literal_flags << LITERAL_FLAGS_SHIFT)
            | (register_flags << REGISTER_FLAGS_SHIFT)
            | ((self.operands.len() as u64 & 0xff) << COUNT_SHIFT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LiteralRecord {
    /// Byte offset of the payload in the image.
    offset: usize,
    len: usize,
    refcount: i64,
}

/// A loaded program: the image bytes, the literal table viewing into them,
/// and the decoded instruction table.
///
/// Literal bytes are never copied out of the image, so string values that
/// reference literals borrow from the `Image` for as long as they live.
#[derive(Debug, Clone)]
pub struct Image {
    bytes: Vec<u8>,
    literals: Vec<LiteralRecord>,
    instructions: Vec<Instruction>,
}

impl Image {
    /// Read and decode an image file.
    pub fn load(path: &Path) -> crate::Result<Image> {
        let bytes = fs::read(path).map_err(|source| crate::Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Image::from_bytes(bytes)?)
    }

    /// Decode an image. Only structural problems are reported; opcode
    /// numbers and operand bounds are checked when executed.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Image, ImageError> {
        if bytes.len() % WORD != 0 {
            return Err(ImageError::PartialWord { len: bytes.len() });
        }

        let mut r = WordReader::new(&bytes);

        // Literal table
        let literal_count = r.next("literal count")?;
        // A literal record takes at least three words.
        let literal_count = r.check_count("literal count", literal_count, 3)?;
        let mut literals = Vec::with_capacity(literal_count);
        for i in 0..literal_count {
            literals.push(read_literal(&mut r, i)?);
        }

        // Instruction table
        let instruction_count = r.next("instruction count")?;
        let instruction_count = r.check_count("instruction count", instruction_count, 1)?;
        let mut instructions = Vec::with_capacity(instruction_count);
        for i in 0..instruction_count {
            instructions.push(read_instruction(&mut r, i)?);
        }

        debug!(
            literals = literals.len(),
            instructions = instructions.len(),
            trailing_words = r.remaining(),
            "image loaded"
        );

        Ok(Image {
            bytes,
            literals,
            instructions,
        })
    }

    pub fn literal_count(&self) -> usize {
        self.literals.len()
    }

    /// Bytes of literal `index`, excluding the padding.
    pub fn literal(&self, index: usize) -> Option<&[u8]> {
        self.literals
            .get(index)
            .map(|rec| &self.bytes[rec.offset..rec.offset + rec.len])
    }

    /// Bytes of literal `index` followed by at least one padding byte.
    pub fn literal_with_padding(&self, index: usize) -> Option<&[u8]> {
        self.literals
            .get(index)
            .map(|rec| &self.bytes[rec.offset..rec.offset + padded_len(rec.len)])
    }

    /// The refcount word stored in the record (-1 for a well-formed image).
    pub fn literal_refcount(&self, index: usize) -> Option<i64> {
        self.literals.get(index).map(|rec| rec.refcount)
    }

    pub fn literals(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.literals.len()).filter_map(|i| self.literal(i))
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }
}

fn padded_len(len: usize) -> usize {
    (len / WORD + 1) * WORD
}

fn read_literal(r: &mut WordReader<'_>, index: usize) -> Result<LiteralRecord, ImageError> {
    let len = r.next("literal length")?;
    let len = usize::try_from(len).map_err(|_| ImageError::CountExceedsImage {
        what: "literal length",
        declared: len,
        available: r.remaining(),
    })?;
    let data_words = len / WORD + 1;
    let offset = r.skip(data_words, "literal data")? * WORD;
    let refcount = r.next("literal refcount")? as i64;
    if refcount != IMMORTAL_REFCOUNT {
        warn!(index, refcount, "literal refcount word is not the immortal marker");
    }
    Ok(LiteralRecord {
        offset,
        len,
        refcount,
    })
}

fn read_instruction(r: &mut WordReader<'_>, index: usize) -> Result<Instruction, ImageError> {
    let word = r.next("instruction control word")?;
    let code = word & OPCODE_MASK;
    let literal_flags = (word >> LITERAL_FLAGS_SHIFT) & 0xf;
    let register_flags = (word >> REGISTER_FLAGS_SHIFT) & 0xf;
    let count = word >> COUNT_SHIFT;
    if count as usize > MAX_OPERANDS {
        return Err(ImageError::TooManyOperands { index, count });
    }

    let mut operands = Vec::with_capacity(count as usize);
    for position in 0..count as usize {
        let raw = r.next("instruction operand")?;
        operands.push(Operand::decode(raw, position, literal_flags, register_flags));
    }

    Ok(Instruction {
        code,
        op: Opcode::from_code(code),
        operands,
    })
}

/// Cursor over the word stream.
struct WordReader<'a> {
    bytes: &'a [u8],
    /// Index of the next word.
    pos: usize,
}

impl<'a> WordReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() / WORD - self.pos
    }

    fn next(&mut self, what: &'static str) -> Result<u64, ImageError> {
        let start = self.pos * WORD;
        let chunk = self
            .bytes
            .get(start..start + WORD)
            .ok_or(ImageError::Truncated {
                word: self.pos,
                what,
            })?;
        let mut buf = [0u8; WORD];
        buf.copy_from_slice(chunk);
        self.pos += 1;
        Ok(u64::from_le_bytes(buf))
    }

    /// Skip `n` words, returning the index of the first one.
    fn skip(&mut self, n: usize, what: &'static str) -> Result<usize, ImageError> {
        if n > self.remaining() {
            return Err(ImageError::Truncated {
                word: self.bytes.len() / WORD,
                what,
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(start)
    }

    /// Reject counts that could not possibly fit, before allocating for them.
    fn check_count(
        &self,
        what: &'static str,
        declared: u64,
        min_words_each: usize,
    ) -> Result<usize, ImageError> {
        let available = self.remaining();
        match usize::try_from(declared) {
            Ok(n) if n <= available / min_words_each => Ok(n),
            _ => Err(ImageError::CountExceedsImage {
                what,
                declared,
                available,
            }),
        }
    }
}

/// Encoder producing images in the format [`Image::from_bytes`] reads.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    literals: Vec<Vec<u8>>,
    instructions: Vec<Instruction>,
}

impl ImageBuilder {
    /// An empty builder with no literals at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder whose literal 0 is the empty string, as assembled programs
    /// always have.
    pub fn with_sentinel() -> Self {
        let mut builder = Self::new();
        builder.literal(b"");
        builder
    }

    /// Append a literal and return its index.
    pub fn literal(&mut self, bytes: impl AsRef<[u8]>) -> u64 {
        self.literals.push(bytes.as_ref().to_vec());
        (self.literals.len() - 1) as u64
    }

    pub fn instr(&mut self, op: Opcode, operands: &[Operand]) -> &mut Self {
        self.instructions.push(Instruction::new(op, operands.to_vec()));
        self
    }

    /// Append an instruction with an arbitrary opcode number.
    pub fn raw_instr(&mut self, code: u64, operands: &[Operand]) -> &mut Self {
        self.instructions.push(Instruction {
            code,
            op: Opcode::from_code(code),
            operands: operands.to_vec(),
        });
        self
    }

    /// Number of instructions so far; the next one gets index `len() + 1`.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn build(&self) -> Vec<u8> {
        let mut words: Vec<u64> = Vec::new();

        words.push(self.literals.len() as u64);
        for lit in &self.literals {
            words.push(lit.len() as u64);
            let mut data = lit.clone();
            data.resize(padded_len(lit.len()), 0);
            for chunk in data.chunks_exact(WORD) {
                let mut buf = [0u8; WORD];
                buf.copy_from_slice(chunk);
                words.push(u64::from_le_bytes(buf));
            }
            words.push(IMMORTAL_REFCOUNT as u64);
        }

        words.push(self.instructions.len() as u64);
        for instr in &self.instructions {
            words.push(instr.control_word());
            words.extend(instr.operands.iter().map(|op| op.raw()));
        }

        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(ws: &[u64]) -> Vec<u8> {
        ws.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_decode_hand_written_image() {
        // One literal "ab", then PUT lit[0]; ST r1, #2
        let control_put = 0u64 | (0b0001 << 48) | (1 << 56);
        let control_st = 2u64 | (0b0001 << 52) | (2 << 56);
        let data = u64::from_le_bytes(*b"ab\0\0\0\0\0\0");
        let bytes = words(&[
            1, 2, data, u64::MAX, // literal table
            2, control_put, 0, control_st, 1, 2, // instruction table
        ]);

        let image = Image::from_bytes(bytes).unwrap();
        assert_eq!(image.literal_count(), 1);
        assert_eq!(image.literal(0), Some(&b"ab"[..]));
        assert_eq!(image.literal_refcount(0), Some(-1));
        assert_eq!(
            image.instructions(),
            &[
                Instruction::new(Opcode::Put, vec![Operand::Literal(0)]),
                Instruction::new(Opcode::St, vec![Operand::Register(1), Operand::Int(2)]),
            ]
        );
    }

    #[test]
    fn test_register_flag_wins_over_literal_flag() {
        let control = 0u64 | (0b0001 << 48) | (0b0001 << 52) | (1 << 56);
        let image = Image::from_bytes(words(&[0, 1, control, 7])).unwrap();
        assert_eq!(image.instructions()[0].operands, vec![Operand::Register(7)]);
    }

    #[test]
    fn test_integer_operands_are_signed() {
        let mut b = ImageBuilder::new();
        b.instr(Opcode::Put, &[Operand::Int(-5)]);
        let image = Image::from_bytes(b.build()).unwrap();
        assert_eq!(image.instructions()[0].operands, vec![Operand::Int(-5)]);
    }

    #[test]
    fn test_literal_padding_always_has_terminator() {
        let mut b = ImageBuilder::new();
        b.literal(b"12345678");
        let image = Image::from_bytes(b.build()).unwrap();
        let padded = image.literal_with_padding(0).unwrap();
        assert_eq!(padded.len(), 16);
        assert_eq!(padded[8], 0);
        assert_eq!(image.literal(0), Some(&b"12345678"[..]));
    }

    #[test]
    fn test_unknown_opcode_loads() {
        let mut b = ImageBuilder::new();
        b.raw_instr(999, &[]);
        let image = Image::from_bytes(b.build()).unwrap();
        assert_eq!(image.instructions()[0].code, 999);
        assert_eq!(image.instructions()[0].op, None);
    }

    #[test]
    fn test_empty_image_is_truncated() {
        let err = Image::from_bytes(Vec::new()).unwrap_err();
        assert!(matches!(err, ImageError::Truncated { word: 0, .. }));
    }

    #[test]
    fn test_partial_word() {
        let err = Image::from_bytes(vec![0u8; 12]).unwrap_err();
        assert_eq!(err, ImageError::PartialWord { len: 12 });
    }

    #[test]
    fn test_truncated_operand() {
        let mut b = ImageBuilder::new();
        b.instr(Opcode::St, &[Operand::Int(1), Operand::Int(2)]);
        let mut bytes = b.build();
        bytes.truncate(bytes.len() - WORD);
        let err = Image::from_bytes(bytes).unwrap_err();
        assert!(matches!(
            err,
            ImageError::Truncated {
                what: "instruction operand",
                ..
            }
        ));
    }

    #[test]
    fn test_truncated_literal_data() {
        // Declares a 100-byte literal followed by a single word.
        let err = Image::from_bytes(words(&[1, 100, 0, 0])).unwrap_err();
        assert!(matches!(
            err,
            ImageError::Truncated {
                what: "literal data",
                ..
            }
        ));
    }

    #[test]
    fn test_huge_counts_rejected_before_allocation() {
        let err = Image::from_bytes(words(&[u64::MAX])).unwrap_err();
        assert!(matches!(
            err,
            ImageError::CountExceedsImage {
                what: "literal count",
                ..
            }
        ));

        let err = Image::from_bytes(words(&[0, 1_000_000])).unwrap_err();
        assert!(matches!(
            err,
            ImageError::CountExceedsImage {
                what: "instruction count",
                declared: 1_000_000,
                available: 0,
            }
        ));
    }

    #[test]
    fn test_too_many_operands() {
        let control = 26u64 | (5 << 56);
        let err = Image::from_bytes(words(&[0, 1, control, 0, 0, 0, 0, 0])).unwrap_err();
        assert_eq!(err, ImageError::TooManyOperands { index: 0, count: 5 });
    }

    #[test]
    fn test_trailing_words_ignored() {
        let mut b = ImageBuilder::new();
        b.instr(Opcode::Nop, &[]);
        let mut bytes = b.build();
        bytes.extend_from_slice(&[0u8; 3 * WORD]);
        let image = Image::from_bytes(bytes).unwrap();
        assert_eq!(image.instruction_count(), 1);
    }

    #[test]
    fn test_non_immortal_refcount_still_loads() {
        let data = u64::from_le_bytes(*b"x\0\0\0\0\0\0\0");
        let image = Image::from_bytes(words(&[1, 1, data, 3, 0])).unwrap();
        assert_eq!(image.literal_refcount(0), Some(3));
        assert_eq!(image.literal(0), Some(&b"x"[..]));
    }

    #[test]
    fn test_builder_with_sentinel() {
        let mut b = ImageBuilder::with_sentinel();
        let idx = b.literal("hello");
        assert_eq!(idx, 1);
        let image = Image::from_bytes(b.build()).unwrap();
        assert_eq!(image.literals().collect::<Vec<_>>(), vec![&b""[..], &b"hello"[..]]);
    }
}
