use std::{io, marker::PhantomData, num::NonZeroU64, result::Result as StdResult};

use nom::Offset;

use super::Address;
use crate::{
    combinators::*, BigEndian, Endianness, Input, LittleEndian, Number, Read, Result, Write,
};

/// A relocation entry, with addend (“Rela”).
///
/// The on-disk `r_info` field packs the referenced symbol index in its high
/// 32 bits and the relocation type in its low 32 bits; both halves are kept
/// apart here and recombined by [`Write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rela {
    /// Offset, within the section this relocation applies to, of the storage
    /// unit to patch.
    pub offset: Address,
    /// Index of the referenced symbol in the symbol table.
    pub symbol_index: u32,
    /// Relocation type; processor-specific, carried around untouched.
    pub r#type: u32,
    /// Constant addend used to compute the value to store.
    pub addend: i64,
}

impl Rela {
    /// Size of `Self` in the Elf format.
    pub const SIZE: u16 = 24;

    /// Recombine a symbol index and a relocation type into an `r_info`.
    pub fn info(symbol_index: u32, r#type: u32) -> u64 {
        (u64::from(symbol_index) << 32) | u64::from(r#type)
    }
}

impl Read for Rela {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, (offset, info, addend)) = tuple((
            <Address as Read<u64>>::read::<N, _>,
            N::read_u64,
            N::read_i64,
        ))(input)?;

        Ok((
            input,
            Self {
                offset,
                symbol_index: (info >> 32) as u32,
                r#type: (info & 0xffff_ffff) as u32,
                addend,
            },
        ))
    }
}

impl Write for Rela {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        <Address as Write<u64>>::write::<N, _>(&self.offset, buffer)?;
        buffer.write_all(&N::write_u64(Self::info(self.symbol_index, self.r#type)))?;
        buffer.write_all(&N::write_i64(self.addend))
    }
}

/// An iterator producing [`Rela`]s.
pub struct RelaIterator<'a, E>
where
    E: ParseError<Input<'a>>,
{
    input: Input<'a>,
    endianness: Endianness,
    entity_size: Option<NonZeroU64>,
    _phantom: PhantomData<E>,
}

impl<'a, E> RelaIterator<'a, E>
where
    E: ParseError<Input<'a>>,
{
    pub(super) fn new(
        input: Input<'a>,
        endianness: Endianness,
        entity_size: Option<NonZeroU64>,
    ) -> Self {
        Self { input, endianness, entity_size, _phantom: PhantomData }
    }
}

impl<'a, E> Iterator for RelaIterator<'a, E>
where
    E: ParseError<Input<'a>>,
{
    type Item = StdResult<Rela, Err<E>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.input.is_empty() {
            return None;
        }

        let read = match self.endianness {
            Endianness::Big => Rela::read::<BigEndian, E>(self.input),
            Endianness::Little => Rela::read::<LittleEndian, E>(self.input),
        };

        match read {
            Ok((next_input, rela)) => {
                // Ensure we have read the correct amount of bytes.
                if let Some(entity_size) = self.entity_size {
                    let offset = self.input.offset(next_input);

                    if offset as u64 != entity_size.get() {
                        return Some(Err(Err::Error(E::from_error_kind(
                            self.input,
                            ErrorKind::LengthValue,
                        ))));
                    }
                }

                self.input = next_input;

                Some(Ok(rela))
            }

            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rela() {
        #[rustfmt::skip]
        let input: &[u8] = &[
            // Offset.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0a,
            // Info: symbol 5, type 2 (`R_X86_64_PC32`).
            0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x02,
            // Addend: -4.
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfc,
        ];

        let rela = Rela { offset: Address(10), symbol_index: 5, r#type: 2, addend: -4 };

        assert_read_write!(
            Rela: Read<()> + Write<()> {
                bytes_value(big_endian) = input,
                rust_value = rela,
            }
        );
    }

    #[test]
    fn test_rela_info() {
        assert_eq!(Rela::info(5, 2), 0x0000_0005_0000_0002);
        assert_eq!(Rela::info(0xffff_ffff, 0xffff_ffff), 0xffff_ffff_ffff_ffff);
    }

    #[test]
    fn test_rela_iterator() {
        #[rustfmt::skip]
        let input: &[u8] = &[
            // Rela 1: offset 0, symbol 1, type 4, addend -4.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x04,
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfc,

            // Rela 2: offset 16, symbol 3, type 1, addend 8.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10,
            0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08,
        ];

        let mut iterator =
            RelaIterator::<()>::new(input, Endianness::Big, NonZeroU64::new(24));

        assert_eq!(
            iterator.next(),
            Some(Ok(Rela { offset: Address(0), symbol_index: 1, r#type: 4, addend: -4 }))
        );
        assert_eq!(
            iterator.next(),
            Some(Ok(Rela { offset: Address(16), symbol_index: 3, r#type: 1, addend: 8 }))
        );
        assert_eq!(iterator.next(), None);
    }
}
