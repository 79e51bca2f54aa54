use std::{borrow::Cow, marker::PhantomData, num::NonZeroU64, result::Result as StdResult};

use bstr::BStr;
use nom::Offset;

use super::{Address, Section, SectionIndex};
use crate::{
    combinators::*, BigEndian, Endianness, Input, LittleEndian, Number, Read, Result, Write,
};

/// A symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol<'a> {
    /// Name of the symbol, if any.
    pub name: Option<Cow<'a, BStr>>,
    /// An offset, in bytes, to the symbol name, relative to the start of the
    /// symbol string table. If this field contains zero, the symbol has no
    /// name.
    pub name_offset: u32,
    /// The symbol binding attribute, i.e. its scope.
    pub binding: SymbolBinding,
    /// The symbol type.
    pub r#type: SymbolType,
    /// The `st_other` field; its low bits hold the symbol visibility.
    pub other: u8,
    /// The section index of the section in which the symbol is “defined”.
    pub section_index: SectionIndex,
    /// The value of the symbol. This may be an absolute value or a
    /// relocatable address.
    ///
    /// In relocatable files, this field contains the alignment constraint
    /// for common symbols, and a section-relative offset for defined
    /// relocatable symbols.
    pub value: Address,
    /// The size of the value associated with the symbol. If a symbol does
    /// not have an associated size, or the size is unknown, this field
    /// contains zero.
    pub size: u64,
}

impl<'a> Symbol<'a> {
    /// Size of `Self` in the Elf format.
    pub const SIZE: u16 = 24;

    /// The `st_info` byte, combining binding and type.
    pub fn info(&self) -> u8 {
        (self.binding.value() << 4) | (self.r#type.value() & 0x0f)
    }
}

impl<'a> Read for Symbol<'a> {
    fn read<'r, N, E>(input: Input<'r>) -> Result<'r, Self, E>
    where
        N: Number,
        E: ParseError<Input<'r>>,
    {
        let (input, (name_offset, info, other, section_index, value, size)) = tuple((
            N::read_u32,
            N::read_u8,
            N::read_u8,
            <SectionIndex as Read<u16>>::read::<N, _>,
            <Address as Read<u64>>::read::<N, _>,
            N::read_u64,
        ))(input)?;

        let binding = SymbolBinding::from_value(info >> 4)
            .ok_or_else(|| Err::Error(E::from_error_kind(input, ErrorKind::Alt)))?;
        let r#type = SymbolType::from_value(info & 0x0f)
            .ok_or_else(|| Err::Error(E::from_error_kind(input, ErrorKind::Alt)))?;

        Ok((
            input,
            Self { name: None, name_offset, binding, r#type, other, section_index, value, size },
        ))
    }
}

impl<'a> Write for Symbol<'a> {
    fn write<N, B>(&self, buffer: &mut B) -> std::io::Result<()>
    where
        N: Number,
        B: std::io::Write,
    {
        buffer.write_all(&N::write_u32(self.name_offset))?;
        buffer.write_all(&N::write_u8(self.info()))?;
        buffer.write_all(&N::write_u8(self.other))?;
        <SectionIndex as Write<u16>>::write::<N, _>(&self.section_index, buffer)?;
        <Address as Write<u64>>::write::<N, _>(&self.value, buffer)?;
        buffer.write_all(&N::write_u64(self.size))
    }
}

/// A symbol binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolBinding {
    /// The symbol is not visible outside the object file.
    Local,
    /// Global symbol, visible to all object files.
    Global,
    /// Global scope, but with lower precedence than global symbols.
    Weak,
    /// Environment-specific use (10 to 12).
    EnvironmentSpecific(u8),
    /// Processor-specific use (13 to 15).
    ProcessorSpecific(u8),
}

impl SymbolBinding {
    /// Decode from the high nibble of `st_info`.
    pub fn from_value(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::Local,
            0x01 => Self::Global,
            0x02 => Self::Weak,
            0x0a..=0x0c => Self::EnvironmentSpecific(value),
            0x0d..=0x0f => Self::ProcessorSpecific(value),
            _ => return None,
        })
    }

    /// The raw on-disk value.
    pub fn value(&self) -> u8 {
        match self {
            Self::Local => 0x00,
            Self::Global => 0x01,
            Self::Weak => 0x02,
            Self::EnvironmentSpecific(value) | Self::ProcessorSpecific(value) => *value,
        }
    }
}

/// A symbol type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    /// No type specified (e.g., an absolute symbol).
    NoType,
    /// Data object.
    Object,
    /// Function entry point.
    Function,
    /// The symbol is associated with a section.
    Section,
    /// Source file associated with the object file.
    File,
    /// The symbol labels an uninitialized common block.
    CommonBlock,
    /// The symbol specifies a thread-local storage entity.
    ThreadLocal,
    /// Environment-specific use (10 to 12).
    EnvironmentSpecific(u8),
    /// Processor-specific use (13 to 15).
    ProcessorSpecific(u8),
}

impl SymbolType {
    /// Decode from the low nibble of `st_info`.
    pub fn from_value(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::NoType,
            0x01 => Self::Object,
            0x02 => Self::Function,
            0x03 => Self::Section,
            0x04 => Self::File,
            0x05 => Self::CommonBlock,
            0x06 => Self::ThreadLocal,
            0x0a..=0x0c => Self::EnvironmentSpecific(value),
            0x0d..=0x0f => Self::ProcessorSpecific(value),
            _ => return None,
        })
    }

    /// The raw on-disk value.
    pub fn value(&self) -> u8 {
        match self {
            Self::NoType => 0x00,
            Self::Object => 0x01,
            Self::Function => 0x02,
            Self::Section => 0x03,
            Self::File => 0x04,
            Self::CommonBlock => 0x05,
            Self::ThreadLocal => 0x06,
            Self::EnvironmentSpecific(value) | Self::ProcessorSpecific(value) => *value,
        }
    }
}

/// An iterator producing [`Symbol`]s.
pub struct SymbolIterator<'a, E>
where
    E: ParseError<Input<'a>>,
{
    input: Input<'a>,
    endianness: Endianness,
    entity_size: Option<NonZeroU64>,
    strings_section: Option<&'a Section<'a>>,
    _phantom: PhantomData<E>,
}

impl<'a, E> SymbolIterator<'a, E>
where
    E: ParseError<Input<'a>>,
{
    pub(super) fn new(
        input: Input<'a>,
        endianness: Endianness,
        entity_size: Option<NonZeroU64>,
        strings_section: Option<&'a Section<'a>>,
    ) -> Self {
        Self { input, endianness, entity_size, strings_section, _phantom: PhantomData }
    }
}

impl<'a, E> Iterator for SymbolIterator<'a, E>
where
    E: ParseError<Input<'a>>,
{
    type Item = StdResult<Symbol<'a>, Err<E>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.input.is_empty() {
            return None;
        }

        let read = match self.endianness {
            Endianness::Big => Symbol::read::<BigEndian, E>(self.input),
            Endianness::Little => Symbol::read::<LittleEndian, E>(self.input),
        };

        match read {
            Ok((next_input, mut symbol)) => {
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

                if let Some(strings_section) = &self.strings_section {
                    symbol.name =
                        strings_section.data.string_at_offset(symbol.name_offset as usize);
                }

                Some(Ok(symbol))
            }

            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol() {
        #[rustfmt::skip]
        let input: &[u8] = &[
            // Name offset.
            0x00, 0x00, 0x00, 0x01,
            // Binding + type.
            0x12,
            // Other.
            0x00,
            // Section index.
            0x00, 0x02,
            // Value.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07,
            // Size.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
        ];

        let symbol = Symbol {
            name: None,
            name_offset: 1,
            binding: SymbolBinding::Global,
            r#type: SymbolType::Function,
            other: 0,
            section_index: SectionIndex::Ok(2),
            value: Address(7),
            size: 1,
        };

        assert_eq!(symbol.info(), 0x12);

        assert_read_write!(
            Symbol: Read<()> + Write<()> {
                bytes_value(big_endian) = input,
                rust_value = symbol,
            }
        );
    }

    #[test]
    fn test_symbol_binding() {
        macro_rules! test {
            ( $( $input:expr => $result:expr ),* $(,)* ) => {
                $(
                    assert_eq!(SymbolBinding::from_value($input), Some($result));
                    assert_eq!($result.value(), $input);
                )*
            };
        }

        test!(
            0x00 => SymbolBinding::Local,
            0x01 => SymbolBinding::Global,
            0x02 => SymbolBinding::Weak,
            0x0a => SymbolBinding::EnvironmentSpecific(0x0a),
            0x0d => SymbolBinding::ProcessorSpecific(0x0d),
        );

        assert_eq!(SymbolBinding::from_value(0x03), None);
    }

    #[test]
    fn test_symbol_type() {
        macro_rules! test {
            ( $( $input:expr => $result:expr ),* $(,)* ) => {
                $(
                    assert_eq!(SymbolType::from_value($input), Some($result));
                    assert_eq!($result.value(), $input);
                )*
            };
        }

        test!(
            0x00 => SymbolType::NoType,
            0x01 => SymbolType::Object,
            0x02 => SymbolType::Function,
            0x03 => SymbolType::Section,
            0x04 => SymbolType::File,
            0x05 => SymbolType::CommonBlock,
            0x06 => SymbolType::ThreadLocal,
            0x0c => SymbolType::EnvironmentSpecific(0x0c),
            0x0f => SymbolType::ProcessorSpecific(0x0f),
        );

        assert_eq!(SymbolType::from_value(0x07), None);
    }

    #[test]
    fn test_symbol_iterator() {
        #[rustfmt::skip]
        let input: &[u8] = &[
            // Symbol 1.

            // Name offset.
            0x00, 0x00, 0x00, 0x01,
            // Binding + type.
            0x12,
            // Other.
            0x00,
            // Section index.
            0x00, 0x02,
            // Value.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07,
            // Size.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,

            // Symbol 2.

            // Name offset.
            0x00, 0x00, 0x00, 0x03,
            // Binding + type.
            0x23,
            // Other.
            0x00,
            // Section index.
            0x00, 0x01,
            // Value.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05,
            // Size.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02,
        ];

        let mut iterator = SymbolIterator::<()>::new(input, Endianness::Big, None, None);

        assert_eq!(
            iterator.next(),
            Some(Ok(Symbol {
                name: None,
                name_offset: 1,
                binding: SymbolBinding::Global,
                r#type: SymbolType::Function,
                other: 0,
                section_index: SectionIndex::Ok(2),
                value: Address(7),
                size: 1,
            }))
        );

        assert_eq!(
            iterator.next(),
            Some(Ok(Symbol {
                name: None,
                name_offset: 3,
                binding: SymbolBinding::Weak,
                r#type: SymbolType::Section,
                other: 0,
                section_index: SectionIndex::Ok(1),
                value: Address(5),
                size: 2,
            }))
        );

        assert_eq!(iterator.next(), None);
    }
}
