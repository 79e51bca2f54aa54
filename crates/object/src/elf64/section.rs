use std::{borrow::Cow, io, num::NonZeroU64};

use bstr::BStr;
use enumflags2::{bitflags, BitFlags};

use super::{Address, Alignment, Data};
use crate::{combinators::*, Input, Number, Read, Result, Write};

/// Section header.
///
/// This is the plain, owned copy of the 64 on-disk bytes; the bytes the
/// header describes live in [`Section::data`].
#[derive(Debug, Clone, PartialEq)]
pub struct SectionHeader {
    /// An offset to a string in the `.shstrtab` section that represents the
    /// name of this section.
    pub name_offset: u32,
    /// Type of the section.
    pub r#type: SectionType,
    /// Flags.
    pub flags: SectionFlags,
    /// Virtual address of the section in memory, for sections that are
    /// loaded.
    pub address: Address,
    /// Offset of the section in the file image.
    pub offset: Address,
    /// Size in bytes of the section in the file image. May be 0.
    pub size: u64,
    /// The section index of an associated section. This field is used for
    /// several purposes, depending on the type of section.
    pub link: u32,
    /// Extra information about the section. This field is used for several
    /// purposes, depending on the type of section.
    pub information: u32,
    /// The required alignment of the section.
    pub alignment: Alignment,
    /// The size, in bytes, of each entry, for sections that contain
    /// fixed-sized entries.
    pub entity_size: Option<NonZeroU64>,
}

impl SectionHeader {
    /// Size of `Self` in the Elf format.
    pub const SIZE: u16 = 64;
}

impl Read for SectionHeader {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (
            input,
            (
                name_offset,
                r#type,
                flags,
                address,
                offset,
                size,
                link,
                information,
                alignment,
                entity_size,
            ),
        ) = tuple((
            N::read_u32,
            SectionType::read::<N, _>,
            SectionFlags::read::<N, _>,
            <Address as Read<u64>>::read::<N, _>,
            <Address as Read<u64>>::read::<N, _>,
            N::read_u64,
            N::read_u32,
            N::read_u32,
            Alignment::read::<N, _>,
            N::read_u64,
        ))(input)?;

        Ok((
            input,
            Self {
                name_offset,
                r#type,
                flags,
                address,
                offset,
                size,
                link,
                information,
                alignment,
                entity_size: NonZeroU64::new(entity_size),
            },
        ))
    }
}

impl Write for SectionHeader {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u32(self.name_offset))?;
        self.r#type.write::<N, _>(buffer)?;
        self.flags.write::<N, _>(buffer)?;
        <Address as Write<u64>>::write::<N, _>(&self.address, buffer)?;
        <Address as Write<u64>>::write::<N, _>(&self.offset, buffer)?;
        buffer.write_all(&N::write_u64(self.size))?;
        buffer.write_all(&N::write_u32(self.link))?;
        buffer.write_all(&N::write_u32(self.information))?;
        self.alignment.write::<N, _>(buffer)?;
        buffer.write_all(&N::write_u64(self.entity_size.map_or(0, NonZeroU64::get)))
    }
}

/// A section: its header, its name once fetched, and its data.
#[derive(Debug, PartialEq)]
pub struct Section<'a> {
    /// Name of the section, if any.
    pub name: Option<Cow<'a, BStr>>,
    /// The section header.
    pub header: SectionHeader,
    /// Data described by the header.
    pub data: Data<'a>,
}

impl<'a> Section<'a> {
    /// Read one section header from `input`, and its data from `file`.
    ///
    /// `input` is the 64-byte header slice, `file` is the whole file image
    /// the data offsets are relative to. A `NoBits` section occupies no
    /// bytes in the file image, so its data is empty whatever its size says.
    pub fn read<N, E>(input: Input<'a>, file: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, header) = SectionHeader::read::<N, _>(input)?;

        let bytes: &[u8] = if header.r#type == SectionType::NoBits || header.size == 0 {
            &[]
        } else {
            let start: usize = header.offset.into();
            let length = header.size as usize;

            file.get(start..start + length)
                .ok_or_else(|| Err::Error(E::from_error_kind(input, ErrorKind::Eof)))?
        };

        let data = Data::new(
            Cow::Borrowed(bytes),
            header.r#type.into(),
            N::endianness(),
            header.entity_size,
        );

        Ok((input, Section { name: None, header, data }))
    }
}

/// Section type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionType {
    /// Mark an unused section header.
    Null,
    /// The section contains information defined by the program.
    ProgramData,
    /// The section contains a linker symbol table.
    SymbolTable,
    /// The section contains a string table.
    StringTable,
    /// The section contains “Rela” type relocation entries, with addends
    /// (hence the “a” in “Rela”, i.e. “RELocations with Addends”).
    RelocationWithAddends,
    /// The section contains a symbol hash table.
    SymbolHashTable,
    /// The section contains dynamic linking tables.
    DynamicLinkingTable,
    /// The section contains note information.
    Note,
    /// The section contains uninitialized space; does not occupy any space
    /// in the file. It represents program space with no data (BSS, Block
    /// Started by Symbol).
    NoBits,
    /// The section contains “Rel” type relocation entries, without addends.
    Relocation,
    /// Reserved.
    Shlib,
    /// The section contains a dynamic loader symbol table.
    DynamicLoaderSymbolTable,
    /// Array of constructors.
    ArrayOfConstructors,
    /// Array of destructors.
    ArrayOfDestructors,
    /// Array of pre-constructors.
    ArrayOfPreConstructors,
    /// Section group.
    Group,
    /// Extended section indices.
    ExtendedSectionIndices,
    /// Environment-specific use (`0x6000_0000..=0x6fff_ffff`).
    EnvironmentSpecific(u32),
    /// Processor-specific use (`0x7000_0000..=0x7fff_ffff`).
    ProcessorSpecific(u32),
}

impl SectionType {
    /// The raw on-disk value.
    pub fn value(&self) -> u32 {
        match self {
            Self::Null => 0x00,
            Self::ProgramData => 0x01,
            Self::SymbolTable => 0x02,
            Self::StringTable => 0x03,
            Self::RelocationWithAddends => 0x04,
            Self::SymbolHashTable => 0x05,
            Self::DynamicLinkingTable => 0x06,
            Self::Note => 0x07,
            Self::NoBits => 0x08,
            Self::Relocation => 0x09,
            Self::Shlib => 0x0a,
            Self::DynamicLoaderSymbolTable => 0x0b,
            Self::ArrayOfConstructors => 0x0e,
            Self::ArrayOfDestructors => 0x0f,
            Self::ArrayOfPreConstructors => 0x10,
            Self::Group => 0x11,
            Self::ExtendedSectionIndices => 0x12,
            Self::EnvironmentSpecific(value) | Self::ProcessorSpecific(value) => *value,
        }
    }
}

impl Read for SectionType {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (next_input, value) = N::read_u32(input)?;

        Ok((
            next_input,
            match value {
                0x00 => Self::Null,
                0x01 => Self::ProgramData,
                0x02 => Self::SymbolTable,
                0x03 => Self::StringTable,
                0x04 => Self::RelocationWithAddends,
                0x05 => Self::SymbolHashTable,
                0x06 => Self::DynamicLinkingTable,
                0x07 => Self::Note,
                0x08 => Self::NoBits,
                0x09 => Self::Relocation,
                0x0a => Self::Shlib,
                0x0b => Self::DynamicLoaderSymbolTable,
                0x0e => Self::ArrayOfConstructors,
                0x0f => Self::ArrayOfDestructors,
                0x10 => Self::ArrayOfPreConstructors,
                0x11 => Self::Group,
                0x12 => Self::ExtendedSectionIndices,
                0x6000_0000..=0x6fff_ffff => Self::EnvironmentSpecific(value),
                0x7000_0000..=0x7fff_ffff => Self::ProcessorSpecific(value),
                _ => return Err(Err::Error(E::from_error_kind(input, ErrorKind::Alt))),
            },
        ))
    }
}

impl Write for SectionType {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u32(self.value()))
    }
}

/// Section flag.
#[bitflags]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum SectionFlag {
    /// The section contains writable data.
    Writable = 0x01,
    /// The section is allocated in memory image of program.
    Allocable = 0x02,
    /// The section contains executable instructions.
    Executable = 0x04,
    /// The section might be merged.
    Merge = 0x10,
    /// The section contains null-terminated strings.
    Strings = 0x20,
    /// `sh_info` contains a section index.
    InfoLink = 0x40,
    /// Preserve order after combining.
    LinkOrder = 0x80,
    /// Non-standard OS specific handling required.
    OsNonConforming = 0x100,
    /// Section is member of a group.
    IsPartOfAGroup = 0x200,
    /// Section holds thread-local data.
    HasThreadLocalData = 0x400,
    /// Section data is compressed.
    Compressed = 0x800,
    /// Section is excluded from a fully linked image.
    Excluded = 0x8000_0000,
}

/// Section flags.
pub type SectionFlags = BitFlags<SectionFlag>;

impl Read for SectionFlags {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, flags) = N::read_u64(input)?;
        let flags = Self::from_bits(flags)
            .map_err(|_| Err::Error(E::from_error_kind(input, ErrorKind::Alt)))?;

        Ok((input, flags))
    }
}

impl Write for SectionFlags {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u64(self.bits()))
    }
}

/// Section index, as stored in a symbol's `st_shndx` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionIndex {
    /// A valid section index.
    Ok(usize),
    /// An undefined or meaningless section reference.
    Undefined,
    /// The corresponding reference is an absolute value.
    Absolute,
    /// A symbol that has been declared as a common block (Fortran COMMON or
    /// C tentative declaration).
    Common,
    /// Any other value in the reserved range (`0xff00..=0xffff`).
    Reserved(u16),
}

impl Read<u16> for SectionIndex {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, index) = N::read_u16(input)?;

        Ok((
            input,
            match index {
                0x0000 => Self::Undefined,
                0xfff1 => Self::Absolute,
                0xfff2 => Self::Common,
                0xff00..=0xffff => Self::Reserved(index),
                index => Self::Ok(index.into()),
            },
        ))
    }
}

impl Write<u16> for SectionIndex {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        let index: u16 = match self {
            Self::Undefined => 0x0000,
            Self::Absolute => 0xfff1,
            Self::Common => 0xfff2,
            Self::Reserved(index) => *index,
            Self::Ok(index) => (*index).try_into().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "section index does not fit in `u16`")
            })?,
        };

        buffer.write_all(&N::write_u16(index))
    }
}

#[cfg(test)]
mod tests {
    use super::{super::DataType, *};
    use crate::Endianness;

    #[test]
    fn test_section() {
        #[rustfmt::skip]
        let input: &[u8] = &[
            // Name offset.
            0x00, 0x00, 0x00, 0x01,
            // Type.
            0x00, 0x00, 0x00, 0x03,
            // Flags.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20,
            // Address.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            // Offset.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
            // Size.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04,
            // Link.
            0x00, 0x00, 0x00, 0x03,
            // Information.
            0x00, 0x00, 0x00, 0x00,
            // Alignment.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00,
            // Entity size.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];

        let file: &[u8] = &[0x00, 0x61, 0x62, 0x63, 0x00];

        let header = SectionHeader {
            name_offset: 1,
            r#type: SectionType::StringTable,
            flags: SectionFlag::Strings.into(),
            address: Address(0),
            offset: Address(1),
            size: 4,
            link: 3,
            information: 0,
            alignment: Alignment(NonZeroU64::new(512)),
            entity_size: None,
        };

        let section = Section {
            name: None,
            header: header.clone(),
            data: Data::new(
                Cow::Borrowed(&file[1..5]),
                DataType::StringTable,
                Endianness::Big,
                None,
            ),
        };

        assert_eq!(Section::read::<crate::BigEndian, ()>(input, file), Ok((&[] as &[u8], section)));

        let mut buffer = Vec::new();
        header.write::<crate::BigEndian, _>(&mut buffer).unwrap();

        assert_eq!(buffer, input);
    }

    #[test]
    fn test_section_no_bits_has_no_data() {
        #[rustfmt::skip]
        let input: &[u8] = &[
            // Name offset.
            0x00, 0x00, 0x00, 0x01,
            // Type: `NoBits`.
            0x00, 0x00, 0x00, 0x08,
            // Flags.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03,
            // Address.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            // Offset, way past the end of the file image.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x00,
            // Size.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08,
            // Link.
            0x00, 0x00, 0x00, 0x00,
            // Information.
            0x00, 0x00, 0x00, 0x00,
            // Alignment.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08,
            // Entity size.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];

        let file: &[u8] = &[0x00];

        let (_, section) = Section::read::<crate::BigEndian, ()>(input, file).unwrap();

        assert_eq!(section.header.r#type, SectionType::NoBits);
        assert_eq!(section.header.size, 8);
        assert!(section.data.is_empty());
    }

    #[test]
    fn test_section_data_out_of_bounds() {
        #[rustfmt::skip]
        let input: &[u8] = &[
            // Name offset.
            0x00, 0x00, 0x00, 0x01,
            // Type: `ProgramData`.
            0x00, 0x00, 0x00, 0x01,
            // Flags.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x06,
            // Address.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            // Offset.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            // Size, larger than the file image.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff,
            // Link.
            0x00, 0x00, 0x00, 0x00,
            // Information.
            0x00, 0x00, 0x00, 0x00,
            // Alignment.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
            // Entity size.
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];

        let file: &[u8] = &[0x00, 0x01, 0x02, 0x03];

        assert!(Section::read::<crate::BigEndian, ()>(input, file).is_err());
    }

    #[test]
    fn test_section_type() {
        macro_rules! test {
            ( $( $input:expr => $result:expr ),* $(,)? ) => {{
                $(
                    assert_read_write!(
                        SectionType: Read<()> + Write<()> {
                            bytes_value(auto_endian) = $input as u32,
                            rust_value = $result,
                        }
                    );
                )*
            }};
        }

        test!(
            0x00 => SectionType::Null,
            0x01 => SectionType::ProgramData,
            0x02 => SectionType::SymbolTable,
            0x03 => SectionType::StringTable,
            0x04 => SectionType::RelocationWithAddends,
            0x08 => SectionType::NoBits,
            0x09 => SectionType::Relocation,
            0x11 => SectionType::Group,
            0x6fff_fff5 => SectionType::EnvironmentSpecific(0x6fff_fff5),
            0x7000_0001 => SectionType::ProcessorSpecific(0x7000_0001),
        );

        assert!(SectionType::read::<crate::BigEndian, ()>(&0x1345u32.to_be_bytes()).is_err());
    }

    #[test]
    fn test_section_flag() {
        macro_rules! test {
            ( $( $input:expr => $result:expr ),* $(,)? ) => {{
                $(
                    assert_read_write!(
                        SectionFlags: Read<()> + Write<()> {
                            bytes_value(auto_endian) = $input as u64,
                            rust_value = SectionFlags::from_bits($result as u64).unwrap(),
                        }
                    );
                )*
            }};
        }

        test!(
            0x01 => SectionFlag::Writable,
            0x02 => SectionFlag::Allocable,
            0x04 => SectionFlag::Executable,
            0x10 => SectionFlag::Merge,
            0x20 => SectionFlag::Strings,
            0x40 => SectionFlag::InfoLink,
            0x80 => SectionFlag::LinkOrder,
            0x100 => SectionFlag::OsNonConforming,
            0x200 => SectionFlag::IsPartOfAGroup,
            0x400 => SectionFlag::HasThreadLocalData,
            0x800 => SectionFlag::Compressed,
            0x8000_0000u64 => SectionFlag::Excluded,
        );

        // A merged string section, as emitted for `.rodata.str1.1`.
        assert_read_write!(
            SectionFlags: Read<()> + Write<()> {
                bytes_value(auto_endian) = 0x32u64,
                rust_value = SectionFlag::Allocable | SectionFlag::Merge | SectionFlag::Strings,
            }
        );
    }

    #[test]
    fn test_section_index() {
        macro_rules! test {
            ( $( $input:expr => $result:expr ),* $(,)? ) => {{
                $(
                    assert_read_write!(
                        SectionIndex: Read<u16> + Write<u16> {
                            bytes_value(auto_endian) = $input as u16,
                            rust_value = $result,
                        }
                    );
                )*
            }};
        }

        test!(
            0x0000 => SectionIndex::Undefined,
            0xff00 => SectionIndex::Reserved(0xff00),
            0xff20 => SectionIndex::Reserved(0xff20),
            0xfff1 => SectionIndex::Absolute,
            0xfff2 => SectionIndex::Common,
            0x0001 => SectionIndex::Ok(1),
            0x002a => SectionIndex::Ok(42),
        );
    }
}
