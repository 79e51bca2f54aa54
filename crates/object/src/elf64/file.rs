use std::borrow::Cow;

use super::{Address, Section, SectionIndex, SectionType};
use crate::{combinators::*, BigEndian, Input, LittleEndian, Number, Read, Result, Write};

/// Object file.
#[derive(Debug)]
pub struct File<'a> {
    /// Byte order of the object file.
    pub encoding: Encoding,
    /// Object file version.
    pub version: Version,
    /// OS ABI.
    pub os_abi: OsAbi,
    /// Object file type.
    pub r#type: FileType,
    /// Machine architecture.
    pub machine: Machine,
    /// Processor-specific flags.
    pub processor_flags: u32,
    /// Entry point virtual address.
    pub entry_point: Option<Address>,
    /// Offset of the program-header table in the file image.
    pub program_header_offset: Address,
    /// Number of program headers.
    ///
    /// Program headers themselves are never parsed: a relocatable object is
    /// not supposed to carry any, and the count is all a consumer needs to
    /// reject linked images.
    pub program_header_count: u16,
    /// Section headers.
    pub sections: Vec<Section<'a>>,
    /// Section index of the section names.
    pub section_index_for_section_names: SectionIndex,
}

impl<'a> File<'a> {
    /// Magic number for an Elf file.
    pub const MAGIC: &'static [u8; 4] = &[0x7f, b'E', b'L', b'F'];

    /// Elf class for 64-bit objects.
    pub const ELF64: &'static [u8; 1] = &[0x02];

    /// Size of `Self` in the Elf format.
    pub const SIZE: u16 = 64;

    pub fn read<E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        E: ParseError<Input<'a>>,
    {
        let file = input;

        let (input, (_magic, _class, encoding)) =
            tuple((tag(Self::MAGIC), tag(Self::ELF64), Encoding::read::<LittleEndian, _>))(input)?;

        match encoding {
            Encoding::Big => Self::read_with_encoding::<BigEndian, _>(file, input, encoding),
            Encoding::Little => Self::read_with_encoding::<LittleEndian, _>(file, input, encoding),
        }
    }

    fn read_with_encoding<N, E>(
        file: Input<'a>,
        input: Input<'a>,
        encoding: Encoding,
    ) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        // `fh` stands for `file_header`.
        // `ph` stands for `program_header`.
        // `sh` stands for `section_header`.

        let (
            _input,
            (
                version,
                os_abi,
                _padding,
                r#type,
                machine,
                _version_bis,
                entry_point,
                ph_offset,
                sh_offset,
                processor_flags,
                _fh_size,
                _ph_entry_size,
                ph_number,
                sh_entry_size,
                sh_number,
                section_index_for_section_names,
            ),
        ) = tuple((
            Version::read::<N, _>,
            OsAbi::read::<N, _>,
            skip(8usize),
            FileType::read::<N, _>,
            Machine::read::<N, _>,
            skip(4usize),
            <Option<Address> as Read<u64>>::read::<N, _>,
            <Address as Read<u64>>::read::<N, _>,
            <Address as Read<u64>>::read::<N, _>,
            N::read_u32,
            skip(2usize),
            N::read_u16,
            N::read_u16,
            N::read_u16,
            N::read_u16,
            <SectionIndex as Read<u16>>::read::<N, _>,
        ))(input)?;

        let mut sections = Vec::with_capacity(sh_number as usize);

        // Parse section headers.
        if sh_entry_size > 0 && sh_number > 0 {
            let section_headers = file
                .get(usize::from(sh_offset)..)
                .ok_or_else(|| Err::Error(E::from_error_kind(file, ErrorKind::Eof)))?;

            for sh_slice in
                section_headers.chunks_exact(sh_entry_size as usize).take(sh_number as usize)
            {
                let (_, sh) = Section::read::<N, _>(sh_slice, file)?;
                sections.push(sh);
            }

            // A truncated section-header table would silently yield fewer
            // headers than announced.
            if sections.len() != sh_number as usize {
                return Err(Err::Error(E::from_error_kind(file, ErrorKind::Eof)));
            }
        }

        let file = Self {
            encoding,
            version,
            os_abi,
            r#type,
            machine,
            processor_flags,
            entry_point,
            program_header_offset: ph_offset,
            program_header_count: ph_number,
            sections,
            section_index_for_section_names,
        };

        Ok((&[], file))
    }

    /// Fetch all known section names.
    ///
    /// For each section, this method will find its name in the appropriate
    /// section[^1], and will **copy** the bytes representing its name.
    ///
    /// [^1]: See [`Self::section_index_for_section_names`].
    pub fn fetch_section_names(&mut self) {
        if let SectionIndex::Ok(index) = self.section_index_for_section_names {
            // Validate the `index`.
            if self.sections.is_empty()
                || index >= self.sections.len()
                || self.sections[index].header.r#type != SectionType::StringTable
            {
                return;
            }

            let names = self
                .sections
                .iter()
                .map(|section| {
                    self.sections[index]
                        .data
                        .string_at_offset(section.header.name_offset as usize)
                        .map(|name| name.into_owned())
                })
                .collect::<Vec<_>>();

            for (section, name) in self.sections.iter_mut().zip(names) {
                section.name = name.map(Cow::Owned);
            }
        }
    }

    /// Get the section that holds the symbol names.
    ///
    /// This section is named `.strtab` and is of type
    /// [`SectionType::StringTable`].
    pub fn strings_section(&'a self) -> Option<&'a Section<'a>> {
        self.section_by_name(".strtab").filter(|section| {
            section.header.r#type == SectionType::StringTable
        })
    }

    /// Find a section by its name, once names have been fetched with
    /// [`Self::fetch_section_names`].
    pub fn section_by_name(&'a self, name: &str) -> Option<&'a Section<'a>> {
        self.sections.iter().find(
            |section| matches!(&section.name, Some(section_name) if **section_name == *name),
        )
    }
}

/// Byte order of the file, as encoded in its identification bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Little endian byte order.
    Little,
    /// Big endian byte order.
    Big,
}

impl Encoding {
    /// The raw on-disk value.
    pub fn value(&self) -> u8 {
        match self {
            Self::Little => 0x01,
            Self::Big => 0x02,
        }
    }
}

impl Read for Encoding {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (next_input, value) = N::read_u8(input)?;

        Ok((
            next_input,
            match value {
                0x01 => Self::Little,
                0x02 => Self::Big,
                _ => return Err(Err::Error(E::from_error_kind(input, ErrorKind::Alt))),
            },
        ))
    }
}

impl Write for Encoding {
    fn write<N, B>(&self, buffer: &mut B) -> std::io::Result<()>
    where
        N: Number,
        B: std::io::Write,
    {
        buffer.write_all(&N::write_u8(self.value()))
    }
}

impl From<Encoding> for crate::Endianness {
    fn from(value: Encoding) -> Self {
        match value {
            Encoding::Little => Self::Little,
            Encoding::Big => Self::Big,
        }
    }
}

impl From<crate::Endianness> for Encoding {
    fn from(value: crate::Endianness) -> Self {
        match value {
            crate::Endianness::Little => Self::Little,
            crate::Endianness::Big => Self::Big,
        }
    }
}

/// Elf version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// Invalid version.
    None,
    /// Current version.
    Current,
}

impl Version {
    /// The raw on-disk value.
    pub fn value(&self) -> u8 {
        match self {
            Self::None => 0x00,
            Self::Current => 0x01,
        }
    }
}

impl Read for Version {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (next_input, value) = N::read_u8(input)?;

        Ok((
            next_input,
            match value {
                0x00 => Self::None,
                0x01 => Self::Current,
                _ => return Err(Err::Error(E::from_error_kind(input, ErrorKind::Alt))),
            },
        ))
    }
}

impl Write for Version {
    fn write<N, B>(&self, buffer: &mut B) -> std::io::Result<()>
    where
        N: Number,
        B: std::io::Write,
    {
        buffer.write_all(&N::write_u8(self.value()))
    }
}

/// Operating System (OS) Application Binary Interface (ABI).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsAbi {
    /// System V.
    SystemV,
    /// HP-UX.
    HpUx,
    /// NetBSD.
    NetBsd,
    /// GNU Linux.
    Gnu,
    /// Sun Solaris.
    Solaris,
    /// FreeBSD.
    FreeBsd,
    /// OpenBSD.
    OpenBsd,
    /// Standalone (embedded) application.
    Standalone,
    /// Any other registered ABI.
    Other(u8),
}

impl OsAbi {
    /// The raw on-disk value.
    pub fn value(&self) -> u8 {
        match self {
            Self::SystemV => 0x00,
            Self::HpUx => 0x01,
            Self::NetBsd => 0x02,
            Self::Gnu => 0x03,
            Self::Solaris => 0x06,
            Self::FreeBsd => 0x09,
            Self::OpenBsd => 0x0c,
            Self::Standalone => 0xff,
            Self::Other(value) => *value,
        }
    }
}

impl Read for OsAbi {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, value) = N::read_u8(input)?;

        Ok((
            input,
            match value {
                0x00 => Self::SystemV,
                0x01 => Self::HpUx,
                0x02 => Self::NetBsd,
                0x03 => Self::Gnu,
                0x06 => Self::Solaris,
                0x09 => Self::FreeBsd,
                0x0c => Self::OpenBsd,
                0xff => Self::Standalone,
                value => Self::Other(value),
            },
        ))
    }
}

impl Write for OsAbi {
    fn write<N, B>(&self, buffer: &mut B) -> std::io::Result<()>
    where
        N: Number,
        B: std::io::Write,
    {
        buffer.write_all(&N::write_u8(self.value()))
    }
}

/// Type of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Unknown.
    None,
    /// Relocatable file.
    RelocatableFile,
    /// Executable file.
    ExecutableFile,
    /// Shared object.
    SharedObject,
    /// Core file.
    CoreFile,
}

impl FileType {
    /// The raw on-disk value.
    pub fn value(&self) -> u16 {
        match self {
            Self::None => 0x00,
            Self::RelocatableFile => 0x01,
            Self::ExecutableFile => 0x02,
            Self::SharedObject => 0x03,
            Self::CoreFile => 0x04,
        }
    }
}

impl Read for FileType {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (next_input, value) = N::read_u16(input)?;

        Ok((
            next_input,
            match value {
                0x00 => Self::None,
                0x01 => Self::RelocatableFile,
                0x02 => Self::ExecutableFile,
                0x03 => Self::SharedObject,
                0x04 => Self::CoreFile,
                _ => return Err(Err::Error(E::from_error_kind(input, ErrorKind::Alt))),
            },
        ))
    }
}

impl Write for FileType {
    fn write<N, B>(&self, buffer: &mut B) -> std::io::Result<()>
    where
        N: Number,
        B: std::io::Write,
    {
        buffer.write_all(&N::write_u16(self.value()))
    }
}

/// Architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Machine {
    /// No specific instruction set.
    None,
    /// SPARC.
    Sparc,
    /// x86.
    X86,
    /// MIPS.
    Mips,
    /// PowerPC.
    PowerPc,
    /// PowerPC (64-bit).
    PowerPc64,
    /// S390, including S390x.
    IbmS390,
    /// Arm (up to Armv7/AArch32).
    Arm,
    /// SuperH.
    HitachiSuperH,
    /// IA-64.
    IntelA64,
    /// AMD x86-64.
    X86_64,
    /// Arm 64-bits (Armv8/AArch64).
    Aarch64,
    /// RISC-V.
    RiscV,
    /// Berkeley Packet Filter.
    Bpf,
    /// Any other registered machine.
    Other(u16),
}

impl Machine {
    /// The raw on-disk value.
    pub fn value(&self) -> u16 {
        match self {
            Self::None => 0x00,
            Self::Sparc => 0x02,
            Self::X86 => 0x03,
            Self::Mips => 0x08,
            Self::PowerPc => 0x14,
            Self::PowerPc64 => 0x15,
            Self::IbmS390 => 0x16,
            Self::Arm => 0x28,
            Self::HitachiSuperH => 0x2a,
            Self::IntelA64 => 0x32,
            Self::X86_64 => 0x3e,
            Self::Aarch64 => 0xb7,
            Self::RiscV => 0xf3,
            Self::Bpf => 0xf7,
            Self::Other(value) => *value,
        }
    }
}

impl Read for Machine {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, value) = N::read_u16(input)?;

        Ok((
            input,
            match value {
                0x00 => Self::None,
                0x02 => Self::Sparc,
                0x03 => Self::X86,
                0x08 => Self::Mips,
                0x14 => Self::PowerPc,
                0x15 => Self::PowerPc64,
                0x16 => Self::IbmS390,
                0x28 => Self::Arm,
                0x2a => Self::HitachiSuperH,
                0x32 => Self::IntelA64,
                0x3e => Self::X86_64,
                0xb7 => Self::Aarch64,
                0xf3 => Self::RiscV,
                0xf7 => Self::Bpf,
                value => Self::Other(value),
            },
        ))
    }
}

impl Write for Machine {
    fn write<N, B>(&self, buffer: &mut B) -> std::io::Result<()>
    where
        N: Number,
        B: std::io::Write,
    {
        buffer.write_all(&N::write_u16(self.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_header() {
        #[rustfmt::skip]
        let input: Vec<u8> = [
            // Magic.
            &[0x7f, b'E', b'L', b'F'][..],
            // Class: 64 bits.
            &[0x02],
            // Encoding: little endian.
            &[0x01],
            // Version.
            &[0x01],
            // OS ABI: System V.
            &[0x00],
            // Padding.
            &[0x00; 8],
            // Type: relocatable.
            &0x01u16.to_le_bytes(),
            // Machine: x86-64.
            &0x3eu16.to_le_bytes(),
            // Version, again.
            &0x01u32.to_le_bytes(),
            // Entry point.
            &0u64.to_le_bytes(),
            // Program header offset.
            &0u64.to_le_bytes(),
            // Section header offset.
            &0u64.to_le_bytes(),
            // Processor flags.
            &0u32.to_le_bytes(),
            // File header size.
            &64u16.to_le_bytes(),
            // Program header entry size.
            &0u16.to_le_bytes(),
            // Number of program headers.
            &0u16.to_le_bytes(),
            // Section header entry size.
            &64u16.to_le_bytes(),
            // Number of section headers.
            &0u16.to_le_bytes(),
            // Section index of the section names.
            &0u16.to_le_bytes(),
        ]
        .concat();

        let (rest, file) = File::read::<()>(&input).unwrap();

        assert!(rest.is_empty());
        assert_eq!(file.encoding, Encoding::Little);
        assert_eq!(file.version, Version::Current);
        assert_eq!(file.os_abi, OsAbi::SystemV);
        assert_eq!(file.r#type, FileType::RelocatableFile);
        assert_eq!(file.machine, Machine::X86_64);
        assert_eq!(file.entry_point, None);
        assert_eq!(file.program_header_count, 0);
        assert!(file.sections.is_empty());
        assert_eq!(file.section_index_for_section_names, SectionIndex::Undefined);
    }

    #[test]
    fn test_file_bad_magic() {
        let input: &[u8] = &[0x7f, b'B', b'A', b'D', 0x02, 0x01];

        assert!(File::read::<()>(input).is_err());
    }

    #[test]
    fn test_encoding() {
        assert_read_write!(
            Encoding: Read<()> + Write<()> {
                bytes_value(auto_endian) = 0x01u8,
                rust_value = Encoding::Little,
            }
        );
        assert_read_write!(
            Encoding: Read<()> + Write<()> {
                bytes_value(auto_endian) = 0x02u8,
                rust_value = Encoding::Big,
            }
        );
        assert!(Encoding::read::<crate::LittleEndian, ()>(&[0x03]).is_err());
    }

    #[test]
    fn test_machine() {
        assert_read_write!(
            Machine: Read<()> + Write<()> {
                bytes_value(auto_endian) = 0x3eu16,
                rust_value = Machine::X86_64,
            }
        );
        assert_read_write!(
            Machine: Read<()> + Write<()> {
                bytes_value(auto_endian) = 0x1234u16,
                rust_value = Machine::Other(0x1234),
            }
        );
    }

    #[test]
    fn test_file_type() {
        assert_read_write!(
            FileType: Read<()> + Write<()> {
                bytes_value(auto_endian) = 0x01u16,
                rust_value = FileType::RelocatableFile,
            }
        );
        assert!(FileType::read::<crate::LittleEndian, ()>(&0x05u16.to_le_bytes()).is_err());
    }
}
