//! The emitter: build the output model out of the inclusion closure, then
//! serialize it as a well-formed relocatable object.
//!
//! The output model is populated by copying included entities from the
//! patched model, reindexing them contiguously on the way. Its
//! cross-references (`sec`, `base`, relocation symbols) keep pointing into
//! the *source* arenas; the mutual `twino` links bridge the two worlds, and
//! every translation to an output index goes through them.

use std::io;

use bstr::BString;
use excise_object::{
    elf64::{
        self, Address, Encoding, SectionHeader, SectionIndex, SectionType, SymbolBinding,
        SymbolType,
    },
    BigEndian, Endianness, LittleEndian, Number, Write as _,
};
use log::debug;
use miette::Diagnostic;
use thiserror::Error as ThisError;

use crate::model::{ObjectModel, SectionId, Symbol, SymbolId};

/// Emitter errors.
///
/// Most of them are internal-invariant violations: the includer guarantees
/// that every entity an output relocation references made it into the
/// output. All of them map to exit code 1.
#[derive(Debug, ThisError, Diagnostic)]
pub enum Error {
    #[error("the output object has no `{name}` section.")]
    #[diagnostic(
        code(E005),
        help("The input must carry `.symtab`, `.strtab`, and `.shstrtab` sections.")
    )]
    MissingSection { name: &'static str },

    #[error("the output section `{section}` has no entry size.")]
    #[diagnostic(code(E005), help("`sh_entsize` must hold the size of one table entry."))]
    MissingEntitySize { section: BString },

    #[error(
        "the relocation entry {index} of the output section `{section}` references a symbol \
         that was not copied into the output."
    )]
    #[diagnostic(help("This is a bug in the inclusion closure; please report it."))]
    UnmappedRelaSymbol { section: BString, index: usize },

    #[error("the base section of the output section `{section}` was not copied into the output.")]
    #[diagnostic(help("This is a bug in the inclusion closure; please report it."))]
    UnmappedBaseSection { section: BString },

    #[error("the relocation entries of the output section `{section}` overflow its data.")]
    #[diagnostic(help("`sh_size` disagrees with `sh_entsize` times the number of entries."))]
    RelaTableOverflow { section: BString },

    #[error("I was not able to serialize the output object.")]
    #[diagnostic(help("This is a bug; please report it."))]
    Serialize(#[from] io::Error),
}

/// Build the output model: promote external references, then copy every
/// included section and symbol, reindexing both.
pub fn generate_output(patched: &mut ObjectModel) -> ObjectModel {
    let mut out = patched.empty_like();

    // References to functions and objects that stay in the unchanged image
    // become external: an undefined global the downstream linker resolves
    // against the original image.
    for id in patched.symbol_ids() {
        let symbol = patched.symbol(id);

        if !matches!(symbol.r#type, SymbolType::Function | SymbolType::Object) {
            continue;
        }

        let defined_in_dropped_section =
            matches!(symbol.sec, Some(sec) if !patched.section(sec).include);

        if defined_in_dropped_section {
            let symbol = patched.symbol_mut(id);
            symbol.r#type = SymbolType::NoType;
            symbol.binding = SymbolBinding::Global;
            symbol.section_index = SectionIndex::Undefined;
            symbol.size = 0;
        }
    }

    // Copy included sections and reindex them contiguously from 1.
    for id in patched.section_ids() {
        if !patched.section(id).include {
            continue;
        }

        let position = SectionId(out.sections.len());
        let mut section = patched.section(id).clone();

        section.index = position.0 + 1;
        section.twin = None;
        section.twino = Some(id);

        out.sections.push(section);
        patched.section_mut(id).twino = Some(position);
    }

    debug!("outputting {} sections", out.sections.len());

    // Copy included symbols. The on-disk ordering is a contract: the symbol
    // table's `sh_info` is “one past the last LOCAL”, so all LOCAL symbols
    // must come first, and the original image's tooling expects FILE, then
    // LOCAL functions, then the remaining LOCALs.
    out.symbols.push(Symbol::null());

    copy_symbols(patched, &mut out, |symbol| symbol.r#type == SymbolType::File);
    copy_symbols(patched, &mut out, |symbol| {
        symbol.binding == SymbolBinding::Local && symbol.r#type == SymbolType::Function
    });
    copy_symbols(patched, &mut out, |symbol| symbol.binding == SymbolBinding::Local);
    copy_symbols(patched, &mut out, |_| true);

    debug!("outputting {} symbols", out.symbols.len());

    out
}

/// One copy pass. Copied symbols get unmarked so that a subsequent pass
/// does not copy them again.
fn copy_symbols(
    patched: &mut ObjectModel,
    out: &mut ObjectModel,
    select: impl Fn(&Symbol) -> bool,
) {
    for id in patched.symbol_ids() {
        if !patched.symbol(id).include || !select(patched.symbol(id)) {
            continue;
        }

        let position = SymbolId(out.symbols.len());
        let mut symbol = patched.symbol(id).clone();

        symbol.index = position.0;
        symbol.twin = None;
        symbol.twino = Some(id);

        // Translate the defining-section index into the output numbering;
        // a symbol whose section was dropped was promoted to `Undefined`
        // beforehand.
        if let Some(twino) = symbol.sec.and_then(|sec| patched.section(sec).twino) {
            symbol.section_index = SectionIndex::Ok(out.section(twino).index);
        }

        out.symbols.push(symbol);
        patched.symbol_mut(id).twino = Some(position);
        patched.symbol_mut(id).include = false;
    }
}

/// Rewrite every output relocation section: fresh data buffer, symbol
/// indices mapped through `twino`, `sh_link` on the output symbol table,
/// `sh_info` on the output index of the base section.
pub fn create_rela_sections(out: &mut ObjectModel, patched: &ObjectModel) -> Result<(), Error> {
    let symtab_link = out
        .section_by_name(".symtab")
        .map(|id| out.section(id).index as u32)
        .ok_or(Error::MissingSection { name: ".symtab" })?;

    let mut rewritten = Vec::new();

    for id in out.section_ids() {
        let section = out.section(id);

        let Some(base) = section.base() else { continue };

        let name = section.name.clone();

        let entity_size = section
            .header
            .entity_size
            .map(|entity_size| entity_size.get() as usize)
            .ok_or_else(|| Error::MissingEntitySize { section: name.clone() })?;

        let mut buffer = vec![0u8; section.header.size as usize];

        for (index, rela) in section.relas().unwrap_or_default().iter().enumerate() {
            let twino = patched
                .symbol(rela.symbol)
                .twino
                .ok_or_else(|| Error::UnmappedRelaSymbol { section: name.clone(), index })?;

            let entry = elf64::Rela {
                offset: Address(rela.offset),
                symbol_index: twino.0 as u32,
                r#type: rela.r#type,
                addend: rela.addend,
            };

            let mut slot = buffer
                .get_mut(index * entity_size..(index + 1) * entity_size)
                .ok_or_else(|| Error::RelaTableOverflow { section: name.clone() })?;

            write_entry(out.endianness, &entry, &mut slot)?;
        }

        // `sh_info` is the output index of the section this relocates.
        let information = patched
            .section(base)
            .twino
            .map(|twino| out.section(twino).index as u32)
            .ok_or_else(|| Error::UnmappedBaseSection { section: name.clone() })?;

        rewritten.push((id, buffer, information));
    }

    for (id, buffer, information) in rewritten {
        let section = out.section_mut(id);

        section.data = buffer;
        section.header.link = symtab_link;
        section.header.information = information;
    }

    Ok(())
}

/// Synthesize the section-name string table: one leading null byte, then
/// every output section's name, null-terminated, in output order.
pub fn create_shstrtab(out: &mut ObjectModel) -> Result<(), Error> {
    let shstrtab =
        out.section_by_name(".shstrtab").ok_or(Error::MissingSection { name: ".shstrtab" })?;

    let size = 1 + out
        .sections
        .iter()
        .map(|section| section.name.len() + 1)
        .sum::<usize>();

    let mut buffer = vec![0u8; size];
    let mut offset = 1;

    for section in &mut out.sections {
        section.header.name_offset = offset as u32;
        buffer[offset..offset + section.name.len()].copy_from_slice(&section.name);
        offset += section.name.len() + 1;

        debug!("{} @ shstrtab offset {}", section.name, section.header.name_offset);
    }

    let section = out.section_mut(shstrtab);
    section.header.size = size as u64;
    section.data = buffer;

    Ok(())
}

/// Synthesize the symbol-name string table: one leading null byte, then
/// every non-null, non-`SECTION` symbol's name, null-terminated. `SECTION`
/// symbols are nameless on disk, their name lives in the section headers.
pub fn create_strtab(out: &mut ObjectModel) -> Result<(), Error> {
    let strtab = out.section_by_name(".strtab").ok_or(Error::MissingSection { name: ".strtab" })?;

    let size = 1 + out
        .symbols
        .iter()
        .skip(1)
        .filter(|symbol| symbol.r#type != SymbolType::Section)
        .map(|symbol| symbol.name.len() + 1)
        .sum::<usize>();

    let mut buffer = vec![0u8; size];
    let mut offset = 1;

    for symbol in out.symbols.iter_mut().skip(1) {
        if symbol.r#type == SymbolType::Section {
            symbol.name_offset = 0;

            continue;
        }

        symbol.name_offset = offset as u32;
        buffer[offset..offset + symbol.name.len()].copy_from_slice(&symbol.name);
        offset += symbol.name.len() + 1;

        debug!("{} @ strtab offset {}", symbol.name, symbol.name_offset);
    }

    let section = out.section_mut(strtab);
    section.header.size = size as u64;
    section.data = buffer;

    Ok(())
}

/// Synthesize the symbol table, including the null entry at index 0.
///
/// `sh_link` points at the symbol-name string table. `sh_info` follows the
/// ELF convention, one past the last `LOCAL` symbol — which the copy order
/// of [`generate_output`] guarantees to be well-defined.
pub fn create_symtab(out: &mut ObjectModel) -> Result<(), Error> {
    let symtab = out.section_by_name(".symtab").ok_or(Error::MissingSection { name: ".symtab" })?;
    let strtab_link = out
        .section_by_name(".strtab")
        .map(|id| out.section(id).index as u32)
        .ok_or(Error::MissingSection { name: ".strtab" })?;

    let entity_size = out
        .section(symtab)
        .header
        .entity_size
        .map(|entity_size| entity_size.get() as usize)
        .ok_or_else(|| Error::MissingEntitySize {
            section: out.section(symtab).name.clone(),
        })?;

    let mut buffer = vec![0u8; out.symbols.len() * entity_size];

    for (position, symbol) in out.symbols.iter().enumerate() {
        let entry = elf64::Symbol {
            name: None,
            name_offset: symbol.name_offset,
            binding: symbol.binding,
            r#type: symbol.r#type,
            other: symbol.other,
            section_index: symbol.section_index,
            value: Address(symbol.value),
            size: symbol.size,
        };

        let mut slot = buffer
            .get_mut(position * entity_size..(position + 1) * entity_size)
            .ok_or_else(|| Error::RelaTableOverflow {
                section: out.section(symtab).name.clone(),
            })?;

        write_entry(out.endianness, &entry, &mut slot)?;
    }

    let first_non_local = out
        .symbols
        .iter()
        .position(|symbol| symbol.binding != SymbolBinding::Local)
        .unwrap_or(out.symbols.len());

    let size = buffer.len();
    let section = out.section_mut(symtab);
    section.data = buffer;
    section.header.size = size as u64;
    section.header.link = strtab_link;
    section.header.information = first_non_local as u32;

    Ok(())
}

/// Serialize the output model: file header, section data, then the
/// section-header table (null header included), laying everything out and
/// patching offsets on the way.
pub fn serialize(out: &mut ObjectModel) -> Result<Vec<u8>, Error> {
    match out.endianness {
        Endianness::Little => serialize_with::<LittleEndian>(out),
        Endianness::Big => serialize_with::<BigEndian>(out),
    }
}

fn serialize_with<N>(out: &mut ObjectModel) -> Result<Vec<u8>, Error>
where
    N: Number,
{
    let section_names_index = out
        .section_by_name(".shstrtab")
        .map(|id| out.section(id).index as u16)
        .ok_or(Error::MissingSection { name: ".shstrtab" })?;

    // Lay the section data out, right after the file header.
    let mut offset = u64::from(elf64::File::SIZE);

    for section in &mut out.sections {
        let alignment = section.header.alignment.value();

        if alignment > 1 {
            offset = align_up(offset, alignment);
        }

        section.header.offset = Address(offset);

        if section.header.r#type != SectionType::NoBits {
            offset += section.data.len() as u64;
        }
    }

    let section_headers_offset = align_up(offset, 8);

    let mut buffer = Vec::with_capacity(
        section_headers_offset as usize + (out.sections.len() + 1) * SectionHeader::SIZE as usize,
    );

    // File header.
    buffer.extend_from_slice(elf64::File::MAGIC);
    buffer.extend_from_slice(elf64::File::ELF64);
    Encoding::from(out.endianness).write::<N, _>(&mut buffer)?;
    out.version.write::<N, _>(&mut buffer)?;
    out.os_abi.write::<N, _>(&mut buffer)?;
    // ABI version and padding.
    buffer.extend_from_slice(&[0; 8]);
    out.r#type.write::<N, _>(&mut buffer)?;
    out.machine.write::<N, _>(&mut buffer)?;
    buffer.extend_from_slice(&N::write_u32(out.version.value().into()));
    // Entry point and program header offset: none.
    buffer.extend_from_slice(&N::write_u64(0));
    buffer.extend_from_slice(&N::write_u64(0));
    buffer.extend_from_slice(&N::write_u64(section_headers_offset));
    buffer.extend_from_slice(&N::write_u32(out.processor_flags));
    buffer.extend_from_slice(&N::write_u16(elf64::File::SIZE));
    // Program header entry size and count: none.
    buffer.extend_from_slice(&N::write_u16(0));
    buffer.extend_from_slice(&N::write_u16(0));
    buffer.extend_from_slice(&N::write_u16(SectionHeader::SIZE));
    buffer.extend_from_slice(&N::write_u16((out.sections.len() + 1) as u16));
    buffer.extend_from_slice(&N::write_u16(section_names_index));

    // Section data.
    for section in &out.sections {
        if section.header.r#type == SectionType::NoBits {
            continue;
        }

        buffer.resize(usize::from(section.header.offset), 0);
        buffer.extend_from_slice(&section.data);
    }

    // Section headers, starting with the reserved null header.
    buffer.resize(section_headers_offset as usize, 0);
    buffer.extend_from_slice(&[0; SectionHeader::SIZE as usize]);

    for section in &out.sections {
        section.header.write::<N, _>(&mut buffer)?;
    }

    Ok(buffer)
}

fn align_up(offset: u64, alignment: u64) -> u64 {
    offset.div_ceil(alignment) * alignment
}

fn write_entry<T>(
    endianness: Endianness,
    value: &T,
    buffer: &mut impl io::Write,
) -> io::Result<()>
where
    T: excise_object::Write,
{
    match endianness {
        Endianness::Little => value.write::<LittleEndian, _>(buffer),
        Endianness::Big => value.write::<BigEndian, _>(buffer),
    }
}
