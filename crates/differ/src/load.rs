//! The loader: parse one relocatable object into an [`ObjectModel`].
//!
//! Besides decoding, the loader establishes every intra-object
//! back-reference the later stages rely on: a relocation section knows its
//! base section (discovered through the `.rela` name prefix) and vice versa,
//! a section knows its `SECTION`-type symbol and its single defining
//! function/object symbol, and every relocation entry resolves its symbol
//! within the same model.

use std::{borrow::Cow, io, path::{Path, PathBuf}};

use bstr::BString;
use excise_file::{FileReader, Picker};
use excise_object::{
    elf64::{Data, DataType, File, FileType, SectionFlag, SectionType, SymbolType},
    errors::SingleError,
};
use log::debug;
use miette::Diagnostic;
use thiserror::Error as ThisError;

use crate::model::{ObjectModel, Rela, Section, SectionId, SectionKind, Symbol, SymbolId};

/// Loader errors. All of them point at a malformed or unsupported input and
/// map to exit code 1.
#[derive(Debug, ThisError, Diagnostic)]
pub enum Error {
    #[error("I was not able to read `{}`.", .path.display())]
    #[diagnostic(code(E002), help("Check that the file exists and is readable."))]
    ReadingFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I was not able to parse the `{}` object file correctly.", .path.display())]
    #[diagnostic(code(E003), help("Is this an ELF64 relocatable object?"))]
    ParsingFile { path: PathBuf },

    #[error("`{}` is not a relocatable object.", .path.display())]
    #[diagnostic(
        code(E003),
        help("Pass the `.o` files produced by the compiler, not a linked image.")
    )]
    NotRelocatable { path: PathBuf },

    #[error("In `{}`, the section at index {index} has no name.", .path.display())]
    #[diagnostic(code(E005), help("The section-name string table looks broken."))]
    UnnamedSection { path: PathBuf, index: usize },

    #[error(
        "In `{}`, the relocation section `{section}` is not named after its base section.",
        .path.display()
    )]
    #[diagnostic(code(E005), help("Relocation sections are expected to be named `.rela<base>`."))]
    RelaWithoutPrefix { path: PathBuf, section: BString },

    #[error(
        "In `{}`, I can't find the base section for the relocation section `{section}`.",
        .path.display()
    )]
    #[diagnostic(code(E005), help("Relocation sections are expected to be named `.rela<base>`."))]
    NoBaseSection { path: PathBuf, section: BString },

    #[error(
        "In `{}`, the relocation section `{section}` relocates a relocation section.",
        .path.display()
    )]
    #[diagnostic(code(E005), help("This shape is not a compiler output; the file looks mangled."))]
    NestedRelaSection { path: PathBuf, section: BString },

    #[error("`{}` has no `.symtab` symbol table.", .path.display())]
    #[diagnostic(code(E005), help("A relocatable object always carries a symbol table."))]
    MissingSymbolTable { path: PathBuf },

    #[error("In `{}`, the symbol table is not linked to a string table.", .path.display())]
    #[diagnostic(code(E005), help("`.symtab`'s `sh_link` must reference a string table."))]
    BadSymbolStringTable { path: PathBuf },

    #[error("I was not able to parse the symbol at index {index} in `{}`.", .path.display())]
    #[diagnostic(code(E003), help("Is this an ELF64 relocatable object?"))]
    ParsingSymbol { path: PathBuf, index: usize },

    #[error(
        "In `{}`, the symbol at index {index} has no name in the string table.",
        .path.display()
    )]
    #[diagnostic(code(E005), help("The symbol-name string table looks broken."))]
    BadSymbolName { path: PathBuf, index: usize },

    #[error(
        "In `{}`, I can't find the section the symbol `{symbol}` is defined in.",
        .path.display()
    )]
    #[diagnostic(code(E005), help("The symbol's `st_shndx` is out of range."))]
    UnknownSymbolSection { path: PathBuf, symbol: BString },

    #[error(
        "In `{}`, the symbol `{symbol}` sits at offset {offset} within the section \
         `{section}`, expected 0.",
        .path.display()
    )]
    #[diagnostic(
        code(E006),
        help(
            "The inputs must be compiled with `-ffunction-sections -fdata-sections` so that \
             every function and data object lives alone in its own section."
        )
    )]
    SymbolAtNonZeroOffset { path: PathBuf, symbol: BString, section: BString, offset: u64 },

    #[error(
        "I was not able to parse the relocation entry {index} of the section `{section}` in \
         `{}`.",
        .path.display()
    )]
    #[diagnostic(code(E003), help("Is this an ELF64 relocatable object?"))]
    ParsingRela { path: PathBuf, section: BString, index: usize },

    #[error("In `{}`, the relocation section `{section}` has no entry size.", .path.display())]
    #[diagnostic(code(E005), help("`sh_entsize` must hold the size of one relocation entry."))]
    MissingRelaEntitySize { path: PathBuf, section: BString },

    #[error(
        "In `{}`, the relocation entry {index} of the section `{section}` references a \
         symbol outside the symbol table.",
        .path.display()
    )]
    #[diagnostic(code(E005), help("The entry's `r_info` symbol index is out of range."))]
    UnknownRelaSymbol { path: PathBuf, section: BString, index: usize },

    #[error(
        "In `{}`, the relocation entry {index} of the section `{section}` points outside \
         its string section.",
        .path.display()
    )]
    #[diagnostic(code(E005), help("The entry's addend must land on a null-terminated string."))]
    RelaStringOutOfBounds { path: PathBuf, section: BString, index: usize },
}

/// Open and parse one relocatable object.
pub fn load(path: &Path) -> Result<ObjectModel, Error> {
    let reading = |source| Error::ReadingFile { path: path.to_path_buf(), source };

    let file = Picker::open(path).map_err(reading)?;
    let bytes = file.read_as_bytes().map_err(reading)?;

    from_bytes(&bytes, path)
}

/// Parse one relocatable object out of an in-memory buffer.
///
/// `origin` only serves diagnostics.
pub fn from_bytes(bytes: &[u8], origin: &Path) -> Result<ObjectModel, Error> {
    let (_rest, mut file) = File::read::<SingleError>(bytes)
        .map_err(|_| Error::ParsingFile { path: origin.to_path_buf() })?;

    file.fetch_section_names();

    if file.r#type != FileType::RelocatableFile {
        return Err(Error::NotRelocatable { path: origin.to_path_buf() });
    }

    let mut model = ObjectModel {
        endianness: file.encoding.into(),
        version: file.version,
        os_abi: file.os_abi,
        r#type: file.r#type,
        machine: file.machine,
        processor_flags: file.processor_flags,
        entry_point: file.entry_point,
        program_header_offset: file.program_header_offset.into(),
        program_header_count: file.program_header_count,
        sections: Vec::new(),
        symbols: Vec::new(),
    };

    create_section_table(&mut model, &file, origin)?;
    create_symbol_table(&mut model, origin)?;
    create_rela_tables(&mut model, origin)?;

    Ok(model)
}

/// Copy every section (but the null one at index 0) into the model,
/// resolving the relocation-section ↔ base-section links on the way.
fn create_section_table(
    model: &mut ObjectModel,
    file: &File<'_>,
    origin: &Path,
) -> Result<(), Error> {
    // Section names first: the `.rela` prefix contract is resolved against
    // them.
    let mut names = Vec::with_capacity(file.sections.len().saturating_sub(1));

    for (index, section) in file.sections.iter().enumerate().skip(1) {
        let name: BString = section
            .name
            .as_ref()
            .ok_or_else(|| Error::UnnamedSection { path: origin.to_path_buf(), index })?
            .clone()
            .into_owned();

        names.push(name);
    }

    debug!("=== section list ({}) ===", names.len());

    for (position, section) in file.sections.iter().skip(1).enumerate() {
        let name = names[position].clone();

        let kind = if section.header.r#type == SectionType::RelocationWithAddends {
            let base_name = name.strip_prefix(b".rela").ok_or_else(|| {
                Error::RelaWithoutPrefix { path: origin.to_path_buf(), section: name.clone() }
            })?;

            let base = names
                .iter()
                .position(|candidate| candidate.as_slice() == base_name)
                .map(SectionId)
                .ok_or_else(|| Error::NoBaseSection {
                    path: origin.to_path_buf(),
                    section: name.clone(),
                })?;

            SectionKind::Rela { base, relas: Vec::new() }
        } else {
            SectionKind::Regular { rela: None, secsym: None, sym: None }
        };

        debug!(
            "ndx {:02}, size {}, name {}",
            position + 1,
            section.header.size,
            name
        );

        model.sections.push(Section {
            index: position + 1,
            name,
            header: section.header.clone(),
            data: section.data.to_vec(),
            status: None,
            include: false,
            twin: None,
            twino: None,
            kind,
        });
    }

    // Reverse link, from each base section to its relocation section.
    let links = model
        .section_ids()
        .filter_map(|id| model.section(id).base().map(|base| (base, id)))
        .collect::<Vec<_>>();

    for (base, rela_section) in links {
        if model.section(base).is_rela() {
            return Err(Error::NestedRelaSection {
                path: origin.to_path_buf(),
                section: model.section(rela_section).name.clone(),
            });
        }

        if let SectionKind::Regular { rela, .. } = &mut model.section_mut(base).kind {
            *rela = Some(rela_section);
        }
    }

    Ok(())
}

/// Decode the symbol table, resolve each symbol's defining section, and wire
/// the section → symbol back-references.
fn create_symbol_table(model: &mut ObjectModel, origin: &Path) -> Result<(), Error> {
    let symtab = model
        .section_by_name(".symtab")
        .ok_or_else(|| Error::MissingSymbolTable { path: origin.to_path_buf() })?;

    let strtab = {
        let link = model.section(symtab).header.link as usize;

        if link == 0 || link > model.sections.len() {
            return Err(Error::BadSymbolStringTable { path: origin.to_path_buf() });
        }

        let strtab = SectionId(link - 1);

        if model.section(strtab).header.r#type != SectionType::StringTable {
            return Err(Error::BadSymbolStringTable { path: origin.to_path_buf() });
        }

        strtab
    };

    enum Wire {
        DefiningSymbol,
        SectionSymbol,
    }

    let mut symbols = Vec::new();
    let mut wires = Vec::new();

    {
        let symtab_section = model.section(symtab);
        let symtab_data = Data::new(
            Cow::Borrowed(symtab_section.data.as_slice()),
            DataType::SymbolTable,
            model.endianness,
            symtab_section.header.entity_size,
        );
        let strtab_data = Data::new(
            Cow::Borrowed(model.section(strtab).data.as_slice()),
            DataType::StringTable,
            model.endianness,
            None,
        );

        let entries = symtab_data
            .symbols::<SingleError>(None)
            .ok_or_else(|| Error::ParsingFile { path: origin.to_path_buf() })?;

        debug!("=== symbol table ===");

        for (index, entry) in entries.enumerate() {
            let entry = entry
                .map_err(|_| Error::ParsingSymbol { path: origin.to_path_buf(), index })?;

            if index == 0 {
                // The reserved null symbol; skipped by every later stage.
                symbols.push(Symbol::null());

                continue;
            }

            let mut name: BString = strtab_data
                .string_at_offset(entry.name_offset as usize)
                .ok_or_else(|| Error::BadSymbolName { path: origin.to_path_buf(), index })?
                .into_owned();

            let sec = match entry.section_index {
                excise_object::elf64::SectionIndex::Ok(shndx) => {
                    if shndx == 0 || shndx > model.sections.len() {
                        return Err(Error::UnknownSymbolSection {
                            path: origin.to_path_buf(),
                            symbol: name,
                        });
                    }

                    Some(SectionId(shndx - 1))
                }

                _ => None,
            };

            let id = SymbolId(index);

            if let Some(sec) = sec {
                let section_name = model.section(sec).name.clone();

                match entry.r#type {
                    // `__ksymtab_strings` is a special case where the
                    // compiler creates FUNC/OBJECT symbols that refer to
                    // offsets inside the section, for exported symbols.
                    SymbolType::Function | SymbolType::Object
                        if section_name != "__ksymtab_strings" =>
                    {
                        if entry.value.0 != 0 {
                            return Err(Error::SymbolAtNonZeroOffset {
                                path: origin.to_path_buf(),
                                symbol: name,
                                section: section_name,
                                offset: entry.value.0,
                            });
                        }

                        wires.push((sec, Wire::DefiningSymbol, id));
                    }

                    SymbolType::Section => {
                        wires.push((sec, Wire::SectionSymbol, id));

                        // Use the section name as the symbol name; the raw
                        // string-table entry of a section symbol is empty.
                        name = section_name;
                    }

                    _ => {}
                }
            }

            debug!(
                "sym {:02}, type {}, bind {}, name {}",
                index,
                entry.r#type.value(),
                entry.binding.value(),
                name
            );

            symbols.push(Symbol {
                index,
                name,
                name_offset: entry.name_offset,
                binding: entry.binding,
                r#type: entry.r#type,
                other: entry.other,
                section_index: entry.section_index,
                value: entry.value.into(),
                size: entry.size,
                sec,
                status: None,
                include: false,
                twin: None,
                twino: None,
            });
        }
    }

    model.symbols = symbols;

    for (sec, wire, symbol) in wires {
        if let SectionKind::Regular { sym, secsym, .. } = &mut model.section_mut(sec).kind {
            match wire {
                Wire::DefiningSymbol => *sym = Some(symbol),
                Wire::SectionSymbol => *secsym = Some(symbol),
            }
        }
    }

    Ok(())
}

/// Decode every relocation section's entries, resolving each entry's symbol
/// and, for symbols living in a `Strings`-flagged section, the text its
/// addend points at.
fn create_rela_tables(model: &mut ObjectModel, origin: &Path) -> Result<(), Error> {
    let rela_sections =
        model.section_ids().filter(|id| model.section(*id).is_rela()).collect::<Vec<_>>();

    let mut tables = Vec::with_capacity(rela_sections.len());

    for id in rela_sections {
        let section = model.section(id);
        let section_name = section.name.clone();

        let entity_size = section.header.entity_size.ok_or_else(|| {
            Error::MissingRelaEntitySize {
                path: origin.to_path_buf(),
                section: section_name.clone(),
            }
        })?;

        let data = Data::new(
            Cow::Borrowed(section.data.as_slice()),
            DataType::RelocationTable,
            model.endianness,
            Some(entity_size),
        );

        let entries = data
            .relas::<SingleError>()
            .ok_or_else(|| Error::ParsingFile { path: origin.to_path_buf() })?;

        debug!("=== rela table for {} ===", section_name);

        let mut relas = Vec::new();

        for (index, entry) in entries.enumerate() {
            let entry = entry.map_err(|_| Error::ParsingRela {
                path: origin.to_path_buf(),
                section: section_name.clone(),
                index,
            })?;

            let symbol_index = entry.symbol_index as usize;

            if symbol_index >= model.symbols.len() {
                return Err(Error::UnknownRelaSymbol {
                    path: origin.to_path_buf(),
                    section: section_name.clone(),
                    index,
                });
            }

            let symbol = SymbolId(symbol_index);

            let string = match model.symbol(symbol).sec {
                Some(sec)
                    if model.section(sec).header.flags.contains(SectionFlag::Strings) =>
                {
                    let out_of_bounds = || Error::RelaStringOutOfBounds {
                        path: origin.to_path_buf(),
                        section: section_name.clone(),
                        index,
                    };

                    let offset = usize::try_from(entry.addend).map_err(|_| out_of_bounds())?;
                    let strings = Data::new(
                        Cow::Borrowed(model.section(sec).data.as_slice()),
                        DataType::Unspecified,
                        model.endianness,
                        None,
                    );

                    Some(strings.nul_terminated_at(offset).ok_or_else(out_of_bounds)?.into_owned())
                }

                _ => None,
            };

            debug!(
                "offset {}, type {}, {} {} {}{}",
                entry.offset,
                entry.r#type,
                model.symbol(symbol).name,
                if entry.addend < 0 { "-" } else { "+" },
                entry.addend.unsigned_abs(),
                string
                    .as_ref()
                    .map(|string| format!(" (string = {string})"))
                    .unwrap_or_default(),
            );

            relas.push(Rela {
                r#type: entry.r#type,
                offset: entry.offset.into(),
                addend: entry.addend,
                symbol,
                string,
                status: None,
                twin: None,
            });
        }

        tables.push((id, relas));
    }

    for (id, relas) in tables {
        if let SectionKind::Rela { relas: slot, .. } = &mut model.section_mut(id).kind {
            *slot = relas;
        }
    }

    Ok(())
}
