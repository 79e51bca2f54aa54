//! The in-memory model of a relocatable object.
//!
//! The entity graph is cyclic (section ↔ symbol, section ↔ relocation
//! section, relocation entry → symbol → section → …), so an `ObjectModel` is
//! a pair of arenas addressed by [`SectionId`] and [`SymbolId`]; every
//! cross-reference is an index into a sibling arena instead of a pointer.
//!
//! `twin` ids point into the *other* input's arenas, and are only set by the
//! correlator. `twino` ids point between the patched arenas and the output
//! arenas, and are only set by the emitter; inside an output model, all the
//! remaining cross-references (`sec`, `base`, `rela`, …) keep pointing into
//! the *source* arenas it was copied from.

use bstr::BString;
use excise_object::{
    elf64::{
        Address, FileType, Machine, OsAbi, SectionHeader, SectionIndex, SymbolBinding, SymbolType,
        Version,
    },
    Endianness,
};
use log::debug;

/// Classification of an entity against its twin in the other object.
///
/// There is deliberately no default: every classification path must assign
/// one, and an entity still carrying `None` after classification is a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The entity only exists on the patched side.
    New,
    /// The entity exists on both sides, with differing contents.
    Changed,
    /// The entity exists on both sides and is equivalent.
    Same,
}

impl Status {
    /// Human-readable rendition, for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Changed => "CHANGED",
            Self::Same => "SAME",
        }
    }
}

fn status_str(status: Option<Status>) -> &'static str {
    status.map_or("-", |status| status.as_str())
}

/// Index of a [`Section`] within an [`ObjectModel`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionId(pub usize);

/// Index of a [`Symbol`] within an [`ObjectModel`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolId(pub usize);

/// The two mutually exclusive shapes of a section.
#[derive(Debug, Clone)]
pub enum SectionKind {
    /// A relocation section (`sh_type == SHT_RELA`).
    Rela {
        /// The target section this relocates.
        base: SectionId,
        /// The decoded relocation entries, in on-disk order.
        relas: Vec<Rela>,
    },
    /// Any other section.
    Regular {
        /// The relocation section applying to this section, if any.
        rela: Option<SectionId>,
        /// The `SECTION`-type symbol defining this section.
        secsym: Option<SymbolId>,
        /// The single function/object symbol defined in this section, if
        /// any (per-function/per-data sectioning contract).
        sym: Option<SymbolId>,
    },
}

/// A section of the object.
#[derive(Debug, Clone)]
pub struct Section {
    /// On-disk index, 1-based; the null section header is not modeled.
    pub index: usize,
    /// Section name.
    pub name: BString,
    /// Owned copy of the section header.
    pub header: SectionHeader,
    /// Owned copy of the section data; empty for `NoBits` sections.
    pub data: Vec<u8>,
    /// Classification against the twin.
    pub status: Option<Status>,
    /// Whether the section is part of the inclusion closure.
    pub include: bool,
    /// The matched section in the other input's model.
    pub twin: Option<SectionId>,
    /// The corresponding section across the patched/output boundary.
    pub twino: Option<SectionId>,
    /// Relocation-bearing or regular shape.
    pub kind: SectionKind,
}

impl Section {
    /// Whether this is a relocation section.
    pub fn is_rela(&self) -> bool {
        matches!(self.kind, SectionKind::Rela { .. })
    }

    /// The relocation entries, for a relocation section.
    pub fn relas(&self) -> Option<&[Rela]> {
        match &self.kind {
            SectionKind::Rela { relas, .. } => Some(relas),
            SectionKind::Regular { .. } => None,
        }
    }

    /// The relocation entries, mutable.
    pub fn relas_mut(&mut self) -> Option<&mut Vec<Rela>> {
        match &mut self.kind {
            SectionKind::Rela { relas, .. } => Some(relas),
            SectionKind::Regular { .. } => None,
        }
    }

    /// The target section, for a relocation section.
    pub fn base(&self) -> Option<SectionId> {
        match &self.kind {
            SectionKind::Rela { base, .. } => Some(*base),
            SectionKind::Regular { .. } => None,
        }
    }

    /// The relocation section applying to this section, for a regular one.
    pub fn rela(&self) -> Option<SectionId> {
        match &self.kind {
            SectionKind::Regular { rela, .. } => *rela,
            SectionKind::Rela { .. } => None,
        }
    }

    /// The defining function/object symbol, for a regular section.
    pub fn sym(&self) -> Option<SymbolId> {
        match &self.kind {
            SectionKind::Regular { sym, .. } => *sym,
            SectionKind::Rela { .. } => None,
        }
    }

    /// The `SECTION`-type symbol, for a regular section.
    pub fn secsym(&self) -> Option<SymbolId> {
        match &self.kind {
            SectionKind::Regular { secsym, .. } => *secsym,
            SectionKind::Rela { .. } => None,
        }
    }
}

/// A symbol of the object.
#[derive(Debug, Clone)]
pub struct Symbol {
    /// On-disk index; index 0 is the reserved null symbol.
    pub index: usize,
    /// Symbol name. `SECTION`-type symbols adopt their section's name.
    pub name: BString,
    /// Offset of the name within the symbol string table.
    pub name_offset: u32,
    /// Binding (scope).
    pub binding: SymbolBinding,
    /// Type.
    pub r#type: SymbolType,
    /// The raw `st_other` field.
    pub other: u8,
    /// The raw `st_shndx` field.
    pub section_index: SectionIndex,
    /// The `st_value` field.
    pub value: u64,
    /// The `st_size` field.
    pub size: u64,
    /// The defining section, resolved from `section_index` when it is a
    /// plain index.
    pub sec: Option<SectionId>,
    /// Classification against the twin.
    pub status: Option<Status>,
    /// Whether the symbol is part of the inclusion closure.
    pub include: bool,
    /// The matched symbol in the other input's model.
    pub twin: Option<SymbolId>,
    /// The corresponding symbol across the patched/output boundary.
    pub twino: Option<SymbolId>,
}

impl Symbol {
    /// The reserved null symbol occupying slot 0.
    pub fn null() -> Self {
        Self {
            index: 0,
            name: BString::from(""),
            name_offset: 0,
            binding: SymbolBinding::Local,
            r#type: SymbolType::NoType,
            other: 0,
            section_index: SectionIndex::Undefined,
            value: 0,
            size: 0,
            sec: None,
            status: None,
            include: false,
            twin: None,
            twino: None,
        }
    }

    /// The `st_info` byte, combining binding and type.
    pub fn info(&self) -> u8 {
        (self.binding.value() << 4) | (self.r#type.value() & 0x0f)
    }
}

/// A decoded relocation entry.
#[derive(Debug, Clone)]
pub struct Rela {
    /// Relocation type; processor-specific, carried around untouched.
    pub r#type: u32,
    /// Offset within the base section.
    pub offset: u64,
    /// Constant addend.
    pub addend: i64,
    /// The referenced symbol, in the same model.
    pub symbol: SymbolId,
    /// If the referenced symbol's section carries the `Strings` flag, the
    /// null-terminated text the addend points at. Relocations into merged
    /// string pools are correlated by this text rather than by addend, so
    /// that reordering the pool does not show up as a change.
    pub string: Option<BString>,
    /// Classification against the twin entry.
    pub status: Option<Status>,
    /// Index of the structurally equal entry in the twin section.
    pub twin: Option<usize>,
}

/// The in-memory model of one relocatable object.
#[derive(Debug)]
pub struct ObjectModel {
    /// Byte order of the object.
    pub endianness: Endianness,
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
    /// Entry point, if any (none for a relocatable object).
    pub entry_point: Option<Address>,
    /// Offset of the program-header table.
    pub program_header_offset: u64,
    /// Number of program headers. Non-zero means a linked image.
    pub program_header_count: u16,
    /// Sections, in on-disk order; `sections[i].index == i + 1`.
    pub sections: Vec<Section>,
    /// Symbols, in on-disk order; slot 0 is the reserved null symbol.
    pub symbols: Vec<Symbol>,
}

impl ObjectModel {
    /// An empty model sharing this model's file-level attributes; the
    /// starting point of the output object.
    pub fn empty_like(&self) -> Self {
        Self {
            endianness: self.endianness,
            version: self.version,
            os_abi: self.os_abi,
            r#type: self.r#type,
            machine: self.machine,
            processor_flags: self.processor_flags,
            entry_point: self.entry_point,
            program_header_offset: 0,
            program_header_count: 0,
            sections: Vec::new(),
            symbols: Vec::new(),
        }
    }

    /// Borrow a section.
    pub fn section(&self, id: SectionId) -> &Section {
        &self.sections[id.0]
    }

    /// Borrow a section, mutably.
    pub fn section_mut(&mut self, id: SectionId) -> &mut Section {
        &mut self.sections[id.0]
    }

    /// Borrow a symbol.
    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0]
    }

    /// Borrow a symbol, mutably.
    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0]
    }

    /// All section ids, in on-disk order.
    pub fn section_ids(&self) -> impl Iterator<Item = SectionId> {
        (0..self.sections.len()).map(SectionId)
    }

    /// All symbol ids, in on-disk order, skipping the null symbol.
    pub fn symbol_ids(&self) -> impl Iterator<Item = SymbolId> {
        (1..self.symbols.len()).map(SymbolId)
    }

    /// Find a section by name.
    pub fn section_by_name(&self, name: &str) -> Option<SectionId> {
        self.sections
            .iter()
            .position(|section| section.name == name)
            .map(SectionId)
    }

    /// Find a symbol by name, skipping the null symbol.
    pub fn symbol_by_name(&self, name: &str) -> Option<SymbolId> {
        self.symbols
            .iter()
            .skip(1)
            .position(|symbol| symbol.name == name)
            .map(|position| SymbolId(position + 1))
    }

    /// Log the whole model at debug level: every section (with its
    /// relocation entries expanded), then every symbol, with statuses.
    pub fn dump(&self, label: &str) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }

        debug!("=== {label}: sections ===");

        for section in &self.sections {
            match &section.kind {
                SectionKind::Rela { base, relas } => {
                    debug!(
                        "{:02} {} ({}), base -> {}",
                        section.index,
                        section.name,
                        status_str(section.status),
                        self.section(*base).name,
                    );

                    for rela in relas {
                        debug!(
                            "  sym {}, offset {}, type {}, {} {} {} ({})",
                            rela.symbol.0,
                            rela.offset,
                            rela.r#type,
                            self.symbol(rela.symbol).name,
                            if rela.addend < 0 { "-" } else { "+" },
                            rela.addend.unsigned_abs(),
                            status_str(rela.status),
                        );
                    }
                }

                SectionKind::Regular { rela, secsym, sym } => {
                    let mut line = format!(
                        "{:02} {} ({})",
                        section.index,
                        section.name,
                        status_str(section.status),
                    );

                    if let Some(sym) = sym {
                        line.push_str(&format!(", sym -> {}", self.symbol(*sym).name));
                    }

                    if let Some(secsym) = secsym {
                        line.push_str(&format!(", secsym -> {}", self.symbol(*secsym).name));
                    }

                    if let Some(rela) = rela {
                        line.push_str(&format!(", rela -> {}", self.section(*rela).name));
                    }

                    debug!("{line}");
                }
            }
        }

        debug!("=== {label}: symbols ===");

        for symbol in self.symbols.iter().skip(1) {
            let mut line = format!(
                "sym {:02}, type {}, bind {}, name {} ({})",
                symbol.index,
                symbol.r#type.value(),
                symbol.binding.value(),
                symbol.name,
                status_str(symbol.status),
            );

            if let Some(sec) = symbol.sec {
                line.push_str(&format!(" -> {}", self.section(sec).name));
            }

            debug!("{line}");
        }
    }
}
