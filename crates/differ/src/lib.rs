//! `excise-differ` is the object differencing engine.
//!
//! Given two relocatable objects compiled from the same source file with
//! per-function and per-data sectioning — a “base” and a “patched” one — the
//! engine correlates their sections, symbols, and relocation entries,
//! classifies each entity as `NEW`, `CHANGED`, or `SAME`, computes the
//! closure of entities required by the changed functions, and reassembles a
//! minimal, well-formed relocatable object out of that closure. External
//! references are left unresolved for a later link step.
//!
//! The pipeline is strictly sequential: load, correlate, classify, rewrite
//! section-symbol references, include, emit. [`Differ`] drives the stages
//! over files on disk; [`diff_bytes`] does the same over in-memory buffers.

mod classify;
mod configuration;
mod correlate;
mod differ;
mod emit;
mod include;
mod inventory;
mod load;
mod model;
mod rewrite;

pub use classify::{classify, Error as ClassifyError};
pub use configuration::Configuration;
pub use correlate::{correlate, rela_equal};
pub use differ::{diff_bytes, Diff, Differ, Error};
pub use emit::{
    create_rela_sections, create_shstrtab, create_strtab, create_symtab, generate_output,
    serialize, Error as EmitError,
};
pub use include::{changed_functions, include_changed_functions, include_standard_sections};
pub use inventory::write_inventory;
pub use load::{from_bytes, load, Error as LoadError};
pub use model::{ObjectModel, Rela, Section, SectionId, SectionKind, Status, Symbol, SymbolId};
pub use rewrite::replace_section_symbols;
