//! The classifier: assign a [`Status`] to every entity of the patched model.
//!
//! Non-relocation sections compare headers (a mismatch is unreconcilable)
//! and data bytes. Symbols compare `st_info`/`st_other`/defining-section
//! consistency (a mismatch is unreconcilable), and keep the status their
//! section propagated. Relocation sections obey a two-phase rule: byte
//! differences alone never count, because symbol indices are renumbered
//! freely between builds; only an entry with no structural twin upgrades the
//! section — and its base, and the base's symbols — to `CHANGED`.

use bstr::BString;
use excise_object::elf64::{SectionIndex, SectionType, SymbolType};
use log::debug;
use miette::Diagnostic;
use thiserror::Error as ThisError;

use crate::model::{ObjectModel, SectionId, Status, SymbolId};

/// Classification errors: semantic differences that cannot be expressed as a
/// function-level patch. All of them map to exit code 2.
#[derive(Debug, ThisError, Diagnostic)]
pub enum Error {
    #[error("unreconcilable difference: the `{section}` section header details differ.")]
    #[diagnostic(
        code(E007),
        help(
            "The two objects disagree on the section's type, flags, address, alignment, entry \
             size, or link; they were probably not built in the same environment."
        )
    )]
    SectionHeaderMismatch { section: BString },

    #[error("unreconcilable difference: symbol info mismatch for `{symbol}`.")]
    #[diagnostic(
        code(E008),
        help(
            "The symbol changed type, binding, visibility, or moved to another section; such a \
             change cannot be patched at function granularity."
        )
    )]
    SymbolInfoMismatch { symbol: BString },

    #[error("unreconcilable difference: object size mismatch for `{symbol}`.")]
    #[diagnostic(
        code(E008),
        help(
            "A data object changed size; the surrounding image still holds the old layout, so \
             this needs a rebuild rather than a patch."
        )
    )]
    ObjectSizeMismatch { symbol: BString },
}

/// Classify every entity of `patched` against its twin in `base`.
///
/// `compare_link` controls whether twin section headers must agree on
/// `sh_link` (see `Configuration::compare_link`).
pub fn classify(
    patched: &mut ObjectModel,
    base: &ObjectModel,
    compare_link: bool,
) -> Result<(), Error> {
    compare_nonrela_sections(patched, base, compare_link)?;
    compare_symbols(patched, base)?;
    set_rela_section_statuses(patched);

    Ok(())
}

fn compare_nonrela_sections(
    patched: &mut ObjectModel,
    base: &ObjectModel,
    compare_link: bool,
) -> Result<(), Error> {
    for id in patched.section_ids() {
        if patched.section(id).is_rela() {
            continue;
        }

        let status = match patched.section(id).twin {
            Some(twin) => {
                compare_section_headers(patched, id, base, twin, compare_link)?
            }
            None => Status::New,
        };

        patched.section_mut(id).status = Some(status);

        debug!("section {} is {}", patched.section(id).name, status.as_str());

        // Sync any relocation section and associated symbols.
        let section = patched.section(id);
        let (sym, secsym, rela) = (section.sym(), section.secsym(), section.rela());

        if let Some(sym) = sym {
            patched.symbol_mut(sym).status = Some(status);
        }

        if let Some(secsym) = secsym {
            patched.symbol_mut(secsym).status = Some(status);
        }

        if let Some(rela) = rela {
            patched.section_mut(rela).status = Some(status);
        }
    }

    Ok(())
}

fn compare_section_headers(
    patched: &ObjectModel,
    id: SectionId,
    base: &ObjectModel,
    twin: SectionId,
    compare_link: bool,
) -> Result<Status, Error> {
    let section = patched.section(id);
    let twin = base.section(twin);
    let (header, twin_header) = (&section.header, &twin.header);

    if header.r#type != twin_header.r#type
        || header.flags != twin_header.flags
        || header.address != twin_header.address
        || header.alignment != twin_header.alignment
        || header.entity_size != twin_header.entity_size
        || (compare_link && header.link != twin_header.link)
    {
        return Err(Error::SectionHeaderMismatch { section: section.name.clone() });
    }

    let changed = header.size != twin_header.size
        || section.data.len() != twin.data.len()
        || (header.r#type != SectionType::NoBits && section.data != twin.data);

    Ok(if changed { Status::Changed } else { Status::Same })
}

fn compare_symbols(patched: &mut ObjectModel, base: &ObjectModel) -> Result<(), Error> {
    for id in patched.symbol_ids() {
        match patched.symbol(id).twin {
            Some(twin) => compare_symbol(patched, id, base, twin)?,
            None => patched.symbol_mut(id).status = Some(Status::New),
        }

        let symbol = patched.symbol(id);

        debug!(
            "symbol {} is {}",
            symbol.name,
            symbol.status.map_or("-", |status| status.as_str())
        );
    }

    Ok(())
}

fn compare_symbol(
    patched: &mut ObjectModel,
    id: SymbolId,
    base: &ObjectModel,
    twin_id: SymbolId,
) -> Result<(), Error> {
    let symbol = patched.symbol(id);
    let twin = base.symbol(twin_id);

    let section_mismatch = match (symbol.sec, twin.sec) {
        (Some(sec), Some(twin_sec)) => patched.section(sec).twin != Some(twin_sec),
        (None, None) => false,
        _ => true,
    };

    if symbol.info() != twin.info() || symbol.other != twin.other || section_mismatch {
        return Err(Error::SymbolInfoMismatch { symbol: symbol.name.clone() });
    }

    if symbol.r#type == SymbolType::Object && symbol.size != twin.size {
        return Err(Error::ObjectSizeMismatch { symbol: symbol.name.clone() });
    }

    // An undefined or absolute symbol has no storage of its own here; as
    // long as the checks above hold, it is the same symbol.
    if matches!(symbol.section_index, SectionIndex::Undefined | SectionIndex::Absolute) {
        patched.symbol_mut(id).status = Some(Status::Same);
    }

    Ok(())
}

/// The two-phase rule for relocation sections.
///
/// Every relocation section enters this function carrying its base
/// section's status. For the ones still `SAME`, examine the entries: an
/// entry without a structural twin proves a functional change, so the
/// section, its base, and the base's symbols all become `CHANGED`.
/// Otherwise the observed byte differences are entirely attributable to
/// symbol-index renumbering and the section is conclusively `SAME`.
fn set_rela_section_statuses(patched: &mut ObjectModel) {
    for id in patched.section_ids() {
        let section = patched.section(id);

        if !section.is_rela() {
            continue;
        }

        // Unpaired entries had no structural twin; their status resolves to
        // `NEW` now.
        if let Some(relas) = patched.section_mut(id).relas_mut() {
            for rela in relas.iter_mut() {
                if rela.twin.is_none() {
                    rela.status = Some(Status::New);
                }
            }
        }

        if patched.section(id).status != Some(Status::Same) {
            continue;
        }

        let has_new_entry = patched
            .section(id)
            .relas()
            .unwrap_or_default()
            .iter()
            .any(|rela| rela.status == Some(Status::New));

        if !has_new_entry {
            // The difference in the section data was due to the
            // renumbering of symbol indexes.
            patched.section_mut(id).status = Some(Status::Same);

            continue;
        }

        // This relocation section is different. Make sure the base section
        // and any associated symbols come along too.
        patched.section_mut(id).status = Some(Status::Changed);

        let Some(base) = patched.section(id).base() else { continue };

        patched.section_mut(base).status = Some(Status::Changed);

        let base_section = patched.section(base);
        let (sym, secsym) = (base_section.sym(), base_section.secsym());

        if let Some(sym) = sym {
            patched.symbol_mut(sym).status = Some(Status::Changed);
        }

        if let Some(secsym) = secsym {
            patched.symbol_mut(secsym).status = Some(Status::Changed);
        }

        debug!(
            "relocation section {} upgrades its base to CHANGED",
            patched.section(id).name
        );
    }
}
