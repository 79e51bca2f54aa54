//! The correlator: pair entities of the base and patched models.
//!
//! Sections and symbols pair by name; relocation entries pair by the
//! structural equivalence implemented in [`rela_equal`]. Pairing is recorded
//! through mutually consistent `twin` links, with an initial `SAME` status on
//! both sides; a missing twin is not an error here, the classifier resolves
//! unpaired entities to `NEW`.

use std::collections::HashMap;

use bstr::BString;
use log::debug;

use crate::model::{ObjectModel, Rela, SectionId, Status, SymbolId};

/// Pair sections, symbols, and relocation entries of the two models.
pub fn correlate(base: &mut ObjectModel, patched: &mut ObjectModel) {
    correlate_sections(base, patched);
    correlate_symbols(base, patched);

    // At this point sections are correlated and `twin` can be walked.
    let rela_sections = base
        .section_ids()
        .filter(|id| base.section(*id).is_rela() && base.section(*id).twin.is_some())
        .collect::<Vec<_>>();

    for id in rela_sections {
        correlate_relas(base, id, patched);
    }
}

fn correlate_sections(base: &mut ObjectModel, patched: &mut ObjectModel) {
    // Index the patched sections by name; the first occurrence wins, like a
    // front-to-back scan would.
    let mut by_name: HashMap<BString, SectionId> = HashMap::new();

    for id in patched.section_ids() {
        by_name.entry(patched.section(id).name.clone()).or_insert(id);
    }

    for id in base.section_ids() {
        let Some(&twin) = by_name.get(&base.section(id).name) else { continue };

        base.section_mut(id).twin = Some(twin);
        patched.section_mut(twin).twin = Some(id);

        // Set initial status, might change.
        base.section_mut(id).status = Some(Status::Same);
        patched.section_mut(twin).status = Some(Status::Same);
    }
}

fn correlate_symbols(base: &mut ObjectModel, patched: &mut ObjectModel) {
    let mut by_name: HashMap<BString, SymbolId> = HashMap::new();

    for id in patched.symbol_ids() {
        by_name.entry(patched.symbol(id).name.clone()).or_insert(id);
    }

    for id in base.symbol_ids() {
        let Some(&twin) = by_name.get(&base.symbol(id).name) else { continue };

        base.symbol_mut(id).twin = Some(twin);
        patched.symbol_mut(twin).twin = Some(id);

        // Set initial status, might change.
        base.symbol_mut(id).status = Some(Status::Same);
        patched.symbol_mut(twin).status = Some(Status::Same);
    }
}

fn correlate_relas(base: &mut ObjectModel, base_section: SectionId, patched: &mut ObjectModel) {
    let Some(patched_section) = base.section(base_section).twin else { return };

    let mut pairs = Vec::new();

    {
        let base_relas = base.section(base_section).relas().unwrap_or_default();
        let patched_relas = patched.section(patched_section).relas().unwrap_or_default();

        for (i, base_rela) in base_relas.iter().enumerate() {
            for (j, patched_rela) in patched_relas.iter().enumerate() {
                if rela_equal(base, base_rela, patched, patched_rela) {
                    pairs.push((i, j));

                    break;
                }
            }
        }
    }

    debug!(
        "rela section {}: {} pairs",
        base.section(base_section).name,
        pairs.len()
    );

    for (i, j) in pairs {
        if let Some(relas) = base.section_mut(base_section).relas_mut() {
            relas[i].twin = Some(j);
            relas[i].status = Some(Status::Same);
        }

        if let Some(relas) = patched.section_mut(patched_section).relas_mut() {
            relas[j].twin = Some(i);
            relas[j].status = Some(Status::Same);
        }
    }
}

/// The structural equivalence of two relocation entries, one on each side.
///
/// The type and the offset must match. Then, for an entry pointing into a
/// string pool, the pointed *text* decides: two entries referencing the same
/// bytes are equal even when the pool was reordered and the addends differ.
/// For any other entry, the referenced symbol's *name* and the addend
/// decide, which makes the comparison immune to symbol renumbering.
pub fn rela_equal(
    base: &ObjectModel,
    base_rela: &Rela,
    patched: &ObjectModel,
    patched_rela: &Rela,
) -> bool {
    if base_rela.r#type != patched_rela.r#type || base_rela.offset != patched_rela.offset {
        return false;
    }

    if let Some(string) = &base_rela.string {
        return matches!(&patched_rela.string, Some(other) if string == other);
    }

    base.symbol(base_rela.symbol).name == patched.symbol(patched_rela.symbol).name
        && base_rela.addend == patched_rela.addend
}
