//! The includer: compute the closure of entities destined for the output.
//!
//! Every changed or brand-new function and data object seeds a recursive
//! walk over the relocation edges; `FILE` symbols and the three
//! housekeeping sections are forced in unconditionally.

use bstr::BString;
use excise_object::elf64::SymbolType;
use log::debug;

use crate::model::{ObjectModel, Status, SymbolId};

fn seeds_inclusion(r#type: SymbolType, status: Option<Status>) -> bool {
    matches!(r#type, SymbolType::Function | SymbolType::Object)
        && matches!(status, Some(Status::Changed) | Some(Status::New))
}

/// The names of the changed (or brand-new) functions of the patched model,
/// in symbol order.
pub fn changed_functions(patched: &ObjectModel) -> Vec<BString> {
    patched
        .symbols
        .iter()
        .skip(1)
        .filter(|symbol| {
            symbol.r#type == SymbolType::Function
                && matches!(symbol.status, Some(Status::Changed) | Some(Status::New))
        })
        .map(|symbol| symbol.name.clone())
        .collect()
}

/// Seed the inclusion closure: walk from every changed or brand-new
/// function and data object, and force `FILE` symbols in.
pub fn include_changed_functions(patched: &mut ObjectModel) {
    debug!("=== inclusion tree ===");

    for id in patched.symbol_ids() {
        let symbol = patched.symbol(id);

        if seeds_inclusion(symbol.r#type, symbol.status) && !symbol.include {
            debug!("changed entity: {}", symbol.name);
            include_symbol(patched, id, 0);
        }

        if patched.symbol(id).r#type == SymbolType::File {
            patched.symbol_mut(id).include = true;
        }
    }
}

/// Force the housekeeping sections in, whatever their status: the output
/// always carries a section-name string table, a symbol-name string table,
/// and a symbol table.
pub fn include_standard_sections(patched: &mut ObjectModel) {
    for name in [".shstrtab", ".strtab", ".symtab"] {
        if let Some(id) = patched.section_by_name(name) {
            patched.section_mut(id).include = true;
        }
    }
}

/// The recursive walk.
///
/// Marking happens *before* recursing, so the `already included` guard in
/// the relocation loop bounds the work on this cyclic graph.
fn include_symbol(patched: &mut ObjectModel, id: SymbolId, depth: usize) {
    let indent = 2 * depth;

    patched.symbol_mut(id).include = true;
    debug!("{:indent$}symbol {} is included", "", patched.symbol(id).name);

    // A symbol without a defining section resolves at link time; an
    // unchanged local symbol references an entity already resident in the
    // original image, so only the reference needs to be preserved, not its
    // body. Both are base cases of the recursion.
    let symbol = patched.symbol(id);

    let Some(sec) = symbol.sec else { return };

    if symbol.r#type != SymbolType::Section && symbol.status == Some(Status::Same) {
        return;
    }

    patched.section_mut(sec).include = true;
    debug!("{:indent$}section {} is included", "", patched.section(sec).name);

    if patched.section(sec).secsym() == Some(id) {
        return;
    }

    if let Some(secsym) = patched.section(sec).secsym() {
        patched.symbol_mut(secsym).include = true;
        debug!("{:indent$}section symbol {} is included", "", patched.symbol(secsym).name);
    }

    let Some(rela) = patched.section(sec).rela() else { return };

    patched.section_mut(rela).include = true;
    debug!("{:indent$}section {} is included", "", patched.section(rela).name);

    // The relocation entries are the edges over which function-to-function
    // and function-to-data dependencies propagate.
    let referenced = patched
        .section(rela)
        .relas()
        .unwrap_or_default()
        .iter()
        .map(|rela| rela.symbol)
        .collect::<Vec<_>>();

    for symbol in referenced {
        if !patched.symbol(symbol).include {
            include_symbol(patched, symbol, depth + 1);
        }
    }
}
