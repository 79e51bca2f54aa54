//! Section-symbol substitution.
//!
//! The compiler sometimes emits a relocation against a *section* symbol
//! rather than against the function/object symbol defining that section.
//! Canonicalize those references: the output must link against the original
//! image's function/object symbol, not against a manufactured section
//! symbol.

use excise_object::elf64::SymbolType;
use log::debug;

use crate::model::{ObjectModel, SymbolId};

/// Replace every section-symbol relocation reference by the defining
/// function/object symbol of that section, when there is one.
pub fn replace_section_symbols(patched: &mut ObjectModel) {
    let mut replacements: Vec<(usize, usize, SymbolId)> = Vec::new();

    for id in patched.section_ids() {
        let Some(relas) = patched.section(id).relas() else { continue };

        for (position, rela) in relas.iter().enumerate() {
            let symbol = patched.symbol(rela.symbol);

            if symbol.r#type != SymbolType::Section {
                continue;
            }

            let Some(sec) = symbol.sec else { continue };
            let Some(defining) = patched.section(sec).sym() else { continue };

            debug!(
                "replacing {} with {}",
                symbol.name,
                patched.symbol(defining).name
            );

            replacements.push((id.0, position, defining));
        }
    }

    for (section, position, symbol) in replacements {
        if let Some(relas) = patched.sections[section].relas_mut() {
            relas[position].symbol = symbol;
        }
    }
}
