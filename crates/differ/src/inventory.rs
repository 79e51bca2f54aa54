//! The `-i` inventory file: a plain-text listing of everything that made it
//! into the output object, one line per section and per symbol, in output
//! order.

use std::{fs, io, io::Write, path::Path};

use crate::model::ObjectModel;

/// Write `<output>.inventory` next to the output object.
///
/// Types and bindings are printed as their numeric ELF values.
pub fn write_inventory(model: &ObjectModel, output_file: &Path) -> io::Result<()> {
    let mut path = output_file.as_os_str().to_os_string();
    path.push(".inventory");

    let mut file =
        fs::File::options().create(true).write(true).truncate(true).open(path)?;

    for section in &model.sections {
        writeln!(file, "section {}", section.name)?;
    }

    for symbol in model.symbols.iter().skip(1) {
        writeln!(
            file,
            "symbol {} {} {}",
            symbol.name,
            symbol.r#type.value(),
            symbol.binding.value()
        )?;
    }

    Ok(())
}
