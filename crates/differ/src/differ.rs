//! The pipeline driver.

use std::{fs, io, io::Write as _, path::{Path, PathBuf}};

use bstr::BString;
use log::debug;
use miette::Diagnostic;
use thiserror::Error as ThisError;

use crate::{
    classify, configuration::Configuration, correlate, emit, include, inventory, load,
    model::ObjectModel, rewrite,
};

/// The differ, driving the whole pipeline over two object files.
#[derive(Debug)]
pub struct Differ {
    configuration: Configuration,
}

/// Top-level errors. Stage errors nest transparently; the variants declared
/// here cover the cross-object guards and the final file writes.
#[derive(Debug, ThisError, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Load(#[from] load::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Classify(#[from] classify::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Emit(#[from] emit::Error),

    #[error("unreconcilable difference: the ELF file headers of the two objects differ.")]
    #[diagnostic(
        code(E009),
        help(
            "Both inputs must be two compilations of the same source file for the same target, \
             built in the same environment."
        )
    )]
    HeadersDiffer,

    #[error("the {side} object contains program headers; it looks like a linked image.")]
    #[diagnostic(
        code(E004),
        help("Pass the relocatable `.o` files produced by the compiler, not a linked image.")
    )]
    ProgramHeaders { side: &'static str },

    #[error("I was not able to write the output object to `{}`.", .path.display())]
    #[diagnostic(code(E010), help("Check that the output directory exists and is writable."))]
    WritingOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I was not able to write the inventory file next to `{}`.", .path.display())]
    #[diagnostic(code(E010), help("Check that the output directory exists and is writable."))]
    WritingInventory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// The process exit code this error maps to: 2 for unreconcilable
    /// semantic differences, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Classify(_) | Self::HeadersDiffer | Self::ProgramHeaders { .. } => 2,
            Self::Load(_) | Self::Emit(_) | Self::WritingOutput { .. }
            | Self::WritingInventory { .. } => 1,
        }
    }
}

/// What a pipeline run produced.
#[derive(Debug)]
pub struct Diff {
    /// The names of the changed functions, in symbol order; empty when the
    /// two inputs are equivalent.
    pub changed_functions: Vec<BString>,
    /// The output model, for inspection (the inventory file is rendered
    /// from it).
    pub output: ObjectModel,
    /// The serialized output object.
    pub bytes: Vec<u8>,
}

impl Differ {
    pub(crate) fn with_configuration(configuration: Configuration) -> Self {
        Self { configuration }
    }

    /// Run the pipeline over the configured files and write the output
    /// object (and the inventory file, when requested).
    pub fn diff(self) -> Result<Diff, Error> {
        let base = load::load(&self.configuration.original_file)?;
        let patched = load::load(&self.configuration.patched_file)?;

        let diff = diff_models(base, patched, self.configuration.compare_link)?;

        if self.configuration.inventory {
            inventory::write_inventory(&diff.output, &self.configuration.output_file).map_err(
                |source| Error::WritingInventory {
                    path: self.configuration.output_file.clone(),
                    source,
                },
            )?;
        }

        write_output(&diff.bytes, &self.configuration.output_file)?;

        Ok(diff)
    }
}

/// Run the pipeline over two in-memory objects.
///
/// This is [`Differ::diff`] without the file system around it; the returned
/// [`Diff`] holds the serialized output object.
pub fn diff_bytes(
    base_bytes: &[u8],
    patched_bytes: &[u8],
    compare_link: bool,
) -> Result<Diff, Error> {
    let base = load::from_bytes(base_bytes, Path::new("original.o"))?;
    let patched = load::from_bytes(patched_bytes, Path::new("patched.o"))?;

    diff_models(base, patched, compare_link)
}

fn diff_models(
    mut base: ObjectModel,
    mut patched: ObjectModel,
    compare_link: bool,
) -> Result<Diff, Error> {
    compare_file_headers(&base, &patched)?;
    check_program_headers(&base, "original")?;
    check_program_headers(&patched, "patched")?;

    correlate::correlate(&mut base, &mut patched);

    // From this point on, the base model is only ever reached through the
    // `twin` links held by the patched model.
    classify::classify(&mut patched, &base, compare_link)?;

    // The compiler will sometimes use section symbols to reference local
    // objects and functions rather than the object or function symbols
    // themselves. Substitute the object/function symbol in this case so
    // that the entity already resident in the original image can be linked
    // to.
    rewrite::replace_section_symbols(&mut patched);

    let changed_functions = include::changed_functions(&patched);

    for name in &changed_functions {
        println!("function {name} has changed");
    }

    if changed_functions.is_empty() {
        println!("no changes found");
    }

    include::include_changed_functions(&mut patched);
    include::include_standard_sections(&mut patched);

    patched.dump("patched");

    let mut output = emit::generate_output(&mut patched);

    emit::create_rela_sections(&mut output, &patched)?;
    emit::create_shstrtab(&mut output)?;
    emit::create_strtab(&mut output)?;
    emit::create_symtab(&mut output)?;

    output.dump("output");

    let bytes = emit::serialize(&mut output)?;

    Ok(Diff { changed_functions, output, bytes })
}

/// The two inputs must agree on every file-header detail before a
/// section-level comparison makes sense.
fn compare_file_headers(base: &ObjectModel, patched: &ObjectModel) -> Result<(), Error> {
    if base.endianness != patched.endianness
        || base.version != patched.version
        || base.os_abi != patched.os_abi
        || base.r#type != patched.r#type
        || base.machine != patched.machine
        || base.processor_flags != patched.processor_flags
        || base.entry_point != patched.entry_point
        || base.program_header_offset != patched.program_header_offset
    {
        return Err(Error::HeadersDiffer);
    }

    Ok(())
}

/// A fully linked image cannot be diffed at section granularity.
fn check_program_headers(model: &ObjectModel, side: &'static str) -> Result<(), Error> {
    if model.program_header_count != 0 {
        return Err(Error::ProgramHeaders { side });
    }

    debug!("{side} object carries no program headers");

    Ok(())
}

fn write_output(bytes: &[u8], path: &Path) -> Result<(), Error> {
    let write = || -> io::Result<()> {
        let mut file = fs::File::options().create(true).write(true).truncate(true).open(path)?;

        file.write_all(bytes)
    };

    write().map_err(|source| Error::WritingOutput { path: path.to_path_buf(), source })
}
