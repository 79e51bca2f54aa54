//! `excise-bin` is the executable of `excise`.
//!
//! This crate contains all the implementation to make `excise` an executable
//! that can be used by happy users.

mod error;

use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    process,
};

use argh::FromArgs;
use error::Error;
use excise_differ::Configuration;
use miette::Report;

/// The `excise` command compares two relocatable objects compiled from the
/// same source file — an original and a patched one — and produces a
/// minimized object holding only the changed functions and whatever they
/// reference.
#[derive(Debug, FromArgs)]
struct Excise {
    /// explain a particular error based on its code (of kind `E...`).
    #[argh(option)]
    explain: Option<String>,

    /// show debug output.
    #[argh(switch, short = 'd')]
    debug: bool,

    /// create an inventory file with the list of sections and symbols.
    #[argh(switch, short = 'i')]
    inventory: bool,

    /// the original object file.
    #[argh(positional)]
    original_file: PathBuf,

    /// the patched object file.
    #[argh(positional)]
    patched_file: PathBuf,

    /// the output object file.
    #[argh(positional)]
    output_file: PathBuf,
}

impl Excise {
    /// Creates a new `Self` type based on [`std::env::args_os`].
    fn new() -> Result<Self, Error> {
        // Collect all arguments.
        let arguments =
            env::args_os().map(OsString::into_string).collect::<Result<Vec<_>, _>>().map_err(
                |argument| Error::InvalidArgumentEncoding(argument.to_string_lossy().to_string()),
            )?;

        // Check whether `argv` is present.
        if arguments.is_empty() {
            return Err(Error::ProgramNameIsMissing);
        }

        // Extract the base command from a path.
        let command = Path::new(&arguments[0])
            .file_name()
            .and_then(|file_name| file_name.to_str())
            .unwrap_or(&arguments[0]);

        // Extract all arguments.
        let arguments =
            arguments.iter().skip(1).map(|argument| argument.as_str()).collect::<Vec<_>>();

        // Parse and build `Self`.
        match Excise::from_args(&[command], &arguments) {
            Ok(excise) => Ok(excise),

            Err(early_exit) => match early_exit.status {
                // The command was parsed successfully and the early exit is due to a flag like
                // `--help` causing early exit with output.
                Ok(()) => {
                    println!("{}", early_exit.output);

                    process::exit(0);
                }

                // The arguments were not successfully parsed.
                Err(()) => Err(Error::CommandLine(early_exit.output.trim().to_string())),
            },
        }
    }
}

fn main() {
    process::exit(match try_main() {
        Ok(()) => 0,

        Err(error) => {
            let code = error.exit_code();

            eprintln!("{:?}", Report::new(error));

            code
        }
    })
}

fn try_main() -> Result<(), Error> {
    // Install the error report.
    Error::install_and_configure()?;

    // Build the command-line arguments.
    let excise = Excise::new()?;

    // Handle the `--explain` option.
    if let Some(error_code) = excise.explain {
        println!("{}", Error::explain(&error_code)?);

        return Ok(());
    }

    // `-d` raises the log verbosity up to `debug!`; the logger may already
    // be set when running under a test harness, which is fine.
    let _ = stderrlog::new().verbosity(if excise.debug { 3 } else { 1 }).init();

    // Configure the differ, and here we go.
    Configuration::new(excise.original_file, excise.patched_file, excise.output_file)
        .with_inventory(excise.inventory)
        .differ()
        .diff()?;

    Ok(())
}
