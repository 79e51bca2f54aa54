#[cfg(feature = "fancy-errors")]
use miette::{set_hook, MietteHandlerOpts};
use miette::{Diagnostic, InstallError};
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub(crate) enum Error {
    #[error("The argument `{0}` contains invalid Unicode data.")]
    InvalidArgumentEncoding(String),

    #[error("The program name is missing from the command-line.")]
    ProgramNameIsMissing,

    #[error("I was not able to read the command-line properly:\n{0}")]
    #[diagnostic(code(E001), help("See the command-line usage with `excise --help`."))]
    CommandLine(String),

    #[error("I was not able to install the error reporter.")]
    Install(#[from] InstallError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Explain(#[from] excise_errors::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Diff(#[from] excise_differ::Error),
}

impl Error {
    /// Map the error onto the process exit code: 2 for unreconcilable
    /// differences between the two objects, 1 for everything else.
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Self::Diff(error) => error.exit_code(),
            _ => 1,
        }
    }

    pub(crate) fn install_and_configure() -> Result<(), InstallError> {
        #[cfg(feature = "fancy-errors")]
        set_hook(Box::new(|_| {
            Box::new(
                MietteHandlerOpts::new()
                    .with_cause_chain()
                    .footer(
                        "For more information about an error, try \
                        `excise --explain <error>` where `<error>` \
                        has the `E[0-9]{{3}}` pattern."
                            .to_string(),
                    )
                    .width(85)
                    .terminal_links(false)
                    .build(),
            )
        }))?;

        Ok(())
    }

    pub(crate) fn explain(error_code: &str) -> Result<&'static str, excise_errors::Error> {
        excise_errors::Error::explain(error_code)
    }
}
