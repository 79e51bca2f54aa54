//! `excise_errors` holds the diagnostics shared by every `excise` crate.
//!
//! Each error that a user can act on carries a code of kind `E...` (e.g.
//! `E007`). Error types themselves are declared next to the code that raises
//! them, with [`thiserror::Error`] and [`miette::Diagnostic`]; this crate owns
//! the *explanations*. When an error has a code, it can be further explained
//! with `excise --explain E007`, à la `rustc`. The detailed diagnostics are
//! also part of the documentation itself, check for example
//! [`Diagnostics::E007`].

#![deny(unused)]
#![deny(warnings)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

mod error_codes;

#[cfg(doc)]
pub use error_codes::Diagnostics;
#[cfg(feature = "diagnostics")]
pub use error_codes::DIAGNOSTICS;
use miette::Diagnostic;
pub use miette::Result;
use thiserror::Error;

/// Error type for this crate.
///
/// The major interest of this type is its `Self::explain` method that can be
/// used to fetch the diagnostic of a particular error code.
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    /// The given error code is invalid.
    #[error("`{0}` is not a valid error code.")]
    #[diagnostic(
        code(E000),
        help(
            "Did you mistype the error code? The pattern is `E[0-9]{{3}}`, i.e. an `E` \
             followed by 3 digits, such as `E000`."
        )
    )]
    InvalidCode(String),
}

impl Error {
    /// Given a specific error code, this method returns the associated
    /// diagnostic, if the error exists.
    ///
    /// ```
    /// use excise_errors::Error;
    ///
    /// # fn main() {
    /// // Explain a valid error.
    /// assert!(Error::explain("E000").is_ok());
    ///
    /// // Explain an invalid error.
    /// assert!(Error::explain("oops").is_err());
    /// # }
    /// ```
    #[cfg(feature = "diagnostics")]
    pub fn explain(error_code: &str) -> Result<&'static str, Self> {
        DIAGNOSTICS
            .iter()
            .find_map(
                |(current_error_code, diagnostic)| {
                    if *current_error_code == error_code {
                        Some(*diagnostic)
                    } else {
                        None
                    }
                },
            )
            .ok_or_else(|| Self::InvalidCode(error_code.to_owned()))
    }
}
