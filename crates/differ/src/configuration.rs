use std::path::PathBuf;

use crate::Differ;

/// Everything the pipeline needs to know, as assembled by the command line.
#[derive(Debug)]
pub struct Configuration {
    /// The base object.
    pub(crate) original_file: PathBuf,
    /// The patched object.
    pub(crate) patched_file: PathBuf,
    /// Where the minimized object goes.
    pub(crate) output_file: PathBuf,
    /// Whether to write a `<output>.inventory` companion file.
    pub(crate) inventory: bool,
    /// Whether twin section headers must agree on `sh_link`.
    ///
    /// Off by default: `sh_link` carries a *section index* (e.g. from a
    /// relocation section to the symbol table), and section indices
    /// legitimately renumber when a function is added or removed — the same
    /// reason relocation entries are compared structurally rather than by
    /// bytes. The strict comparison stays available for inputs known to
    /// share a layout.
    pub(crate) compare_link: bool,
}

impl Configuration {
    /// A configuration with the default policies: no inventory file,
    /// renumbering-tolerant `sh_link` comparison.
    pub fn new(original_file: PathBuf, patched_file: PathBuf, output_file: PathBuf) -> Self {
        Self { original_file, patched_file, output_file, inventory: false, compare_link: false }
    }

    /// Request the `<output>.inventory` companion file.
    pub fn with_inventory(mut self, inventory: bool) -> Self {
        self.inventory = inventory;

        self
    }

    /// Control the `sh_link` comparison policy.
    pub fn with_compare_link(mut self, compare_link: bool) -> Self {
        self.compare_link = compare_link;

        self
    }

    /// Build the differ.
    pub fn differ(self) -> Differ {
        Differ::with_configuration(self)
    }
}
