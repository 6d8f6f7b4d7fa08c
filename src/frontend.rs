//! Language front end contract
//!
//! The engine is language-agnostic: it only needs to parse files, enumerate mutation
//! sites in a stable order and render one site at a time back to source text.

use std::path::Path;

use crate::error::Result;
use crate::mutant::{MutatorKind, SourceSpan};

/// A single place in a file where a mutant can be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationSite {
    /// Position in the enumeration order of its file
    pub index: usize,
    pub kind: MutatorKind,
    pub span: SourceSpan,
    pub original: String,
    pub replacement: String,
}

pub trait SourceFrontEnd {
    type Ast;

    /// Whether files at `path` belong to this front end
    fn accepts(&self, path: &Path) -> bool;

    fn parse(&self, path: &Path, source: &str) -> Result<Self::Ast>;

    /// Every site in the file, always in the same order for the same source
    fn mutation_sites(&self, ast: &Self::Ast) -> Vec<MutationSite>;

    /// Render the whole file with exactly `site` applied
    fn apply(&self, ast: &Self::Ast, site: &MutationSite) -> Result<String>;
}
