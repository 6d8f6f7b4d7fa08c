//! Rust source front end
//!
//! Parses with `syn` and renders mutated files through `prettyplease`.

use std::path::Path;

use crate::error::{MutationError, Result};
use crate::frontend::{MutationSite, SourceFrontEnd};
use crate::matcher::collect_sites;
use crate::mutator::SiteRewriter;

/// Generate source code from AST
pub fn generate_source(ast: &syn::File) -> String {
    prettyplease::unparse(ast)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RustFrontEnd;

impl SourceFrontEnd for RustFrontEnd {
    type Ast = syn::File;

    fn accepts(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "rs")
    }

    fn parse(&self, path: &Path, source: &str) -> Result<syn::File> {
        syn::parse_file(source).map_err(|e| MutationError::ParseError {
            file: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    fn mutation_sites(&self, ast: &syn::File) -> Vec<MutationSite> {
        collect_sites(ast)
    }

    fn apply(&self, ast: &syn::File, site: &MutationSite) -> Result<String> {
        let mut mutated = ast.clone();
        SiteRewriter::apply(&mut mutated, site)?;
        Ok(generate_source(&mutated))
    }
}
