//! AST mutation application
//!
//! Rewrites exactly one mutation site, found by replaying the walk that
//! [`crate::matcher::collect_sites`] performed.

use syn::visit_mut::VisitMut;

use crate::error::{MutationError, Result};
use crate::frontend::MutationSite;
use crate::matcher::{candidates, is_test_code};
use crate::mutant::MutatorKind;

/// Applies a single mutation to the AST
pub struct SiteRewriter {
    /// Site index to replace
    target: usize,
    expected_kind: MutatorKind,
    /// Candidates passed so far
    seen: usize,
    applied: Option<Result<()>>,
}

impl VisitMut for SiteRewriter {
    fn visit_attribute_mut(&mut self, _attr: &mut syn::Attribute) {}

    fn visit_item_fn_mut(&mut self, func: &mut syn::ItemFn) {
        if !is_test_code(&func.attrs) {
            syn::visit_mut::visit_item_fn_mut(self, func);
        }
    }

    fn visit_impl_item_fn_mut(&mut self, func: &mut syn::ImplItemFn) {
        if !is_test_code(&func.attrs) {
            syn::visit_mut::visit_impl_item_fn_mut(self, func);
        }
    }

    fn visit_item_mod_mut(&mut self, module: &mut syn::ItemMod) {
        if !is_test_code(&module.attrs) {
            syn::visit_mut::visit_item_mod_mut(self, module);
        }
    }

    fn visit_expr_mut(&mut self, expr: &mut syn::Expr) {
        if self.applied.is_some() {
            return;
        }

        let mut found = candidates(expr);
        if self.target < self.seen + found.len() {
            let candidate = found.swap_remove(self.target - self.seen);
            self.applied = Some(if candidate.kind == self.expected_kind {
                *expr = candidate.replacement;
                Ok(())
            } else {
                Err(MutationError::FailedToApply {
                    reason: format!(
                        "site {} is a {} mutation, expected {}",
                        self.target, candidate.kind, self.expected_kind
                    ),
                })
            });
            // Don't recurse into the replacement
            return;
        }
        self.seen += found.len();

        syn::visit_mut::visit_expr_mut(self, expr);
    }
}

impl SiteRewriter {
    /// Apply `site` to the AST in place
    pub fn apply(ast: &mut syn::File, site: &MutationSite) -> Result<()> {
        let mut rewriter = SiteRewriter {
            target: site.index,
            expected_kind: site.kind,
            seen: 0,
            applied: None,
        };

        rewriter.visit_file_mut(ast);

        rewriter.applied.unwrap_or_else(|| {
            Err(MutationError::FailedToApply {
                reason: format!("site {} not found during mutation", site.index),
            })
        })
    }
}
