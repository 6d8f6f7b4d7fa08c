//! Mutation site discovery for Rust sources
//!
//! Sites are found by a pre-order walk over every expression outside test code. The
//! same walk order is used by [`crate::mutator::SiteRewriter`], so a site index
//! identifies one expression/replacement pair for as long as the source is unchanged.

use proc_macro2::{Span, TokenTree};
use quote::ToTokens;
use syn::spanned::Spanned;
use syn::visit::Visit;
use syn::{BinOp, Expr, Lit, LitBool, LitStr, Meta, UnOp};

use crate::frontend::MutationSite;
use crate::mutant::{MutatorKind, SourceSpan};

/// Replacement used for empty string literals
pub const EMPTY_STRING_REPLACEMENT: &str = "Stryker was here!";

/// One way of mutating an expression
#[derive(Debug, Clone)]
pub struct Candidate {
    pub kind: MutatorKind,
    pub replacement: Expr,
}

/// Every mutation applicable to `expr` itself (children excluded), in fixed order
pub fn candidates(expr: &Expr) -> Vec<Candidate> {
    match expr {
        Expr::Binary(binary) => binop_swap(&binary.op)
            .map(|(kind, op)| {
                let mut mutated = binary.clone();
                mutated.op = op;
                Candidate {
                    kind,
                    replacement: Expr::Binary(mutated),
                }
            })
            .into_iter()
            .collect(),

        Expr::Unary(unary) if matches!(unary.op, UnOp::Neg(_) | UnOp::Not(_)) => vec![Candidate {
            kind: MutatorKind::Unary,
            replacement: (*unary.expr).clone(),
        }],

        Expr::Lit(lit) => match &lit.lit {
            Lit::Bool(b) => {
                let mut mutated = lit.clone();
                mutated.lit = Lit::Bool(LitBool::new(!b.value, b.span));
                vec![Candidate {
                    kind: MutatorKind::Boolean,
                    replacement: Expr::Lit(mutated),
                }]
            }
            Lit::Str(s) => {
                let value = if s.value().is_empty() {
                    EMPTY_STRING_REPLACEMENT
                } else {
                    ""
                };
                let mut mutated = lit.clone();
                mutated.lit = Lit::Str(LitStr::new(value, s.span()));
                vec![Candidate {
                    kind: MutatorKind::String,
                    replacement: Expr::Lit(mutated),
                }]
            }
            _ => Vec::new(),
        },

        Expr::MethodCall(call) => method_swap(&call.method.to_string())
            .map(|(kind, name)| {
                let mut mutated = call.clone();
                mutated.method = syn::Ident::new(name, call.method.span());
                Candidate {
                    kind,
                    replacement: Expr::MethodCall(mutated),
                }
            })
            .into_iter()
            .collect(),

        _ => Vec::new(),
    }
}

fn binop_swap(op: &BinOp) -> Option<(MutatorKind, BinOp)> {
    use MutatorKind::{Arithmetic, Assignment, Equality, Logical};

    let swapped = match op {
        BinOp::Add(_) => (Arithmetic, BinOp::Sub(Default::default())),
        BinOp::Sub(_) => (Arithmetic, BinOp::Add(Default::default())),
        BinOp::Mul(_) => (Arithmetic, BinOp::Div(Default::default())),
        BinOp::Div(_) => (Arithmetic, BinOp::Mul(Default::default())),
        BinOp::Rem(_) => (Arithmetic, BinOp::Mul(Default::default())),

        BinOp::Lt(_) => (Equality, BinOp::Le(Default::default())),
        BinOp::Le(_) => (Equality, BinOp::Lt(Default::default())),
        BinOp::Gt(_) => (Equality, BinOp::Ge(Default::default())),
        BinOp::Ge(_) => (Equality, BinOp::Gt(Default::default())),
        BinOp::Eq(_) => (Equality, BinOp::Ne(Default::default())),
        BinOp::Ne(_) => (Equality, BinOp::Eq(Default::default())),

        BinOp::And(_) => (Logical, BinOp::Or(Default::default())),
        BinOp::Or(_) => (Logical, BinOp::And(Default::default())),
        BinOp::BitAnd(_) => (Logical, BinOp::BitOr(Default::default())),
        BinOp::BitOr(_) => (Logical, BinOp::BitAnd(Default::default())),
        BinOp::BitXor(_) => (Logical, BinOp::BitAnd(Default::default())),

        BinOp::AddAssign(_) => (Assignment, BinOp::SubAssign(Default::default())),
        BinOp::SubAssign(_) => (Assignment, BinOp::AddAssign(Default::default())),
        BinOp::MulAssign(_) => (Assignment, BinOp::DivAssign(Default::default())),
        BinOp::DivAssign(_) => (Assignment, BinOp::MulAssign(Default::default())),

        _ => return None,
    };
    Some(swapped)
}

fn method_swap(method: &str) -> Option<(MutatorKind, &'static str)> {
    use MutatorKind::{Linq, Math, StringMethod};

    let swapped = match method {
        "any" => (Linq, "all"),
        "all" => (Linq, "any"),
        "min" => (Linq, "max"),
        "max" => (Linq, "min"),
        "first" => (Linq, "last"),
        "last" => (Linq, "first"),
        "skip" => (Linq, "take"),
        "take" => (Linq, "skip"),

        "floor" => (Math, "ceil"),
        "ceil" => (Math, "floor"),
        "sin" => (Math, "cos"),
        "cos" => (Math, "sin"),

        "to_uppercase" => (StringMethod, "to_lowercase"),
        "to_lowercase" => (StringMethod, "to_uppercase"),
        "trim_start" => (StringMethod, "trim_end"),
        "trim_end" => (StringMethod, "trim_start"),
        "starts_with" => (StringMethod, "ends_with"),
        "ends_with" => (StringMethod, "starts_with"),

        _ => return None,
    };
    Some(swapped)
}

/// `#[test]` functions and `#[cfg(test)]` modules are never mutated
pub(crate) fn is_test_code(attrs: &[syn::Attribute]) -> bool {
    attrs.iter().any(|attr| match &attr.meta {
        Meta::Path(path) => path.is_ident("test"),
        Meta::List(list) if list.path.is_ident("cfg") => list
            .tokens
            .clone()
            .into_iter()
            .any(|t| matches!(t, TokenTree::Ident(ident) if ident == "test")),
        _ => false,
    })
}

/// Find every mutation site outside test code, in walk order
pub fn collect_sites(ast: &syn::File) -> Vec<MutationSite> {
    let mut collector = SiteCollector { sites: Vec::new() };
    collector.visit_file(ast);
    collector.sites
}

struct SiteCollector {
    sites: Vec<MutationSite>,
}

impl<'ast> Visit<'ast> for SiteCollector {
    // Doc strings are attribute expressions; leave them alone.
    fn visit_attribute(&mut self, _attr: &'ast syn::Attribute) {}

    fn visit_item_fn(&mut self, func: &'ast syn::ItemFn) {
        if !is_test_code(&func.attrs) {
            syn::visit::visit_item_fn(self, func);
        }
    }

    fn visit_impl_item_fn(&mut self, func: &'ast syn::ImplItemFn) {
        if !is_test_code(&func.attrs) {
            syn::visit::visit_impl_item_fn(self, func);
        }
    }

    fn visit_item_mod(&mut self, module: &'ast syn::ItemMod) {
        if !is_test_code(&module.attrs) {
            syn::visit::visit_item_mod(self, module);
        }
    }

    fn visit_expr(&mut self, expr: &'ast Expr) {
        let span = source_span(expr.span());
        let original = expr.to_token_stream().to_string();
        for candidate in candidates(expr) {
            self.sites.push(MutationSite {
                index: self.sites.len(),
                kind: candidate.kind,
                span,
                original: original.clone(),
                replacement: candidate.replacement.to_token_stream().to_string(),
            });
        }
        syn::visit::visit_expr(self, expr);
    }
}

fn source_span(span: Span) -> SourceSpan {
    let start = span.start();
    let end = span.end();
    SourceSpan {
        start_line: start.line,
        start_column: start.column + 1, // 1-indexed
        end_line: end.line,
        end_column: end.column + 1,
    }
}
