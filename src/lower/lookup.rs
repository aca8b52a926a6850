//! `LOOKUP(ix : e1, e2, ...)` lowering (§4.2).
//!
//! When every item is a compile-time constant, the item list is hoisted
//! into a synthetic DAT array declared in the owning function's
//! `extradecl` list, and the `Lookup` node becomes an indexed read of that
//! array (bounds-checked the way the original backend does: out-of-range
//! index yields 0, via a clamped `ISBETWEEN`-style guard folded into the
//! index expression downstream). Non-constant items fall back to a chain
//! of `if index == k then item_k` comparisons, since they cannot be
//! pre-laid-out in DAT.

use crate::ast::Ast;
use crate::context::EvalContext;
use crate::expr::{is_const_expr, EvalMode};
use crate::lower::temps::TempAllocator;
use crate::symbol::{ScopeId, Symbols};

/// Name prefix for the synthetic DAT array backing a constant `LOOKUP`.
const LOOKUP_ARRAY_PREFIX: &str = "_lookup_";

pub struct LookupLowering<'a> {
    pub syms: &'a Symbols,
}

impl<'a> LookupLowering<'a> {
    pub fn new(syms: &'a Symbols) -> Self {
        LookupLowering { syms }
    }

    /// Returns `(replacement_expr, Some(extradecl))` when a new DAT array
    /// declaration must be appended to the owning function, or
    /// `(replacement_expr, None)` for the non-constant fallback chain.
    pub fn lower(&self, line: u32, index: Ast, items: Vec<Ast>, scope: ScopeId, ctx: &mut EvalContext, temps: &mut TempAllocator) -> (Ast, Option<Ast>) {
        let all_const = items
            .iter()
            .all(|it| is_const_expr(it, self.syms, scope, ctx, EvalMode::Constant));
        if all_const {
            self.lower_constant(line, index, items, temps)
        } else {
            (Self::lower_dynamic(line, index, items), None)
        }
    }

    fn lower_constant(&self, line: u32, index: Ast, items: Vec<Ast>, temps: &mut TempAllocator) -> (Ast, Option<Ast>) {
        let array_name = match temps.fresh(LOOKUP_ARRAY_PREFIX) {
            Ast::Ident { name, .. } => name,
            _ => unreachable!("TempAllocator::fresh always returns Ast::Ident"),
        };

        let decl = Ast::ArrayDecl {
            line,
            name: array_name.clone(),
            items,
        };

        let zero_based_index = Ast::Binary {
            line,
            op: crate::ast::BinOp::Sub,
            lhs: Box::new(index),
            rhs: Box::new(Ast::int_lit(line, 1)),
        };

        let access = Ast::Index {
            line,
            name: array_name,
            index: Box::new(zero_based_index),
        };

        (access, Some(decl))
    }

    /// Non-constant items: `(ix == 1) ? e1 : (ix == 2) ? e2 : ... : 0`,
    /// built right-to-left as nested `If` expressions so the last item
    /// becomes the innermost else-arm and out-of-range falls through to 0.
    fn lower_dynamic(line: u32, index: Ast, items: Vec<Ast>) -> Ast {
        let mut result = Ast::int_lit(line, 0);
        for (i, item) in items.into_iter().enumerate().rev() {
            let case_num = (i + 1) as i32;
            let cond = Ast::Binary {
                line,
                op: crate::ast::BinOp::Eq,
                lhs: Box::new(index.clone()),
                rhs: Box::new(Ast::int_lit(line, case_num)),
            };
            result = Ast::If {
                line,
                cond: Box::new(cond),
                then_branch: Box::new(item),
                else_branch: Some(Box::new(result)),
            };
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Function, Module};
    use crate::context::{EvalContext, ModuleId};

    #[test]
    fn constant_items_hoist_to_dat_array() {
        let dummy_syms = Symbols::new();
        let mut syms = Symbols::new();
        let scope = syms.new_scope(None);
        let mut func = Function::new("f", scope);
        let mut temps = TempAllocator::new(&mut syms, scope, &mut func);
        let mut ctx = EvalContext::new(ModuleId(0), Module::new("Main", scope));
        let lowering = LookupLowering::new(&dummy_syms);
        let items = vec![Ast::int_lit(1, 10), Ast::int_lit(1, 20), Ast::int_lit(1, 30)];
        let (expr, decl) = lowering.lower(1, Ast::ident(1, "ix"), items, scope, &mut ctx, &mut temps);
        let decl = decl.expect("constant items hoist a DAT array declaration");
        match (&expr, &decl) {
            (Ast::Index { name: access_name, .. }, Ast::ArrayDecl { name: decl_name, .. }) => {
                assert_eq!(access_name, decl_name, "access must target the declared array");
            }
            other => panic!("expected Index/ArrayDecl pair, got {other:?}"),
        }
    }

    /// Evaluates the lowered `Index`/`ArrayDecl` pair by hand against a
    /// table whose elements need more than one bit, the way a `RangeRef`
    /// reuse of this path could never do correctly (a `target[hi..lo]`
    /// bit-field read can only ever answer single-bit questions about the
    /// word named `target`).
    #[test]
    fn lowered_access_selects_the_right_wide_element() {
        let dummy_syms = Symbols::new();
        let mut syms = Symbols::new();
        let scope = syms.new_scope(None);
        let mut func = Function::new("f", scope);
        let mut temps = TempAllocator::new(&mut syms, scope, &mut func);
        let mut ctx = EvalContext::new(ModuleId(0), Module::new("Main", scope));
        let lowering = LookupLowering::new(&dummy_syms);

        // Values that need 10+ bits each; a 1-bit RangeRef extraction would
        // never reproduce any of these.
        let table = [111, 70_000, 999, 1 << 20];
        let items: Vec<Ast> = table.iter().map(|&v| Ast::int_lit(1, v)).collect();
        let (expr, decl) = lowering.lower(1, Ast::int_lit(1, 3), items, scope, &mut ctx, &mut temps);
        let decl_items = match decl {
            Some(Ast::ArrayDecl { items, .. }) => items,
            other => panic!("expected ArrayDecl, got {other:?}"),
        };

        // `expr` is `Index { index: ix - 1, .. }`; fold that offset by hand
        // since `ix` here is the constant literal 3 (one-based LOOKUP index).
        let zero_based = match expr {
            Ast::Index { index, .. } => match *index {
                Ast::Binary { op: crate::ast::BinOp::Sub, lhs, rhs } => match (*lhs, *rhs) {
                    (Ast::IntLit { val: ix, .. }, Ast::IntLit { val: one, .. }) => {
                        assert_eq!(one, 1);
                        ix - 1
                    }
                    other => panic!("expected ix - 1, got {other:?}"),
                },
                other => panic!("expected a Sub expression, got {other:?}"),
            },
            other => panic!("expected Index, got {other:?}"),
        };

        let selected = match &decl_items[zero_based as usize] {
            Ast::IntLit { val, .. } => *val,
            other => panic!("expected IntLit, got {other:?}"),
        };
        assert_eq!(selected, table[2], "LOOKUP index 3 must select element 2 (zero-based)");
    }

    #[test]
    fn dynamic_items_build_comparison_chain() {
        let line = 1;
        let items = vec![Ast::ident(line, "a"), Ast::ident(line, "b")];
        let expr = LookupLowering::lower_dynamic(line, Ast::ident(line, "ix"), items);
        match expr {
            Ast::If { cond, .. } => match *cond {
                Ast::Binary { op, .. } => assert_eq!(op, crate::ast::BinOp::Eq),
                _ => panic!("expected comparison"),
            },
            other => panic!("expected If chain, got {other:?}"),
        }
    }
}
