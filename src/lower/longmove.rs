//! Small-longmove expansion (§4.2): `longmove(@dst, @src, n)` with a
//! literal `n <= 4` and both operands plain identifiers expands to `n`
//! scalar assignments found by successive field offset, rather than a
//! runtime copy loop. Expansion sets [`Module::volatile_variables`],
//! matching the original's conservative aliasing rule once raw addresses
//! have been taken.

use crate::ast::{Ast, Module};
use crate::symbol::{ScopeId, SymbolValue, Symbols};

/// Upper bound on the literal count eligible for scalar expansion.
const MAX_SMALL_LONGMOVE: i32 = 4;

/// Attempts the small-longmove rewrite; returns `None` when the shape
/// doesn't qualify (non-literal count, count out of range, or either
/// operand isn't a bare `@ident`), leaving the call to fall through to the
/// runtime `longmove` builtin unchanged.
pub fn try_lower_longmove(line: u32, dst: &Ast, src: &Ast, count: &Ast, syms: &Symbols, scope: ScopeId, module: &mut Module) -> Option<Ast> {
    let n = match count {
        Ast::IntLit { val, .. } => *val,
        _ => return None,
    };
    if n <= 0 || n > MAX_SMALL_LONGMOVE {
        return None;
    }

    let dst_name = addr_of_ident(dst)?;
    let src_name = addr_of_ident(src)?;

    let dst_base = symbol_offset(syms, scope, dst_name)?;
    let src_base = symbol_offset(syms, scope, src_name)?;

    let mut assigns = Vec::with_capacity(n as usize);
    for i in 0..n {
        let dst_field = syms.find_by_offset(scope, dst_base + i * 4)?;
        let src_field = syms.find_by_offset(scope, src_base + i * 4)?;
        assigns.push(Ast::Assign {
            line,
            lhs: Box::new(Ast::ident(line, dst_field.name.clone())),
            rhs: Box::new(Ast::ident(line, src_field.name.clone())),
        });
    }

    module.volatile_variables = true;
    Some(Ast::Block { line, stmts: assigns })
}

fn addr_of_ident(ast: &Ast) -> Option<&str> {
    match ast {
        Ast::AddrOf { target, .. } => match target.as_ref() {
            Ast::Ident { name, .. } => Some(name.as_str()),
            _ => None,
        },
        _ => None,
    }
}

fn symbol_offset(syms: &Symbols, scope: ScopeId, name: &str) -> Option<i32> {
    match &syms.lookup(scope, name)?.value {
        SymbolValue::Offset(o) => Some(*o),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{Symbol, SymbolKind};

    fn setup() -> (Symbols, ScopeId) {
        let mut syms = Symbols::new();
        let scope = syms.new_scope(None);
        for (name, off) in [("a0", 0), ("a1", 4), ("a2", 8), ("b0", 16), ("b1", 20), ("b2", 24)] {
            syms.insert(scope, Symbol::new(name, SymbolKind::LocalVar, SymbolValue::Offset(off)));
        }
        (syms, scope)
    }

    #[test]
    fn literal_three_word_move_expands_to_three_assigns() {
        let (syms, scope) = setup();
        let mut module = Module::new("Main", scope);
        let dst = Ast::AddrOf { line: 1, target: Box::new(Ast::ident(1, "b0")) };
        let src = Ast::AddrOf { line: 1, target: Box::new(Ast::ident(1, "a0")) };
        let count = Ast::int_lit(1, 3);
        let lowered = try_lower_longmove(1, &dst, &src, &count, &syms, scope, &mut module).unwrap();
        match lowered {
            Ast::Block { stmts, .. } => assert_eq!(stmts.len(), 3),
            other => panic!("expected 3-statement block, got {other:?}"),
        }
        assert!(module.volatile_variables);
    }

    #[test]
    fn count_above_cap_is_rejected() {
        let (syms, scope) = setup();
        let mut module = Module::new("Main", scope);
        let dst = Ast::AddrOf { line: 1, target: Box::new(Ast::ident(1, "b0")) };
        let src = Ast::AddrOf { line: 1, target: Box::new(Ast::ident(1, "a0")) };
        let count = Ast::int_lit(1, 5);
        assert!(try_lower_longmove(1, &dst, &src, &count, &syms, scope, &mut module).is_none());
    }

    #[test]
    fn non_literal_count_is_rejected() {
        let (syms, scope) = setup();
        let mut module = Module::new("Main", scope);
        let dst = Ast::AddrOf { line: 1, target: Box::new(Ast::ident(1, "b0")) };
        let src = Ast::AddrOf { line: 1, target: Box::new(Ast::ident(1, "a0")) };
        let count = Ast::ident(1, "n");
        assert!(try_lower_longmove(1, &dst, &src, &count, &syms, scope, &mut module).is_none());
    }
}
