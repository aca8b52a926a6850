//! Post-effect lowering (§4.2): `x~` and `x~~` mean "yield the old value,
//! then assign 0 or -1". At statement level the old value is discarded and
//! the assignment emitted directly; otherwise the old value is preserved
//! through a hidden temp: `(tmp = x, x = target, tmp)`.

use crate::ast::Ast;
use crate::lower::temps::TempAllocator;

fn assign(line: u32, lhs: Ast, rhs: Ast) -> Ast {
    Ast::Assign {
        line,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

/// Lowers `target~` (`assign_minus_one == false`) or `target~~`
/// (`== true`). `at_statement_level` discards the old value.
pub fn lower_post_effect(line: u32, target: Ast, assign_minus_one: bool, at_statement_level: bool, temps: &mut TempAllocator) -> Ast {
    let new_val = Ast::int_lit(line, if assign_minus_one { -1 } else { 0 });

    if at_statement_level {
        return assign(line, target, new_val);
    }

    let tmp = temps.fresh("_post_");
    Ast::Block {
        line,
        stmts: vec![
            assign(line, tmp.clone(), target.clone()),
            assign(line, target, new_val),
            tmp,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Function;
    use crate::symbol::Symbols;

    #[test]
    fn statement_level_discards_old_value() {
        let mut syms = Symbols::new();
        let scope = syms.new_scope(None);
        let mut func = Function::new("f", scope);
        let mut temps = TempAllocator::new(&mut syms, scope, &mut func);
        let lowered = lower_post_effect(1, Ast::ident(1, "x"), false, true, &mut temps);
        match lowered {
            Ast::Assign { rhs, .. } => assert!(matches!(*rhs, Ast::IntLit { val: 0, .. })),
            other => panic!("expected a bare assignment, got {other:?}"),
        }
    }

    #[test]
    fn expression_level_preserves_old_value() {
        let mut syms = Symbols::new();
        let scope = syms.new_scope(None);
        let mut func = Function::new("f", scope);
        let mut temps = TempAllocator::new(&mut syms, scope, &mut func);
        let lowered = lower_post_effect(1, Ast::ident(1, "x"), true, false, &mut temps);
        match lowered {
            Ast::Block { stmts, .. } => assert_eq!(stmts.len(), 3),
            other => panic!("expected a 3-statement sequence, got {other:?}"),
        }
    }
}
