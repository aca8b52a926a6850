//! Case-statement scrutinee hoisting (§4.2): the scrutinee is hoisted into
//! a fresh hidden temp unless it is already a bare identifier or an
//! assignment whose result can be read back cheaply, so that each arm test
//! can refer to it without re-evaluating a side-effecting expression.
//! Range arms (`CaseArm::is_range`) compile to `ISBETWEEN`.

use crate::ast::{Ast, BinOp, CaseArm};
use crate::lower::temps::TempAllocator;

/// Returns `true` when `scrutinee` is already cheap to re-read (a bare
/// identifier), matching the original's "skip the hidden temp for a
/// simple variable" special case.
fn is_already_cheap(scrutinee: &Ast) -> bool {
    matches!(scrutinee, Ast::Ident { .. })
}

/// Lowers a `Case` node: hoists the scrutinee if needed, then rewrites
/// each arm's test into an explicit comparison (`==` for a single value,
/// `ISBETWEEN` for a range) against the hoisted value.
pub fn lower_case(line: u32, scrutinee: Ast, arms: Vec<CaseArm>, temps: &mut TempAllocator) -> Ast {
    let (hoist, scrutinee_ref) = if is_already_cheap(&scrutinee) {
        (None, scrutinee)
    } else {
        let tmp = temps.fresh("_case_");
        let assign = Ast::Assign {
            line,
            lhs: Box::new(tmp.clone()),
            rhs: Box::new(scrutinee),
        };
        (Some(assign), tmp)
    };

    let mut chain = Ast::Block { line, stmts: Vec::new() };
    for arm in arms.into_iter().rev() {
        let cond = if arm.is_range {
            match *arm.test {
                Ast::Range { hi, lo, .. } => Ast::Binary {
                    line,
                    op: BinOp::IsBetween,
                    lhs: Box::new(scrutinee_ref.clone()),
                    rhs: Box::new(Ast::Range { line, hi, lo }),
                },
                other => Ast::Binary {
                    line,
                    op: BinOp::Eq,
                    lhs: Box::new(scrutinee_ref.clone()),
                    rhs: Box::new(other),
                },
            }
        } else {
            Ast::Binary {
                line,
                op: BinOp::Eq,
                lhs: Box::new(scrutinee_ref.clone()),
                rhs: arm.test,
            }
        };
        chain = Ast::If {
            line,
            cond: Box::new(cond),
            then_branch: arm.body,
            else_branch: Some(Box::new(chain)),
        };
    }

    match hoist {
        Some(assign) => Ast::Block { line, stmts: vec![assign, chain] },
        None => chain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Function;
    use crate::symbol::Symbols;

    #[test]
    fn bare_identifier_scrutinee_is_not_hoisted() {
        let mut syms = Symbols::new();
        let scope = syms.new_scope(None);
        let mut func = Function::new("f", scope);
        let mut temps = TempAllocator::new(&mut syms, scope, &mut func);
        let arms = vec![CaseArm {
            is_range: false,
            test: Box::new(Ast::int_lit(1, 1)),
            body: Box::new(Ast::int_lit(1, 100)),
        }];
        let lowered = lower_case(1, Ast::ident(1, "x"), arms, &mut temps);
        assert!(matches!(lowered, Ast::If { .. }));
    }

    #[test]
    fn complex_scrutinee_is_hoisted_to_temp() {
        let mut syms = Symbols::new();
        let scope = syms.new_scope(None);
        let mut func = Function::new("f", scope);
        let mut temps = TempAllocator::new(&mut syms, scope, &mut func);
        let scrutinee = Ast::Binary {
            line: 1,
            op: BinOp::Add,
            lhs: Box::new(Ast::ident(1, "x")),
            rhs: Box::new(Ast::int_lit(1, 1)),
        };
        let arms = vec![CaseArm {
            is_range: false,
            test: Box::new(Ast::int_lit(1, 1)),
            body: Box::new(Ast::int_lit(1, 100)),
        }];
        let lowered = lower_case(1, scrutinee, arms, &mut temps);
        match lowered {
            Ast::Block { stmts, .. } => {
                assert_eq!(stmts.len(), 2);
                assert!(matches!(stmts[0], Ast::Assign { .. }));
            }
            other => panic!("expected hoisted-assignment block, got {other:?}"),
        }
    }

    #[test]
    fn range_arm_lowers_to_isbetween() {
        let mut syms = Symbols::new();
        let scope = syms.new_scope(None);
        let mut func = Function::new("f", scope);
        let mut temps = TempAllocator::new(&mut syms, scope, &mut func);
        let arms = vec![CaseArm {
            is_range: true,
            test: Box::new(Ast::Range {
                line: 1,
                hi: Box::new(Ast::int_lit(1, 10)),
                lo: Box::new(Ast::int_lit(1, 1)),
            }),
            body: Box::new(Ast::int_lit(1, 100)),
        }];
        let lowered = lower_case(1, Ast::ident(1, "x"), arms, &mut temps);
        match lowered {
            Ast::If { cond, .. } => match *cond {
                Ast::Binary { op, .. } => assert_eq!(op, BinOp::IsBetween),
                other => panic!("expected binary condition, got {other:?}"),
            },
            other => panic!("expected If, got {other:?}"),
        }
    }
}
