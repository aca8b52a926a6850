//! Counting-repeat lowering (§4.2).
//!
//! `REPEAT var FROM a TO b STEP s BODY` is rewritten into an explicit
//! init/condition/step triple. The bare `REPEAT n BODY` form (no loop
//! variable) has back-end-dependent iteration policy (§4.2, invariant 4):
//! the C/C++ back-end counts up from zero, the assembly back-ends count
//! down to zero from `n` — which is also why a non-positive `n` iterates
//! either zero times (C/C++) or, read as an unsigned count, a very large
//! number of times (assembly) — this is a faithfully-reproduced Spin
//! footgun, not a defect introduced here.

use crate::ast::{Ast, BinOp, ForKind, ForLoop, RepeatCounting};
use crate::context::EvalContext;
use crate::expr::{eval_relaxed, EvalMode};
use crate::lower::temps::TempAllocator;
use crate::symbol::{ScopeId, Symbols};

/// Which back-end's policy governs the bare `REPEAT n BODY` form (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    CLike,
    Asm,
}

fn bin(line: u32, op: BinOp, lhs: Ast, rhs: Ast) -> Ast {
    Ast::Binary {
        line,
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn assign(line: u32, lhs: Ast, rhs: Ast) -> Ast {
    Ast::Assign {
        line,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn try_const(ast: &Ast, syms: &Symbols, scope: ScopeId, ctx: &mut EvalContext) -> Option<i32> {
    eval_relaxed(ast, syms, scope, ctx, EvalMode::Constant).map(|v| v.val)
}

/// Detects the `N - 1` shape so the generated test can be `i < N` instead
/// of `i <= N - 1` (§4.2).
fn strip_minus_one(ast: &Ast) -> Option<&Ast> {
    match ast {
        Ast::Binary {
            op: BinOp::Sub,
            lhs,
            rhs,
            ..
        } => match rhs.as_ref() {
            Ast::IntLit { val: 1, .. } => Some(lhs.as_ref()),
            _ => None,
        },
        _ => None,
    }
}

pub fn lower_counting_repeat(
    r: RepeatCounting,
    backend: Backend,
    syms: &Symbols,
    scope: ScopeId,
    ctx: &mut EvalContext,
    temps: &mut TempAllocator,
) -> ForLoop {
    let RepeatCounting {
        line, var, from, to, step, body,
    } = r;

    let Some(to) = to else {
        return lower_bare_count(line, *from, *body, backend, temps);
    };

    let from_c = try_const(&from, syms, scope, ctx);
    let to_c = try_const(&to, syms, scope, ctx);
    let step_c = step.as_deref().and_then(|s| try_const(s, syms, scope, ctx));

    if let (Some(fromv), Some(tov)) = (from_c, to_c) {
        if step.is_none() || step_c.is_some() {
            return lower_constant_bounds(line, *var, fromv, tov, step_c, &to, *body, scope);
        }
    }

    lower_runtime_bounds(line, *var, *from, *to, step, *body, temps)
}

fn lower_bare_count(line: u32, n: Ast, body: Ast, backend: Backend, temps: &mut TempAllocator) -> ForLoop {
    let idx = temps.fresh("_idx_");
    match backend {
        Backend::CLike => ForLoop {
            kind: ForKind::For,
            line,
            init: Some(Box::new(assign(line, idx.clone(), Ast::int_lit(line, 0)))),
            cond: Box::new(bin(line, BinOp::Lt, idx.clone(), n)),
            step: Box::new(assign(line, idx.clone(), bin(line, BinOp::Add, idx, Ast::int_lit(line, 1)))),
            body: Box::new(body),
        },
        Backend::Asm => ForLoop {
            kind: ForKind::For,
            line,
            init: Some(Box::new(assign(line, idx.clone(), n))),
            cond: Box::new(bin(line, BinOp::Ne, idx.clone(), Ast::int_lit(line, 0))),
            step: Box::new(assign(line, idx.clone(), bin(line, BinOp::Sub, idx, Ast::int_lit(line, 1)))),
            body: Box::new(body),
        },
    }
}

fn lower_constant_bounds(
    line: u32,
    var: Ast,
    fromv: i32,
    tov: i32,
    step_c: Option<i32>,
    to_ast: &Ast,
    body: Ast,
    _scope: ScopeId,
) -> ForLoop {
    let descending = fromv > tov;
    // The literal bounds decide direction at compile time; the step's
    // *magnitude* is honored but its sign is normalised to match that
    // direction (§4.2: "the direction is decided at compile time").
    let magnitude = step_c.map(|s| s.unsigned_abs() as i32).unwrap_or(1).max(1);
    let step_val = if descending { -magnitude } else { magnitude };
    let iterations = if step_val == 0 {
        0
    } else {
        ((tov - fromv) / step_val).unsigned_abs() as i64 + 1
    };

    // `++`/`--` for step == +1/-1 (§4.2); otherwise an explicit `+= step`.
    let step_stmt = match step_val {
        1 => assign(line, var.clone(), bin(line, BinOp::Add, var.clone(), Ast::int_lit(line, 1))),
        -1 => assign(line, var.clone(), bin(line, BinOp::Sub, var.clone(), Ast::int_lit(line, 1))),
        s => assign(line, var.clone(), bin(line, BinOp::Add, var.clone(), Ast::int_lit(line, s))),
    };

    let cond = if !descending && step_val > 0 {
        if let Some(n_ast) = strip_minus_one(to_ast) {
            // `i < N` instead of `i <= N - 1`.
            bin(line, BinOp::Lt, var.clone(), n_ast.clone())
        } else {
            bin(line, BinOp::Le, var.clone(), Ast::int_lit(line, tov))
        }
    } else if descending && step_val == -1 && tov == 1 {
        // Counting down to 1: `i >= 1` becomes `i != 0`.
        bin(line, BinOp::Ne, var.clone(), Ast::int_lit(line, 0))
    } else if descending {
        bin(line, BinOp::Ge, var.clone(), Ast::int_lit(line, tov))
    } else {
        bin(line, BinOp::Le, var.clone(), Ast::int_lit(line, tov))
    };

    let init = assign(line, var.clone(), Ast::int_lit(line, fromv));
    let kind = if iterations >= 1 {
        ForKind::ForAtLeastOnce
    } else {
        ForKind::For
    };

    ForLoop {
        kind,
        line,
        init: Some(Box::new(init)),
        cond: Box::new(cond),
        step: Box::new(step_stmt),
        body: Box::new(body),
    }
}

fn lower_runtime_bounds(
    line: u32,
    var: Ast,
    from: Ast,
    to: Ast,
    step: Option<Box<Ast>>,
    body: Ast,
    temps: &mut TempAllocator,
) -> ForLoop {
    let start = temps.fresh("_start_");
    let limit = temps.fresh("_limit_");
    let step_local = temps.fresh("_step_");

    let step_init = step.map(|s| *s).unwrap_or_else(|| Ast::int_lit(line, 1));

    // Direction is decided at runtime: the step is negated when `from >
    // to` (§4.2: "the step variable is negated at runtime when from > to").
    let need_negate = bin(line, BinOp::Gt, start.clone(), limit.clone());
    let negate_step = assign(line, step_local.clone(), Ast::Unary {
        line,
        op: crate::ast::UnOp::Negate,
        operand: Box::new(step_local.clone()),
    });
    let abs_step_if_descending = Ast::If {
        line,
        cond: Box::new(bin(line, BinOp::LogicalAnd, need_negate, bin(line, BinOp::Gt, step_local.clone(), Ast::int_lit(line, 0)))),
        then_branch: Box::new(negate_step),
        else_branch: None,
    };

    let init_stmts = vec![
        assign(line, start.clone(), from),
        assign(line, limit.clone(), to),
        assign(line, step_local.clone(), step_init),
        abs_step_if_descending,
        assign(line, var.clone(), start),
    ];

    // Sentinel form avoids a sign-dependent comparison in the condition:
    // the loop always runs while `var != limit + step`.
    let sentinel = bin(line, BinOp::Add, limit, step_local.clone());
    let cond = bin(line, BinOp::Ne, var.clone(), sentinel);
    let step_stmt = assign(line, var.clone(), bin(line, BinOp::Add, var.clone(), step_local));

    ForLoop {
        kind: ForKind::For,
        line,
        init: Some(Box::new(Ast::Block { line, stmts: init_stmts })),
        cond: Box::new(cond),
        step: Box::new(step_stmt),
        body: Box::new(body),
    }
}
