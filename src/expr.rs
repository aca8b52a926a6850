//! Expression & type engine (§4.1, component C).
//!
//! Pure: folding never mutates the AST or the symbol table. Two entry
//! points cover the two reporting modes named in §7: [`eval_relaxed`]
//! (speculative, out-param-style: failure is just `None`) and
//! [`eval_strict`] (reports into a [`Diagnostics`] sink and returns `None`
//! on failure, continuing the pass).

use crate::ast::{Ast, BinOp, UnOp};
use crate::context::EvalContext;
use crate::error::Diagnostics;
use crate::symbol::{ScopeId, SymbolKind, SymbolValue, Symbols};
use crate::util::{decode, encode, float_as_int, int_as_float, reverse_bits};

/// An expression's folded value: a type tag plus its raw bit pattern,
/// float values reinterpreted from the same `i32` (§3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExprVal {
    pub ty: ExprTy,
    pub val: i32,
}

/// Just enough type information for constant folding to pick the int vs.
/// float operator table; the richer [`TypeNode`] lattice is for the
/// inference pass (§4.1's "Types" vs. the fold path's int/float split).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprTy {
    Int,
    Float,
}

impl ExprVal {
    pub fn int(val: i32) -> Self {
        ExprVal { ty: ExprTy::Int, val }
    }

    pub fn float(val: f32) -> Self {
        ExprVal {
            ty: ExprTy::Float,
            val: float_as_int(val),
        }
    }

    pub fn as_float(&self) -> f32 {
        int_as_float(self.val)
    }

    pub fn is_float(&self) -> bool {
        self.ty == ExprTy::Float
    }
}

/// Whether a label/identifier is being resolved for PASM numeric context
/// (word-address form) or ordinary constant-expression context (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    Constant,
    Pasm,
}

struct Eval<'a> {
    syms: &'a Symbols,
    ctx: &'a mut EvalContext,
    mode: EvalMode,
}

/// Speculative fold: never reports, just signals success/failure, matching
/// the "non-reporting mode (out-param `valid`)" of §7.
pub fn eval_relaxed(ast: &Ast, syms: &Symbols, scope: ScopeId, ctx: &mut EvalContext, mode: EvalMode) -> Option<ExprVal> {
    let mut e = Eval { syms, ctx, mode };
    e.eval(ast, scope)
}

/// Strict fold: reports a diagnostic and returns `None` on failure,
/// letting the caller continue the pass (§7).
pub fn eval_strict(
    ast: &Ast,
    syms: &Symbols,
    scope: ScopeId,
    ctx: &mut EvalContext,
    mode: EvalMode,
    diag: &mut Diagnostics,
) -> Option<ExprVal> {
    match eval_relaxed(ast, syms, scope, ctx, mode) {
        Some(v) => Some(v),
        None => {
            diag.error(Some(ast.line()), "expression is not a constant");
            None
        }
    }
}

/// Invariant 2 (§8): `is_const_expr(e) == true` iff strict evaluation of
/// `e` succeeds without increasing the error counter.
pub fn is_const_expr(ast: &Ast, syms: &Symbols, scope: ScopeId, ctx: &mut EvalContext, mode: EvalMode) -> bool {
    eval_relaxed(ast, syms, scope, ctx, mode).is_some()
}

impl<'a> Eval<'a> {
    fn eval(&mut self, ast: &Ast, scope: ScopeId) -> Option<ExprVal> {
        match ast {
            Ast::IntLit { val, .. } => Some(ExprVal::int(*val)),
            Ast::FloatLit { val, .. } => Some(ExprVal::float(*val)),
            Ast::Ident { name, .. } => self.eval_ident(name, scope),
            Ast::ConstRef { module, name, .. } => self.eval_const_ref(module, name),
            Ast::AddrOf { target, .. } => self.eval_addr_of(target, scope, false),
            Ast::AddrOfAbs { target, .. } => self.eval_addr_of(target, scope, true),
            Ast::Unary { op, operand, .. } => self.eval_unary(*op, operand, scope),
            Ast::Rev { val, bits, .. } => {
                let v = self.eval(val, scope)?;
                let n = self.eval(bits, scope)?;
                Some(ExprVal::int(reverse_bits(v.val, n.val as u32)))
            }
            Ast::Binary { op, lhs, rhs, .. } => self.eval_binary(*op, lhs, rhs, scope),
            _ => None,
        }
    }

    fn eval_ident(&mut self, name: &str, scope: ScopeId) -> Option<ExprVal> {
        let sym = self.syms.lookup(scope, name)?;
        match sym.kind {
            SymbolKind::Constant => match &sym.value {
                SymbolValue::ConstExpr(expr) => {
                    let expr = expr.clone();
                    self.eval(&expr, scope)
                }
                _ => None,
            },
            SymbolKind::FloatConstant => match &sym.value {
                SymbolValue::ConstExpr(expr) => {
                    let expr = expr.clone();
                    let v = self.eval(&expr, scope)?;
                    Some(ExprVal::float(v.as_float()))
                }
                _ => None,
            },
            SymbolKind::Label => match &sym.value {
                SymbolValue::Label(info) => {
                    if self.mode == EvalMode::Pasm {
                        if info.asmval % 4 != 0 {
                            return None;
                        }
                        Some(ExprVal::int(info.asmval >> 2))
                    } else {
                        // Unusable as an ordinary constant (§4.1).
                        None
                    }
                }
                _ => None,
            },
            _ => None,
        }
    }

    fn eval_const_ref(&mut self, module: &str, name: &str) -> Option<ExprVal> {
        let target = self.ctx.find_module_id_by_name(module)?;
        let mut guard = self.ctx.enter_module(target);
        let (objsyms, expr) = {
            let m = guard.ctx().module(target)?;
            let objsyms = m.objsyms;
            let sym = self.syms.lookup_local(objsyms, name)?;
            match &sym.value {
                SymbolValue::ConstExpr(expr) => (objsyms, expr.clone()),
                _ => return None,
            }
        };
        let mut inner = Eval {
            syms: self.syms,
            ctx: guard.ctx(),
            mode: self.mode,
        };
        inner.eval(&expr, objsyms)
        // `guard` drops here, restoring `current`/`curfunc` (§5, §9).
    }

    fn eval_addr_of(&mut self, target: &Ast, scope: ScopeId, absolute: bool) -> Option<ExprVal> {
        let name = match target {
            Ast::Ident { name, .. } => name,
            _ => return None,
        };
        let sym = self.syms.lookup(scope, name)?;
        let offset = match &sym.value {
            SymbolValue::Offset(o) => *o,
            SymbolValue::Label(info) => info.offset,
            _ => return None,
        };
        if !absolute {
            return Some(ExprVal::int(offset));
        }
        let dat_offset = self.ctx.current_module().dat_offset;
        if dat_offset < 0 {
            return None;
        }
        Some(ExprVal::int(offset + dat_offset as i32))
    }

    fn eval_unary(&mut self, op: UnOp, operand: &Ast, scope: ScopeId) -> Option<ExprVal> {
        let v = self.eval(operand, scope)?;
        if v.is_float() {
            let f = v.as_float();
            let r = match op {
                UnOp::Negate => -f,
                UnOp::Abs => f.abs(),
                UnOp::Sqrt => f.sqrt(),
                UnOp::BitNot => return Some(ExprVal::float(int_as_float(!float_as_int(f)))),
                UnOp::Encode => return Some(ExprVal::int(encode(float_as_int(f)))),
                UnOp::Decode => return Some(ExprVal::int(decode(float_as_int(f)))),
            };
            return Some(ExprVal::float(r));
        }
        let r = match op {
            UnOp::Negate => -v.val,
            UnOp::BitNot => !v.val,
            UnOp::Abs => v.val.wrapping_abs(),
            UnOp::Sqrt => (f32::sqrt(v.val as u32 as f32)) as u32 as i32,
            UnOp::Encode => encode(v.val),
            UnOp::Decode => decode(v.val),
        };
        Some(ExprVal::int(r))
    }

    fn eval_binary(&mut self, op: BinOp, lhs: &Ast, rhs: &Ast, scope: ScopeId) -> Option<ExprVal> {
        if op == BinOp::LogicalAnd || op == BinOp::LogicalOr {
            let l = self.eval(lhs, scope)?;
            let truthy = l.val != 0;
            return if op == BinOp::LogicalAnd {
                if !truthy {
                    Some(ExprVal::int(0))
                } else {
                    let r = self.eval(rhs, scope)?;
                    Some(ExprVal::int(if r.val != 0 { -1 } else { 0 }))
                }
            } else if truthy {
                Some(ExprVal::int(-1))
            } else {
                let r = self.eval(rhs, scope)?;
                Some(ExprVal::int(if r.val != 0 { -1 } else { 0 }))
            };
        }

        if op == BinOp::IsBetween {
            // `lower/case.rs` always builds this rhs as `Ast::Range { hi,
            // lo }`, which the generic `self.eval` below can't fold (it has
            // no arm for `Range`), so fold the bounds here directly.
            let Ast::Range { hi, lo, .. } = rhs else {
                return None;
            };
            let v = self.eval(lhs, scope)?;
            let hi = self.eval(hi, scope)?;
            let lo = self.eval(lo, scope)?;
            return if v.is_float() || hi.is_float() || lo.is_float() {
                let (v, hi, lo) = (v.as_float(), hi.as_float(), lo.as_float());
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                Some(ExprVal::int(-((v >= lo && v <= hi) as i32)))
            } else {
                let (lo, hi) = if lo.val <= hi.val { (lo.val, hi.val) } else { (hi.val, lo.val) };
                Some(ExprVal::int(-((v.val >= lo && v.val <= hi) as i32)))
            };
        }

        let l = self.eval(lhs, scope)?;
        let r = self.eval(rhs, scope)?;
        if l.is_float() || r.is_float() {
            Some(ExprVal::float(eval_float_op(op, l.as_float(), r.as_float())))
        } else {
            eval_int_op(op, l.val, r.val).map(ExprVal::int)
        }
    }
}

fn eval_int_op(op: BinOp, l: i32, r: i32) -> Option<i32> {
    use BinOp::*;
    Some(match op {
        Add => l.wrapping_add(r),
        Sub => l.wrapping_sub(r),
        Mul => l.wrapping_mul(r),
        // Division/modulus by zero yields the divisor, matching the
        // original's `if (rval == 0) return rval;` (§4.1).
        Div => {
            if r == 0 {
                r
            } else {
                l.wrapping_div(r)
            }
        }
        Mod => {
            if r == 0 {
                r
            } else {
                l.wrapping_rem(r)
            }
        }
        BitOr => l | r,
        BitAnd => l & r,
        BitXor => l ^ r,
        Shl => l.wrapping_shl(r as u32 & 31),
        Shr => ((l as u32) >> (r as u32 & 31)) as i32,
        Sar => l >> (r & 31),
        Rotl => ((l as u32).rotate_left(r as u32 & 31)) as i32,
        Rotr => ((l as u32).rotate_right(r as u32 & 31)) as i32,
        HighMult => (((l as i64) * (r as i64)) >> 32) as i32,
        Lt => -((l < r) as i32),
        Gt => -((l > r) as i32),
        Le => -((l <= r) as i32),
        Ge => -((l >= r) as i32),
        Eq => -((l == r) as i32),
        Ne => -((l != r) as i32),
        LimitMin => if l < r { r } else { l },
        LimitMax => if l > r { r } else { l },
        IsBetween => unreachable!("IsBetween is intercepted in eval_binary before reaching here"),
        LogicalAnd | LogicalOr => unreachable!("short-circuit handled by caller"),
    })
}

fn eval_float_op(op: BinOp, l: f32, r: f32) -> f32 {
    use BinOp::*;
    match op {
        Add => l + r,
        Sub => l - r,
        Mul => l * r,
        Div => l / r,
        Mod => l % r,
        BitOr => int_as_float(float_as_int(l) | float_as_int(r)),
        BitAnd => int_as_float(float_as_int(l) & float_as_int(r)),
        BitXor => int_as_float(float_as_int(l) ^ float_as_int(r)),
        Shl => int_as_float(float_as_int(l).wrapping_shl(float_as_int(r) as u32 & 31)),
        Shr => int_as_float(((float_as_int(l) as u32) >> (float_as_int(r) as u32 & 31)) as i32),
        Sar => int_as_float(float_as_int(l) >> (float_as_int(r) & 31)),
        Rotl => int_as_float((float_as_int(l) as u32).rotate_left(float_as_int(r) as u32 & 31) as i32),
        Rotr => int_as_float((float_as_int(l) as u32).rotate_right(float_as_int(r) as u32 & 31) as i32),
        HighMult => l * r / (1u64 << 32) as f32,
        Lt => int_as_float(-((l < r) as i32)),
        Gt => int_as_float(-((l > r) as i32)),
        Le => int_as_float(-((l <= r) as i32)),
        Ge => int_as_float(-((l >= r) as i32)),
        Eq => int_as_float(-((l == r) as i32)),
        Ne => int_as_float(-((l != r) as i32)),
        LimitMin => if l < r { r } else { l },
        LimitMax => if l > r { r } else { l },
        IsBetween => unreachable!("IsBetween is intercepted in eval_binary before reaching here"),
        LogicalAnd | LogicalOr => unreachable!("short-circuit handled by caller"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Ast;
    use crate::context::{EvalContext, ModuleId};
    use crate::ast::Module;
    use crate::symbol::{Symbol, SymbolKind, SymbolValue, Symbols};

    fn fresh() -> (Symbols, EvalContext, ScopeId) {
        let mut syms = Symbols::new();
        let scope = syms.new_scope(None);
        let module = Module::new("Main", scope);
        let ctx = EvalContext::new(ModuleId(0), module);
        (syms, ctx, scope)
    }

    #[test]
    fn division_by_zero_yields_divisor() {
        let (syms, mut ctx, scope) = fresh();
        let ast = Ast::Binary {
            line: 0,
            op: BinOp::Div,
            lhs: Box::new(Ast::int_lit(0, 7)),
            rhs: Box::new(Ast::int_lit(0, 0)),
        };
        let v = eval_relaxed(&ast, &syms, scope, &mut ctx, EvalMode::Constant).unwrap();
        assert_eq!(v.val, 0);
    }

    #[test]
    fn is_between_checks_inclusive_range() {
        let (syms, mut ctx, scope) = fresh();
        let make = |v: i32, lo: i32, hi: i32| Ast::Binary {
            line: 0,
            op: BinOp::IsBetween,
            lhs: Box::new(Ast::int_lit(0, v)),
            rhs: Box::new(Ast::Range {
                line: 0,
                hi: Box::new(Ast::int_lit(0, hi)),
                lo: Box::new(Ast::int_lit(0, lo)),
            }),
        };

        for (v, expect) in [(5, true), (10, true), (20, true), (4, false), (21, false)] {
            let ast = make(v, 10, 20);
            let result = eval_relaxed(&ast, &syms, scope, &mut ctx, EvalMode::Constant).unwrap();
            assert_eq!(result.val, if expect { -1 } else { 0 }, "value {v}");
        }
    }

    #[test]
    fn is_between_tolerates_reversed_bounds() {
        let (syms, mut ctx, scope) = fresh();
        let ast = Ast::Binary {
            line: 0,
            op: BinOp::IsBetween,
            lhs: Box::new(Ast::int_lit(0, 15)),
            rhs: Box::new(Ast::Range {
                line: 0,
                hi: Box::new(Ast::int_lit(0, 10)),
                lo: Box::new(Ast::int_lit(0, 20)),
            }),
        };
        let result = eval_relaxed(&ast, &syms, scope, &mut ctx, EvalMode::Constant).unwrap();
        assert_eq!(result.val, -1);
    }

    #[test]
    fn rev_is_involutive_on_masked_bits() {
        let a: i32 = 0b1011_0010;
        let n = 8;
        let once = reverse_bits(a, n);
        let twice = reverse_bits(once, n);
        assert_eq!(twice & ((1 << n) - 1), a & ((1 << n) - 1));
    }

    #[test]
    fn float_round_trip() {
        for x in [0u32, 1, 0xFFFF_FFFF, 0x8000_0000, 12345] {
            let back = float_as_int(int_as_float(x as i32));
            assert_eq!(back as u32, x);
        }
    }

    #[quickcheck_macros::quickcheck]
    fn qc_float_as_int_round_trips(x: u32) -> bool {
        float_as_int(int_as_float(x as i32)) as u32 == x
    }

    #[quickcheck_macros::quickcheck]
    fn qc_rev_is_involutive_on_masked_bits(a: i32, n: u8) -> bool {
        let n = (n % 32) as u32;
        let once = reverse_bits(a, n);
        let twice = reverse_bits(once, n);
        let mask = if n == 0 { 0 } else { ((1i64 << n) - 1) as i32 };
        twice & mask == a & mask
    }

    #[test]
    fn constref_switches_and_restores_module() {
        let mut syms = Symbols::new();
        let scope_a = syms.new_scope(None);
        syms.insert(
            scope_a,
            Symbol::new("K", SymbolKind::Constant, SymbolValue::ConstExpr(Ast::int_lit(0, 7))),
        );
        let scope_b = syms.new_scope(None);

        let mod_a = Module::new("A", scope_a);
        let mod_b = Module::new("B", scope_b);
        let mut ctx = EvalContext::new(ModuleId(0), mod_b);
        ctx.insert_module(ModuleId(1), mod_a);
        ctx.current = ModuleId(0);

        let ast = Ast::Binary {
            line: 0,
            op: BinOp::Add,
            lhs: Box::new(Ast::ConstRef {
                line: 0,
                module: "A".into(),
                name: "K".into(),
            }),
            rhs: Box::new(Ast::int_lit(0, 1)),
        };
        let v = eval_relaxed(&ast, &syms, scope_b, &mut ctx, EvalMode::Constant).unwrap();
        assert_eq!(v.val, 8);
        assert_eq!(ctx.current, ModuleId(0));
    }

    #[test]
    fn comparisons_yield_spin_booleans() {
        let (syms, mut ctx, scope) = fresh();
        let ast = Ast::Binary {
            line: 0,
            op: BinOp::Lt,
            lhs: Box::new(Ast::int_lit(0, 3)),
            rhs: Box::new(Ast::int_lit(0, 5)),
        };
        let v = eval_relaxed(&ast, &syms, scope, &mut ctx, EvalMode::Constant).unwrap();
        assert_eq!(v.val, -1);
    }
}
