//! Type inference & call-graph analysis (§4.1 "a minimal type inference
//! pass", §4.2 component F).
//!
//! Two independent fixed-point analyses (`CheckRetStatementList`,
//! `CheckForStatic`) plus two call-graph walks (`IsCalledFrom`,
//! `MarkUsed`), each a direct tree walk over [`Ast`] rather than a
//! constraint-solver: the type lattice here is shallow enough (void vs.
//! generic-long, static vs. non-static) that unification machinery would
//! be solving a problem this domain doesn't have.

use std::collections::HashMap;

use crate::ast::{Ast, Function, Module, TypeNode};
use crate::consts::CALLSITES_MANY;
use crate::context::{EvalContext, ModuleId};
use crate::symbol::{ScopeId, SymbolKind, Symbols};

/// Walks `body`, inferring `rettype` and whether a synthetic `return
/// result` must be appended. Returns `true` if anything changed, so the
/// driver can detect convergence even though a single pass over one
/// function's body is enough in practice (§4.1: "each returning `changes`
/// so the driver can iterate").
pub fn check_ret_statement_list(func: &mut Function) -> bool {
    let mut saw_return = false;
    let mut result_read = false;
    let mut rettype = None;

    visit_ret_shapes(&func.body, &mut saw_return, &mut result_read, &mut rettype);

    let mut changed = false;

    if let Some(t) = rettype {
        if func.rettype != t {
            func.rettype = t;
            changed = true;
        }
    } else if !result_read {
        if func.rettype != TypeNode::Void {
            func.rettype = TypeNode::Void;
            func.resultexpr = None;
            changed = true;
        }
    }

    if !saw_return && func.rettype != TypeNode::Void {
        func.body.push(Ast::Return {
            line: 0,
            value: Some(Box::new(Ast::ident(0, "result"))),
        });
        changed = true;
    }

    func.result_used = result_read;
    changed
}

fn visit_ret_shapes(stmts: &[Ast], saw_return: &mut bool, result_read: &mut bool, rettype: &mut Option<TypeNode>) {
    for stmt in stmts {
        visit_ret_shape(stmt, saw_return, result_read, rettype);
    }
}

fn visit_ret_shape(ast: &Ast, saw_return: &mut bool, result_read: &mut bool, rettype: &mut Option<TypeNode>) {
    match ast {
        Ast::Return { value, .. } => {
            *saw_return = true;
            if let Some(v) = value {
                set_function_type(v, rettype);
            }
        }
        Ast::Abort { value, .. } => {
            if let Some(v) = value {
                set_function_type(v, rettype);
            }
        }
        Ast::Assign { lhs, .. } => {
            if is_result_ident(lhs) {
                *result_read = true;
                *rettype = Some(rettype.clone().unwrap_or(TypeNode::Generic(4)));
            }
        }
        Ast::Ident { name, .. } if name == "result" => {
            *result_read = true;
        }
        Ast::RepeatCounting(r) => {
            visit_ret_shape(&r.from, saw_return, result_read, rettype);
            if let Some(to) = &r.to {
                visit_ret_shape(to, saw_return, result_read, rettype);
            }
            visit_ret_shape(&r.body, saw_return, result_read, rettype);
        }
        Ast::ForLoop(f) => {
            visit_ret_shape(&f.cond, saw_return, result_read, rettype);
            visit_ret_shape(&f.body, saw_return, result_read, rettype);
        }
        Ast::If { cond, then_branch, else_branch, .. } => {
            visit_ret_shape(cond, saw_return, result_read, rettype);
            visit_ret_shape(then_branch, saw_return, result_read, rettype);
            if let Some(e) = else_branch {
                visit_ret_shape(e, saw_return, result_read, rettype);
            }
        }
        Ast::Case { scrutinee, arms, .. } => {
            visit_ret_shape(scrutinee, saw_return, result_read, rettype);
            for arm in arms {
                visit_ret_shape(&arm.body, saw_return, result_read, rettype);
            }
        }
        Ast::Block { stmts, .. } => visit_ret_shapes(stmts, saw_return, result_read, rettype),
        Ast::Binary { lhs, rhs, .. } => {
            visit_ret_shape(lhs, saw_return, result_read, rettype);
            visit_ret_shape(rhs, saw_return, result_read, rettype);
        }
        Ast::Unary { operand, .. } => visit_ret_shape(operand, saw_return, result_read, rettype),
        _ => {}
    }
}

fn is_result_ident(ast: &Ast) -> bool {
    matches!(ast, Ast::Ident { name, .. } if name == "result")
}

/// `SetFunctionType`: float literals/expressions refine `rettype` to
/// `Float`; anything else that isn't already known refines to
/// generic-long. A `Float` inference is sticky against a later
/// generic-long one (first concrete sighting wins), matching the
/// original's "don't downgrade a discovered float return".
fn set_function_type(expr: &Ast, rettype: &mut Option<TypeNode>) {
    let inferred = if matches!(expr, Ast::FloatLit { .. }) {
        TypeNode::Float
    } else {
        TypeNode::Generic(4)
    };
    match rettype {
        Some(TypeNode::Float) => {}
        _ => *rettype = Some(inferred),
    }
}

/// `CheckForStatic`: a function starts eligible for static dispatch;
/// referencing a module-scope variable or calling a non-static function
/// disqualifies it. Returns `true` if `is_static` changed.
pub fn check_for_static(func: &mut Function, module: &Module, syms: &Symbols, call_graph: &HashMap<String, bool>) -> bool {
    if !func.is_static {
        return false;
    }
    if func.force_static {
        return false;
    }

    let disqualified = references_module_variable(&func.body, func.localsyms, module, syms) || calls_non_static(&func.body, call_graph);

    if disqualified {
        func.is_static = false;
        true
    } else {
        false
    }
}

fn references_module_variable(stmts: &[Ast], local_scope: ScopeId, module: &Module, syms: &Symbols) -> bool {
    stmts.iter().any(|s| references_module_variable_one(s, local_scope, module, syms))
}

fn references_module_variable_one(ast: &Ast, local_scope: ScopeId, module: &Module, syms: &Symbols) -> bool {
    match ast {
        Ast::Ident { name, .. } => module.find_function(name).is_none() && is_module_scoped_name(name, local_scope, syms),
        Ast::AddrOf { target, .. } | Ast::AddrOfAbs { target, .. } => references_module_variable_one(target, local_scope, module, syms),
        Ast::Binary { lhs, rhs, .. } => {
            references_module_variable_one(lhs, local_scope, module, syms) || references_module_variable_one(rhs, local_scope, module, syms)
        }
        Ast::Unary { operand, .. } => references_module_variable_one(operand, local_scope, module, syms),
        Ast::Assign { lhs, rhs, .. } => {
            references_module_variable_one(lhs, local_scope, module, syms) || references_module_variable_one(rhs, local_scope, module, syms)
        }
        Ast::Block { stmts, .. } => references_module_variable(stmts, local_scope, module, syms),
        Ast::If { cond, then_branch, else_branch, .. } => {
            references_module_variable_one(cond, local_scope, module, syms)
                || references_module_variable_one(then_branch, local_scope, module, syms)
                || else_branch.as_ref().is_some_and(|e| references_module_variable_one(e, local_scope, module, syms))
        }
        Ast::ForLoop(f) => {
            references_module_variable_one(&f.cond, local_scope, module, syms) || references_module_variable_one(&f.body, local_scope, module, syms)
        }
        Ast::RepeatCounting(r) => references_module_variable_one(&r.body, local_scope, module, syms),
        Ast::Case { scrutinee, arms, .. } => {
            references_module_variable_one(scrutinee, local_scope, module, syms)
                || arms.iter().any(|a| references_module_variable_one(&a.body, local_scope, module, syms))
        }
        _ => false,
    }
}

/// A name is module-scoped when it resolves — walking the parent chain
/// from the function's own local scope, so a local/parameter shadowing a
/// module name resolves to the shadowing symbol instead — to a `Variable`
/// symbol. `func.localsyms.parent == module.objsyms`, so a name with no
/// local/parameter of that name falls through to the module's own table.
fn is_module_scoped_name(name: &str, local_scope: ScopeId, syms: &Symbols) -> bool {
    matches!(syms.lookup(local_scope, name).map(|s| s.kind), Some(SymbolKind::Variable))
}

fn calls_non_static(stmts: &[Ast], call_graph: &HashMap<String, bool>) -> bool {
    stmts.iter().any(|s| calls_non_static_one(s, call_graph))
}

fn calls_non_static_one(ast: &Ast, call_graph: &HashMap<String, bool>) -> bool {
    match ast {
        Ast::FuncCall { name, args, .. } => {
            call_graph.get(name).is_some_and(|is_static| !is_static) || args.iter().any(|a| calls_non_static_one(a, call_graph))
        }
        Ast::Binary { lhs, rhs, .. } => calls_non_static_one(lhs, call_graph) || calls_non_static_one(rhs, call_graph),
        Ast::Unary { operand, .. } => calls_non_static_one(operand, call_graph),
        Ast::Assign { lhs, rhs, .. } => calls_non_static_one(lhs, call_graph) || calls_non_static_one(rhs, call_graph),
        Ast::Block { stmts, .. } => calls_non_static(stmts, call_graph),
        Ast::If { cond, then_branch, else_branch, .. } => {
            calls_non_static_one(cond, call_graph)
                || calls_non_static_one(then_branch, call_graph)
                || else_branch.as_ref().is_some_and(|e| calls_non_static_one(e, call_graph))
        }
        Ast::ForLoop(f) => calls_non_static_one(&f.cond, call_graph) || calls_non_static_one(&f.body, call_graph),
        Ast::RepeatCounting(r) => calls_non_static_one(&r.body, call_graph),
        Ast::Case { scrutinee, arms, .. } => {
            calls_non_static_one(scrutinee, call_graph) || arms.iter().any(|a| calls_non_static_one(&a.body, call_graph))
        }
        Ast::Return { value, .. } | Ast::Abort { value, .. } => value.as_ref().is_some_and(|v| calls_non_static_one(v, call_graph)),
        _ => false,
    }
}

/// `IsCalledFrom`: depth-first over every callee reachable from `start`'s
/// own body, using `visit_flag` to avoid infinite recursion on a true
/// cycle. Sets `is_leaf = false` on `start` the moment any `FUNCCALL` is
/// seen, and returns whether `start` is reachable from its own body
/// (i.e. is recursive, possibly mutually).
pub fn is_called_from(start_name: &str, module: &mut Module) -> bool {
    for f in &mut module.functions {
        f.visit_flag = false;
    }
    let mut found_leaf_call = false;
    let reachable = walk_calls(start_name, start_name, module, &mut found_leaf_call);
    if let Some(f) = module.find_function_mut(start_name) {
        if found_leaf_call {
            f.is_leaf = false;
        }
        f.is_recursive = reachable;
    }
    reachable
}

fn walk_calls(target: &str, current: &str, module: &mut Module, found_leaf_call: &mut bool) -> bool {
    let already_visited = module.find_function(current).is_some_and(|f| f.visit_flag);
    if already_visited {
        return false;
    }
    if let Some(f) = module.find_function_mut(current) {
        f.visit_flag = true;
    }

    let callees = collect_func_calls(&module.find_function(current).map(|f| f.body.clone()).unwrap_or_default());
    let mut reaches_target = false;
    for callee in callees {
        *found_leaf_call = true;
        if callee == target {
            reaches_target = true;
        }
        if walk_calls(target, &callee, module, found_leaf_call) {
            reaches_target = true;
        }
    }
    reaches_target
}

fn collect_func_calls(stmts: &[Ast]) -> Vec<String> {
    let mut out = Vec::new();
    for s in stmts {
        collect_func_calls_one(s, &mut out);
    }
    out
}

fn collect_func_calls_one(ast: &Ast, out: &mut Vec<String>) {
    match ast {
        Ast::FuncCall { name, args, .. } => {
            out.push(name.clone());
            for a in args {
                collect_func_calls_one(a, out);
            }
        }
        Ast::Binary { lhs, rhs, .. } => {
            collect_func_calls_one(lhs, out);
            collect_func_calls_one(rhs, out);
        }
        Ast::Unary { operand, .. } => collect_func_calls_one(operand, out),
        Ast::Assign { lhs, rhs, .. } => {
            collect_func_calls_one(lhs, out);
            collect_func_calls_one(rhs, out);
        }
        Ast::Block { stmts, .. } => out.extend(collect_func_calls(stmts)),
        Ast::If { cond, then_branch, else_branch, .. } => {
            collect_func_calls_one(cond, out);
            collect_func_calls_one(then_branch, out);
            if let Some(e) = else_branch {
                collect_func_calls_one(e, out);
            }
        }
        Ast::ForLoop(f) => {
            collect_func_calls_one(&f.cond, out);
            collect_func_calls_one(&f.body, out);
        }
        Ast::RepeatCounting(r) => collect_func_calls_one(&r.body, out),
        Ast::Case { scrutinee, arms, .. } => {
            collect_func_calls_one(scrutinee, out);
            for arm in arms {
                collect_func_calls_one(&arm.body, out);
            }
        }
        Ast::Return { value, .. } | Ast::Abort { value, .. } => {
            if let Some(v) = value {
                collect_func_calls_one(v, out);
            }
        }
        _ => {}
    }
}

/// `MarkUsed`: increments `call_sites` on the callee and recurses into its
/// body, switching `current` at a module boundary via
/// [`EvalContext::enter_module`]. Recursion short-circuits once
/// `call_sites` reaches [`CALLSITES_MANY`] (§4.2: "obviously live").
pub fn mark_used(module_id: ModuleId, func_name: &str, ctx: &mut EvalContext) {
    let already_saturated = ctx
        .module(module_id)
        .and_then(|m| m.find_function(func_name))
        .is_some_and(|f| f.call_sites >= CALLSITES_MANY);
    if already_saturated {
        return;
    }

    let body = match ctx.module_mut(module_id).and_then(|m| m.find_function_mut(func_name)) {
        Some(f) => {
            f.call_sites += 1;
            if f.call_sites >= CALLSITES_MANY {
                return;
            }
            f.body.clone()
        }
        None => return,
    };

    let callees = collect_func_calls(&body);
    for callee in callees {
        mark_used(module_id, &callee, ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Symbols;

    fn func_with_body(name: &str, body: Vec<Ast>) -> Function {
        let mut syms = Symbols::new();
        let scope = syms.new_scope(None);
        let mut f = Function::new(name, scope);
        f.body = body;
        f
    }

    /// Like `func_with_body`, but `localsyms` is a real child scope of
    /// `module_scope` inside `syms`, matching `Function::localsyms`'s
    /// documented parent invariant — needed by any test that exercises
    /// shadowing, since `func_with_body`'s scope lives in an unrelated
    /// throwaway `Symbols` and only resolves against the module by the
    /// coincidence of both starting at `ScopeId(0)`.
    fn func_with_body_in(syms: &mut Symbols, module_scope: ScopeId, name: &str, body: Vec<Ast>) -> Function {
        let scope = syms.new_scope(Some(module_scope));
        let mut f = Function::new(name, scope);
        f.body = body;
        f
    }

    #[test]
    fn no_return_seen_and_result_unused_infers_void() {
        let mut f = func_with_body("f", vec![Ast::int_lit(1, 1)]);
        check_ret_statement_list(&mut f);
        assert_eq!(f.rettype, TypeNode::Void);
        assert!(f.resultexpr.is_none());
    }

    #[test]
    fn explicit_return_appends_nothing_and_infers_generic() {
        let mut f = func_with_body(
            "f",
            vec![Ast::Return {
                line: 1,
                value: Some(Box::new(Ast::int_lit(1, 5))),
            }],
        );
        let before_len = f.body.len();
        check_ret_statement_list(&mut f);
        assert_eq!(f.rettype, TypeNode::Generic(4));
        assert_eq!(f.body.len(), before_len);
    }

    #[test]
    fn assignment_to_result_without_return_appends_synthetic_return() {
        let mut f = func_with_body(
            "f",
            vec![Ast::Assign {
                line: 1,
                lhs: Box::new(Ast::ident(1, "result")),
                rhs: Box::new(Ast::int_lit(1, 9)),
            }],
        );
        check_ret_statement_list(&mut f);
        assert_eq!(f.rettype, TypeNode::Generic(4));
        assert!(matches!(f.body.last(), Some(Ast::Return { .. })));
    }

    #[test]
    fn leaf_function_has_no_func_calls() {
        let mut syms = Symbols::new();
        let scope = syms.new_scope(None);
        let mut module = Module::new("Main", scope);
        module.functions.push(func_with_body("leaf", vec![Ast::int_lit(1, 1)]));
        let recursive = is_called_from("leaf", &mut module);
        assert!(!recursive);
        assert!(module.find_function("leaf").unwrap().is_leaf);
    }

    #[test]
    fn direct_recursion_is_detected() {
        let mut syms = Symbols::new();
        let scope = syms.new_scope(None);
        let mut module = Module::new("Main", scope);
        module.functions.push(func_with_body(
            "fact",
            vec![Ast::FuncCall {
                line: 1,
                name: "fact".into(),
                args: vec![],
            }],
        ));
        let recursive = is_called_from("fact", &mut module);
        assert!(recursive);
        let f = module.find_function("fact").unwrap();
        assert!(!f.is_leaf);
        assert!(f.is_recursive);
    }

    #[test]
    fn referencing_a_module_variable_clears_is_static() {
        use crate::symbol::{Symbol, SymbolValue};

        let mut syms = Symbols::new();
        let module_scope = syms.new_scope(None);
        syms.insert(module_scope, Symbol::new("counter", SymbolKind::Variable, SymbolValue::Offset(0)));

        let mut func = func_with_body_in(
            &mut syms,
            module_scope,
            "bump",
            vec![Ast::Assign {
                line: 1,
                lhs: Box::new(Ast::ident(1, "counter")),
                rhs: Box::new(Ast::int_lit(1, 1)),
            }],
        );
        assert!(func.is_static);
        let module = Module::new("Main", module_scope);

        let call_graph = HashMap::new();
        let changed = check_for_static(&mut func, &module, &syms, &call_graph);
        assert!(changed);
        assert!(!func.is_static);
    }

    #[test]
    fn no_module_variable_reference_stays_static() {
        use crate::symbol::{Symbol, SymbolValue};

        let mut syms = Symbols::new();
        let module_scope = syms.new_scope(None);
        syms.insert(module_scope, Symbol::new("counter", SymbolKind::Variable, SymbolValue::Offset(0)));

        let mut func = func_with_body_in(
            &mut syms,
            module_scope,
            "bump",
            vec![Ast::Assign {
                line: 1,
                lhs: Box::new(Ast::ident(1, "local_only")),
                rhs: Box::new(Ast::int_lit(1, 1)),
            }],
        );
        let module = Module::new("Main", module_scope);

        let call_graph = HashMap::new();
        let changed = check_for_static(&mut func, &module, &syms, &call_graph);
        assert!(!changed);
        assert!(func.is_static);
    }

    #[test]
    fn a_parameter_shadowing_a_module_variable_stays_static() {
        use crate::symbol::{Symbol, SymbolValue};

        let mut syms = Symbols::new();
        let module_scope = syms.new_scope(None);
        syms.insert(module_scope, Symbol::new("counter", SymbolKind::Variable, SymbolValue::Offset(0)));

        let mut func = func_with_body_in(
            &mut syms,
            module_scope,
            "bump",
            vec![Ast::Assign {
                line: 1,
                lhs: Box::new(Ast::ident(1, "counter")),
                rhs: Box::new(Ast::int_lit(1, 1)),
            }],
        );
        syms.insert(func.localsyms, Symbol::new("counter", SymbolKind::Parameter, SymbolValue::Offset(0)));
        let module = Module::new("Main", module_scope);

        let call_graph = HashMap::new();
        let changed = check_for_static(&mut func, &module, &syms, &call_graph);
        assert!(!changed);
        assert!(func.is_static);
    }

    #[test]
    fn calling_a_non_static_function_clears_is_static() {
        let mut syms = Symbols::new();
        let scope = syms.new_scope(None);
        let mut module = Module::new("Main", scope);
        let mut helper = func_with_body("helper", vec![]);
        helper.is_static = false;
        module.functions.push(helper);

        let mut caller = func_with_body(
            "caller",
            vec![Ast::FuncCall {
                line: 1,
                name: "helper".into(),
                args: vec![],
            }],
        );
        assert!(caller.is_static);

        let call_graph: HashMap<String, bool> = module.functions.iter().map(|f| (f.name.clone(), f.is_static)).collect();
        let changed = check_for_static(&mut caller, &module, &syms, &call_graph);
        assert!(changed);
        assert!(!caller.is_static);
    }

    #[test]
    fn force_static_is_never_disqualified() {
        let mut syms = Symbols::new();
        let module_scope = syms.new_scope(None);
        use crate::symbol::{Symbol, SymbolValue};
        syms.insert(module_scope, Symbol::new("counter", SymbolKind::Variable, SymbolValue::Offset(0)));
        let module = Module::new("Main", module_scope);

        let mut func = func_with_body(
            "bump",
            vec![Ast::Assign {
                line: 1,
                lhs: Box::new(Ast::ident(1, "counter")),
                rhs: Box::new(Ast::int_lit(1, 1)),
            }],
        );
        func.force_static = true;

        let call_graph = HashMap::new();
        let changed = check_for_static(&mut func, &module, &syms, &call_graph);
        assert!(!changed);
        assert!(func.is_static);
    }

    #[test]
    fn mark_used_saturates_at_callsites_many() {
        let mut syms = Symbols::new();
        let scope = syms.new_scope(None);
        let mut module = Module::new("Main", scope);
        module.functions.push(func_with_body("leaf", vec![]));
        let mut ctx = EvalContext::new(ModuleId(0), module);
        for _ in 0..(CALLSITES_MANY + 5) {
            mark_used(ModuleId(0), "leaf", &mut ctx);
        }
        let call_sites = ctx.module(ModuleId(0)).unwrap().find_function("leaf").unwrap().call_sites;
        assert_eq!(call_sites, CALLSITES_MANY);
    }
}
