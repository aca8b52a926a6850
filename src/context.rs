//! Explicit evaluation context replacing the original's process-wide
//! `current`/`curfunc` cursors (§5, §9).
//!
//! Every pass that crosses a module boundary (`CONSTREF`, call-site
//! marking, nested-module DEBUG compilation) takes `&mut EvalContext`,
//! snapshots what it's about to overwrite, and restores it through
//! [`ModuleGuard`]'s `Drop` impl — so an early return via `?` can't skip
//! the restoration the way a hand-rolled save/restore pair could.

use std::collections::HashMap;

use crate::ast::Module;

/// Opaque handle identifying a loaded module, stable for the run of a
/// compilation (§6: modules reference each other only via `Object`
/// symbols; this is the resolved form of that reference).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(pub u32);

/// Identifies the function currently being evaluated, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// The process-wide cursor pair, made explicit (§5, §9).
pub struct EvalContext {
    modules: HashMap<ModuleId, Module>,
    by_name: HashMap<String, ModuleId>,
    pub current: ModuleId,
    pub curfunc: Option<FuncId>,
}

impl EvalContext {
    pub fn new(root: ModuleId, root_module: Module) -> Self {
        let mut modules = HashMap::new();
        let mut by_name = HashMap::new();
        by_name.insert(root_module.classname.clone(), root);
        modules.insert(root, root_module);
        EvalContext {
            modules,
            by_name,
            current: root,
            curfunc: None,
        }
    }

    pub fn insert_module(&mut self, id: ModuleId, module: Module) {
        self.by_name.insert(module.classname.clone(), id);
        self.modules.insert(id, module);
    }

    /// Resolves an `OBJ` alias to the module it names, for `CONSTREF`
    /// (`OBJ#NAME`) evaluation (§4.1).
    pub fn find_module_id_by_name(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(&id)
    }

    pub fn module_mut(&mut self, id: ModuleId) -> Option<&mut Module> {
        self.modules.get_mut(&id)
    }

    pub fn current_module(&self) -> &Module {
        self.modules.get(&self.current).expect("current module always resolvable")
    }

    pub fn current_module_mut(&mut self) -> &mut Module {
        self.modules.get_mut(&self.current).expect("current module always resolvable")
    }

    /// Switches `current` (and clears `curfunc`, matching `CONSTREF`'s
    /// "current function (=none)") for the duration of the returned guard;
    /// dropping the guard restores both fields regardless of how the
    /// caller's scope exits.
    pub fn enter_module(&mut self, target: ModuleId) -> ModuleGuard<'_> {
        let saved_module = self.current;
        let saved_func = self.curfunc;
        self.current = target;
        self.curfunc = None;
        ModuleGuard {
            ctx: self,
            saved_module,
            saved_func,
        }
    }
}

/// RAII restorer for [`EvalContext::enter_module`].
pub struct ModuleGuard<'a> {
    ctx: &'a mut EvalContext,
    saved_module: ModuleId,
    saved_func: Option<FuncId>,
}

impl<'a> ModuleGuard<'a> {
    pub fn ctx(&mut self) -> &mut EvalContext {
        self.ctx
    }
}

impl<'a> Drop for ModuleGuard<'a> {
    fn drop(&mut self) {
        self.ctx.current = self.saved_module;
        self.ctx.curfunc = self.saved_func;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Symbols;

    #[test]
    fn guard_restores_on_drop_even_after_mutation() {
        let mut syms = Symbols::new();
        let scope_a = syms.new_scope(None);
        let scope_b = syms.new_scope(None);
        let a = Module::new("A", scope_a);
        let b = Module::new("B", scope_b);
        let mut ctx = EvalContext::new(ModuleId(0), a);
        ctx.insert_module(ModuleId(1), b);
        ctx.curfunc = Some(FuncId(7));

        {
            let mut guard = ctx.enter_module(ModuleId(1));
            assert_eq!(guard.ctx().current, ModuleId(1));
            assert_eq!(guard.ctx().curfunc, None);
        }
        assert_eq!(ctx.current, ModuleId(0));
        assert_eq!(ctx.curfunc, Some(FuncId(7)));
    }
}
