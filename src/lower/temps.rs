//! Fresh hidden-local materialisation shared by every lowering pass.
//!
//! The spec is explicit that hidden locals (`_idx_`, `_start_`, `_limit_`,
//! `_step_`, lookup temporaries, case scrutinee temporaries, ...) are
//! materialised *only* when the corresponding expression is non-constant
//! (§4.2) — callers decide that; this type just hands out a uniquely-named
//! slot once a caller has decided one is needed.

use crate::ast::{Ast, Function};
use crate::symbol::{ScopeId, Symbol, SymbolKind, SymbolValue, Symbols};

pub struct TempAllocator<'a> {
    syms: &'a mut Symbols,
    scope: ScopeId,
    func: &'a mut Function,
}

impl<'a> TempAllocator<'a> {
    pub fn new(syms: &'a mut Symbols, scope: ScopeId, func: &'a mut Function) -> Self {
        TempAllocator { syms, scope, func }
    }

    /// Allocates a fresh local named `<base><n>` (`n` the running local
    /// count), registers it as a [`SymbolKind::TempVar`], and returns an
    /// `Ast::Ident` referencing it.
    pub fn fresh(&mut self, base: &str) -> Ast {
        let n = self.func.numlocals;
        let name = format!("{base}{n}");
        let offset = (n * 4) as i32;
        self.syms.insert(
            self.scope,
            Symbol::new(name.clone(), SymbolKind::TempVar, SymbolValue::Offset(offset)),
        );
        self.func.locals.push(name.clone());
        self.func.numlocals += 1;
        Ast::ident(0, name)
    }
}
