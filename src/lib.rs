//! Shared middle-end and Nu bytecode back-end for a Spin-to-PASM/C/Nu
//! cross-compiler (for the Parallax Propeller P1/P2 microcontrollers).
//!
//! This crate takes parsed modules (out of scope here — see
//! [`context::EvalContext`] for the shape a parser hands over) through
//! constant folding, Spin-specific statement lowering, type inference, Nu
//! IR generation, bytecode allocation and, for `DEBUG(...)` sites, the PASM
//! debug-table compiler. [`compile_core`] sequences these in the fixed
//! order the data dependencies between them require.

pub mod ast;
pub mod consts;
pub mod context;
pub mod debugc;
pub mod error;
pub mod expr;
pub mod infer;
pub mod lower;
pub mod nu;
pub mod symbol;
pub mod util;

use std::collections::HashMap;

use tracing::{debug, info, instrument};

use crate::context::{EvalContext, ModuleId};
use crate::debugc::{DebugCompiler, DebugSite};
use crate::error::{CoreError, Diagnostics};
use crate::nu::alloc::Allocator;
use crate::nu::ir::Program;
use crate::symbol::Symbols;

/// Per-module inference results, folded across iterations until the whole
/// program's `rettype`/`is_static` assignments stop changing (§4.2:
/// `CheckRetStatementList`/`CheckForStatic` are each a single pass over one
/// function, but the driver must iterate them to a fixed point across the
/// whole call graph).
#[derive(Debug, Default)]
pub struct InferenceStats {
    pub functions_retyped: u32,
    pub functions_destaticized: u32,
    pub iterations: u32,
}

/// Everything [`compile_core`] produces besides the mutated modules
/// themselves.
#[derive(Debug, Default)]
pub struct CompileOutput {
    pub diagnostics: Diagnostics,
    pub inference: InferenceStats,
    pub compression: Option<nu::alloc::CompressionStats>,
    pub debug_table: Option<Vec<u8>>,
}

impl CompileOutput {
    /// Whether the run produced an emittable result (§7: "final emission is
    /// suppressed if any errors occurred").
    pub fn should_emit(&self) -> bool {
        !self.diagnostics.has_errors()
    }
}

/// Runs type inference (`infer::check_ret_statement_list` /
/// `infer::check_for_static`) to a fixed point across every function in
/// every loaded module, then marks leaf/recursive status.
///
/// The original drives these passes from whichever call triggers them
/// lazily; the explicit loop here just makes that convergence visible
/// instead of relying on incidental call order.
#[instrument(skip_all)]
fn run_inference(ctx: &mut EvalContext, module_ids: &[ModuleId], syms: &Symbols) -> InferenceStats {
    let mut stats = InferenceStats::default();

    loop {
        stats.iterations += 1;
        let mut changed = false;

        for &id in module_ids {
            let Some(module) = ctx.module_mut(id) else { continue };
            for func in &mut module.functions {
                if infer::check_ret_statement_list(func) {
                    changed = true;
                    stats.functions_retyped += 1;
                }
            }
        }

        for &id in module_ids {
            let Some(module) = ctx.module_mut(id) else { continue };
            let module_name = module.classname.clone();
            let funcs: Vec<String> = module.functions.iter().map(|f| f.name.clone()).collect();
            for name in funcs {
                let module = ctx.module_mut(id).expect("module present");
                // Rebuilt every call so each disqualification in this pass is
                // visible to the next function checked in the same loop,
                // instead of only after a whole fixed-point iteration.
                let call_graph: HashMap<String, bool> = module.functions.iter().map(|f| (f.name.clone(), f.is_static)).collect();
                let Some(idx) = module.functions.iter().position(|f| f.name == name) else { continue };
                // `check_for_static` wants both the target function (mutably)
                // and the rest of the module's functions (to see callees) —
                // pull the function out of its own vec to satisfy the borrow
                // checker instead of aliasing a `&mut` and a `&` to it.
                let mut func = module.functions.remove(idx);
                let retyped = infer::check_for_static(&mut func, module, syms, &call_graph);
                module.functions.insert(idx, func);
                if retyped {
                    changed = true;
                    stats.functions_destaticized += 1;
                }
            }
            debug!(module = %module_name, "static analysis pass complete");
        }

        if !changed || stats.iterations > 64 {
            break;
        }
    }

    for &id in module_ids {
        let Some(module) = ctx.module_mut(id) else { continue };
        let names: Vec<String> = module.functions.iter().map(|f| f.name.clone()).collect();
        for name in &names {
            infer::is_called_from(name, module);
        }
    }

    stats
}

/// Allocates Nu bytecodes for a generated [`Program`]: initial assignment,
/// opcode numbering, then greedy compression (§4.3).
#[instrument(skip_all)]
fn run_bytecode_allocation(program: &mut Program) -> Result<(Allocator, nu::alloc::CompressionStats), CoreError> {
    let mut allocator = Allocator::new();
    allocator.initial_assign(program);
    allocator.assign_opcodes();
    let stats = allocator.compress(program);
    info!(
        constants_specialized = stats.constants_specialized,
        macros_fused = stats.macros_fused,
        rounds = stats.rounds,
        "bytecode allocation complete"
    );
    allocator.check_pool_size()?;
    Ok((allocator, stats))
}

/// Compiles every accumulated `DEBUG(...)` site and assembles the final
/// debug table against a prologue template (§4.4, §6).
#[instrument(skip_all)]
fn run_debug_compilation(debugc: &DebugCompiler, prologue: &[u8]) -> Result<Vec<u8>, CoreError> {
    let sites: &[DebugSite] = debugc.sites();
    info!(site_count = sites.len(), "compiling DEBUG table");
    debugc::assemble_debug_table(prologue, sites)
}

/// Drives the whole middle-end/back-end pipeline over an already-parsed
/// program (§6): type inference to a fixed point, then — when the caller
/// supplies Nu IR and/or a DEBUG compiler — bytecode allocation and debug
/// table assembly, in that order (§5: "running it twice is undefined").
#[instrument(skip(ctx, module_ids, syms, program, debugc, debug_prologue))]
pub fn compile_core(
    ctx: &mut EvalContext,
    module_ids: &[ModuleId],
    syms: &Symbols,
    program: Option<&mut Program>,
    debugc: Option<&DebugCompiler>,
    debug_prologue: Option<&[u8]>,
) -> Result<CompileOutput, CoreError> {
    let mut out = CompileOutput::default();

    out.inference = run_inference(ctx, module_ids, syms);

    if let Some(program) = program {
        let (_allocator, stats) = run_bytecode_allocation(program)?;
        out.compression = Some(stats);
    }

    if let (Some(debugc), Some(prologue)) = (debugc, debug_prologue) {
        out.debug_table = Some(run_debug_compilation(debugc, prologue)?);
    }

    Ok(out)
}
