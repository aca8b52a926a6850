use spinc::ast::{Function, Module};
use spinc::context::{EvalContext, ModuleId};
use spinc::debugc::{DebugArg, DebugArgValue, DebugCompiler};
use spinc::nu::alloc::Allocator;
use spinc::nu::ir::{Instr, IrList, Op, Program};
use spinc::symbol::Symbols;
use spinc::{compile_core, CompileOutput};

fn empty_context() -> (EvalContext, Symbols) {
    let mut syms = Symbols::new();
    let scope = syms.new_scope(None);
    let module = Module::new("Main", scope);
    (EvalContext::new(ModuleId(0), module), syms)
}

#[test]
fn pipeline_runs_inference_allocation_and_debug_compilation_together() {
    let (mut ctx, mut syms) = empty_context();
    {
        let module = ctx.module_mut(ModuleId(0)).unwrap();
        let scope = syms.new_scope(Some(module.objsyms));
        module.functions.push(Function::new("main", scope));
    }

    let mut program = Program::new();
    let mut list = IrList::new("main");
    for _ in 0..5 {
        list.push(Instr::with_val(Op::PushI, 0));
    }
    list.push(Instr::new(Op::Ret));
    program.push_list(list);

    let mut dc = DebugCompiler::new();
    dc.compile_site(&[DebugArg {
        tag: "udec".to_string(),
        suppress_expr: true,
        expr_text: None,
        value: DebugArgValue::Immediate(0x100),
    }])
    .unwrap();
    let prologue = vec![0u8; 32];

    let out: CompileOutput = compile_core(&mut ctx, &[ModuleId(0)], &syms, Some(&mut program), Some(&dc), Some(&prologue)).unwrap();

    assert!(out.should_emit());
    let compression = out.compression.expect("allocation stage ran");
    assert!(compression.constants_specialized >= 1);

    let table = out.debug_table.expect("debug stage ran");
    assert!(table.len() > prologue.len());

    let func = ctx.module(ModuleId(0)).unwrap().find_function("main").unwrap();
    assert!(func.is_leaf);
}

#[test]
fn allocator_alone_respects_the_pool_cap() {
    let mut program = Program::new();
    let mut list = IrList::new("f");
    for i in 0..32 {
        list.push(Instr::with_val(Op::PushI, i));
    }
    program.push_list(list);

    let mut allocator = Allocator::new();
    allocator.initial_assign(&mut program);
    allocator.assign_opcodes();
    assert!(allocator.check_pool_size().is_ok());
}
