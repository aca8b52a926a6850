//! Nu bytecode allocator (§4.3, component H) — "the most sophisticated
//! subsystem" (§2).
//!
//! Three phases, run in this fixed order against a whole [`Program`]:
//! 1. [`Allocator::initial_assign`] gives every non-pseudo instruction a
//!    bytecode, merging `PUSHI`/`PUSHA` duplicates by value and mapping
//!    every other op to one static bytecode per opcode.
//! 2. [`Allocator::assign_opcodes`] walks bytecodes in descending-usage
//!    order handing out one-byte codes, reserving 0/1/2 for
//!    direct/pushi/pusha dispatch.
//! 3. [`Allocator::compress`] greedily promotes high-usage constants to
//!    their own opcode and fuses high-usage adjacent opcode pairs into
//!    macros, until no positive-savings candidate remains or the opcode
//!    space (`< MAX_BYTECODE`) is exhausted.
//!
//! Per the Design Notes (§9: "prefer an arena of `NuBytecode` addressed by
//! `BytecodeId`"), bytecodes live in one `Vec` and are referenced by index;
//! sorting by usage or by code permutes a separate index list rather than
//! the arena itself, so `BytecodeId`s embedded in IR instructions never go
//! stale.

use std::collections::HashMap;

use crate::consts::{DIRECT_BYTECODE, FIRST_BYTECODE, MAX_BYTECODE, MAX_MACRO_DEPTH, PUSHA_BYTECODE, PUSHI_BYTECODE};
use crate::error::CoreError;
use crate::nu::ir::{Instr, Op, Program};

/// Arena index into [`Allocator`]'s bytecode pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BytecodeId(pub u32);

/// Cap on the bytecode pool named in §4.3's failure semantics ("Overflow
/// of the 32K bytecode pool is a compilation error").
const MAX_POOL_SIZE: usize = 32 * 1024;

/// One entry in the bytecode pool (§3).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bytecode {
    pub name: String,
    /// Final one-byte opcode, or one of the reserved sentinels
    /// (`DIRECT_BYTECODE`/`PUSHI_BYTECODE`/`PUSHA_BYTECODE`) before/unless
    /// this entry is individually specialised.
    pub code: u16,
    /// `PUSHI`'s literal, or a label's byte offset for `PUSHA`.
    pub value: i32,
    /// Set for a `PUSHA` constant (label address), distinguishing it from
    /// a `PUSHI` constant for sentinel-code and naming purposes.
    pub is_label: bool,
    pub usage: u32,
    /// Placeholder PASM text; a free-form stand-in for the template-spliced
    /// body the reference implementation generates (Non-goals: "bit-exact
    /// textual equality with the reference emitter" is out of scope — the
    /// allocator's *decisions*, reproduced exactly, are what matters here).
    pub impl_body: String,
    pub impl_size: u32,
    pub is_const: bool,
    pub is_any_branch: bool,
    pub is_rel_branch: bool,
    pub is_inline_asm: bool,
    pub macro_depth: u32,
}

impl Bytecode {
    fn is_const_sentinel(&self) -> bool {
        self.is_const && (self.code == PUSHI_BYTECODE as u16 || self.code == PUSHA_BYTECODE as u16)
    }
}

/// Running statistics surfaced after [`Allocator::compress`], useful for
/// diagnostics and for the testable-property scenarios in §8 (S3, S4).
#[derive(Debug, Clone, Default)]
pub struct CompressionStats {
    pub constants_specialized: u32,
    pub macros_fused: u32,
    pub rounds: u32,
}

pub struct Allocator {
    arena: Vec<Bytecode>,
    const_int: HashMap<i32, BytecodeId>,
    const_label: HashMap<(String, i32), BytecodeId>,
    static_ops: HashMap<Op, BytecodeId>,
    next_code: u16,
}

impl Allocator {
    pub fn new() -> Self {
        Allocator {
            arena: Vec::new(),
            const_int: HashMap::new(),
            const_label: HashMap::new(),
            static_ops: HashMap::new(),
            next_code: FIRST_BYTECODE as u16,
        }
    }

    pub fn get(&self, id: BytecodeId) -> &Bytecode {
        &self.arena[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (BytecodeId, &Bytecode)> {
        self.arena.iter().enumerate().map(|(i, bc)| (BytecodeId(i as u32), bc))
    }

    fn push(&mut self, bc: Bytecode) -> BytecodeId {
        self.arena.push(bc);
        BytecodeId((self.arena.len() - 1) as u32)
    }

    /// Checks the 32K pool cap (§4.3 "Failure semantics").
    pub fn check_pool_size(&self) -> Result<(), CoreError> {
        if self.arena.len() > MAX_POOL_SIZE {
            Err(CoreError::TooManyBytecodes)
        } else {
            Ok(())
        }
    }

    /// Phase 1: gives every non-pseudo instruction a bytecode.
    pub fn initial_assign(&mut self, program: &mut Program) {
        for list in &mut program.lists {
            for instr in &mut list.instrs {
                let assigned = self.assign_one(instr);
                instr.bytecode = assigned;
            }
        }
    }

    fn assign_one(&mut self, instr: &Instr) -> Option<BytecodeId> {
        match instr.op {
            Op::Label | Op::Align => None,
            Op::PushI => {
                let id = match self.const_int.get(&instr.val) {
                    Some(&id) => id,
                    None => {
                        let id = self.push_const(instr.val, false, None);
                        self.const_int.insert(instr.val, id);
                        id
                    }
                };
                self.arena[id.0 as usize].usage += 1;
                Some(id)
            }
            Op::PushA => {
                let label = instr.label.clone().unwrap_or_default();
                let key = (label.clone(), instr.val);
                let id = match self.const_label.get(&key) {
                    Some(&id) => id,
                    None => {
                        let id = self.push_const(instr.val, true, Some(label));
                        self.const_label.insert(key, id);
                        id
                    }
                };
                self.arena[id.0 as usize].usage += 1;
                Some(id)
            }
            op => {
                let id = match self.static_ops.get(&op) {
                    Some(&id) => id,
                    None => {
                        let id = self.push_static(op);
                        self.static_ops.insert(op, id);
                        id
                    }
                };
                self.arena[id.0 as usize].usage += 1;
                Some(id)
            }
        }
    }

    fn push_const(&mut self, value: i32, is_label: bool, label: Option<String>) -> BytecodeId {
        let name = label.unwrap_or_else(|| value.to_string());
        self.push(Bytecode {
            name,
            code: if is_label { PUSHA_BYTECODE as u16 } else { PUSHI_BYTECODE as u16 },
            value,
            is_label,
            usage: 0,
            impl_body: String::new(),
            impl_size: 5,
            is_const: true,
            is_any_branch: false,
            is_rel_branch: false,
            is_inline_asm: false,
            macro_depth: 0,
        })
    }

    fn push_static(&mut self, op: Op) -> BytecodeId {
        let name = op.name().to_string();
        let impl_body = if op.is_builtin() {
            format!("jmp #\\impl_{name}")
        } else {
            format!("impl_{name}:\n\t; template body\n_ret_\tret")
        };
        self.push(Bytecode {
            name,
            code: DIRECT_BYTECODE as u16,
            value: 0,
            is_label: false,
            usage: 0,
            impl_size: if op.is_builtin() { 1 } else { 3 },
            impl_body,
            is_const: false,
            is_any_branch: op.is_any_branch(),
            is_rel_branch: op.is_rel_branch(),
            is_inline_asm: matches!(op, Op::InlineAsm),
            macro_depth: 0,
        })
    }

    /// Phase 2: hands out one-byte opcodes in descending-usage order
    /// (§4.3 "Opcode number assignment").
    pub fn assign_opcodes(&mut self) {
        let mut order: Vec<usize> = (0..self.arena.len()).collect();
        order.sort_by(|&a, &b| self.arena[b].usage.cmp(&self.arena[a].usage));

        for idx in order {
            let bc = &mut self.arena[idx];
            if bc.is_const {
                bc.code = if bc.is_label { PUSHA_BYTECODE as u16 } else { PUSHI_BYTECODE as u16 };
                continue;
            }
            if bc.is_rel_branch {
                bc.code = self.next_code;
                self.next_code = self.next_code.saturating_add(1);
                continue;
            }
            if bc.usage <= 1 || self.next_code >= MAX_BYTECODE {
                bc.code = DIRECT_BYTECODE as u16;
                continue;
            }
            bc.code = self.next_code;
            self.next_code += 1;
        }
    }

    /// Phase 3: greedy constant-singleton / pair-macro compression
    /// (§4.3 "Greedy compression loop").
    pub fn compress(&mut self, program: &mut Program) -> CompressionStats {
        let mut stats = CompressionStats::default();
        loop {
            if self.next_code >= MAX_BYTECODE {
                break;
            }
            stats.rounds += 1;

            let const_candidate = self.find_constant_candidate();
            let macro_candidate = self.find_macro_candidate(program);

            let take_const = match (&const_candidate, &macro_candidate) {
                (Some((_, cs)), Some((_, _, _, ms))) => *cs >= *ms,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };

            if take_const {
                let (id, _) = const_candidate.unwrap();
                self.specialize_constant(id);
                stats.constants_specialized += 1;
            } else {
                let (a, b, count, _) = macro_candidate.unwrap();
                self.fuse_pair(program, a, b, count);
                stats.macros_fused += 1;
            }

            self.recompute_usage(program);
        }
        stats
    }

    fn recompute_usage(&mut self, program: &Program) {
        for bc in &mut self.arena {
            bc.usage = 0;
        }
        for list in &program.lists {
            for instr in &list.instrs {
                if let Some(id) = instr.bytecode {
                    self.arena[id.0 as usize].usage += 1;
                }
            }
        }
    }

    /// First-fit scan for a constant singleton candidate (§4.3: "it is not
    /// a search over all constants for the best one, it is first-fit in
    /// usage order"; "stop ... the moment the first candidate's savings
    /// are < 1").
    fn find_constant_candidate(&self) -> Option<(BytecodeId, i64)> {
        let mut order: Vec<usize> = (0..self.arena.len()).collect();
        order.sort_by(|&a, &b| self.arena[b].usage.cmp(&self.arena[a].usage));

        for idx in order {
            let bc = &self.arena[idx];
            if bc.is_const && bc.usage > 1 && bc.is_const_sentinel() {
                let impl_cost: i64 = if (-511..=511).contains(&bc.value) { 8 } else { 12 };
                let savings = 4i64 * bc.usage as i64 - impl_cost;
                return if savings >= 1 { Some((BytecodeId(idx as u32), savings)) } else { None };
            }
        }
        None
    }

    fn specialize_constant(&mut self, id: BytecodeId) {
        let code = self.next_code;
        self.next_code += 1;
        let bc = &mut self.arena[id.0 as usize];
        bc.code = code;

        if bc.is_label {
            let suffix = if bc.value != 0 { format!("_{}", bc.value) } else { String::new() };
            bc.name = format!("PUSH_{}{suffix}", bc.name);
        } else if bc.value >= 0 {
            bc.name = format!("PUSH_{}", bc.value);
        } else {
            bc.name = format!("PUSH_M{}", -(bc.value as i64));
        }

        let (mnemonic, imm) = if bc.value >= 0 && bc.value < 512 {
            ("mov".to_string(), format!("{}", bc.value))
        } else if bc.value >= 0 {
            ("mov".to_string(), format!("#{}", bc.value))
        } else {
            ("neg".to_string(), format!("#{}", -(bc.value as i64)))
        };
        bc.impl_body = format!("impl_{}:\n\tcall #\\impl_DUP\n_ret_\t{} tos, {}", bc.name, mnemonic, imm);
        bc.impl_size = 2;
    }

    /// Full rescan of every adjacent IR pair (§4.3: "the `macros[256][256]`
    /// count table is rebuilt from scratch each iteration").
    fn find_macro_candidate(&self, program: &Program) -> Option<(BytecodeId, BytecodeId, u32, i64)> {
        let mut counts: HashMap<(BytecodeId, BytecodeId), u32> = HashMap::new();

        for list in &program.lists {
            let mut prev: Option<BytecodeId> = None;
            for instr in &list.instrs {
                let cur = match instr.bytecode {
                    Some(id) if self.is_fusable(id) => Some(id),
                    _ => None,
                };
                if let (Some(p), Some(c)) = (prev, cur) {
                    *counts.entry((p, c)).or_insert(0) += 1;
                }
                prev = cur;
            }
        }

        counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .and_then(|((a, b), count)| {
                let savings = count as i64 - 10;
                if savings >= 1 { Some((a, b, count, savings)) } else { None }
            })
    }

    fn is_fusable(&self, id: BytecodeId) -> bool {
        let bc = &self.arena[id.0 as usize];
        !bc.is_inline_asm && !bc.is_rel_branch && bc.macro_depth < MAX_MACRO_DEPTH && bc.code >= FIRST_BYTECODE as u16
    }

    /// `NuMergeBytecodes` (§4.3): inline a body shorter than the
    /// call/jmp it would otherwise cost, else reference it.
    fn fuse_pair(&mut self, program: &mut Program, a: BytecodeId, b: BytecodeId, count: u32) {
        let (a_name, a_size, a_body, a_branch, a_depth) = {
            let bc = &self.arena[a.0 as usize];
            (bc.name.clone(), bc.impl_size, bc.impl_body.clone(), bc.is_any_branch, bc.macro_depth)
        };
        let (b_name, b_size, b_body, b_branch, b_depth) = {
            let bc = &self.arena[b.0 as usize];
            (bc.name.clone(), bc.impl_size, bc.impl_body.clone(), bc.is_any_branch, bc.macro_depth)
        };

        let first_half = if a_size < 3 {
            // Inline A's body; its `_ret_`/`jmp` become a fallthrough.
            a_body.replace("_ret_", "").replace("jmp", "call")
        } else {
            format!("call #\\impl_{a_name}")
        };
        let second_half = if b_size < 2 {
            b_body.clone()
        } else {
            format!("jmp #\\impl_{b_name}")
        };

        let name = format!("{a_name}_{b_name}");
        let code = self.next_code;
        self.next_code += 1;
        let fused = Bytecode {
            name: name.clone(),
            code,
            value: 0,
            is_label: false,
            usage: count,
            impl_body: format!("impl_{name}:\n\t{first_half}\n\t{second_half}"),
            impl_size: a_size.min(3) + b_size.min(2),
            is_const: false,
            is_any_branch: a_branch || b_branch,
            is_rel_branch: false,
            is_inline_asm: false,
            macro_depth: a_depth.max(b_depth) + 1,
        };
        let fused_id = self.push(fused);

        for list in &mut program.lists {
            let mut i = 0;
            while i + 1 < list.instrs.len() {
                let matches = list.instrs[i].bytecode == Some(a) && list.instrs[i + 1].bytecode == Some(b);
                if matches {
                    list.instrs[i].bytecode = Some(fused_id);
                    list.instrs[i].comment = Some(format!("fused -> {name}"));
                    list.instrs.remove(i + 1);
                } else {
                    i += 1;
                }
            }
        }
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}
