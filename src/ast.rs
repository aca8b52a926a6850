//! AST model (§3, component B).
//!
//! The original representation is a single tagged node (`kind`, `line`,
//! `left`, `right`, a payload union). Per the Design Notes (§9) this is
//! modeled here as a genuine sum type: each variant carries only the
//! payload it needs, so passes become exhaustive `match`es that the
//! compiler checks for missed kinds, rather than `kind`-tag dispatch over a
//! generic two-child shape.

use crate::symbol::ScopeId;

pub type Line = u32;

/// Binary operators (§4.1). Matches the original `EvalIntOperator`/
/// `EvalFloatOperator` dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitOr,
    BitAnd,
    BitXor,
    Shl,
    Shr,
    Sar,
    Rotl,
    Rotr,
    HighMult,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    LimitMin,
    LimitMax,
    /// `a[hi..lo]` read, pre-lowering.
    IsBetween,
    LogicalAnd,
    LogicalOr,
}

/// Unary operators (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnOp {
    Negate,
    BitNot,
    Abs,
    Sqrt,
    /// Position of the highest set bit.
    Encode,
    /// `1 << x`.
    Decode,
}

/// Type nodes recognised by the type engine (§4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeNode {
    Int(u32),
    Unsigned(u32),
    Generic(u32),
    Float,
    Ptr(Box<TypeNode>),
    Array(Box<TypeNode>, u32),
    Void,
}

impl TypeNode {
    pub fn size(&self) -> u32 {
        match self {
            TypeNode::Int(n) | TypeNode::Unsigned(n) | TypeNode::Generic(n) => *n,
            TypeNode::Float => 4,
            TypeNode::Ptr(_) => 4,
            TypeNode::Array(elem, count) => elem.size() * count,
            TypeNode::Void => 0,
        }
    }

    pub fn alignment(&self) -> u32 {
        match self {
            TypeNode::Array(elem, _) => elem.alignment(),
            other => other.size().max(1),
        }
    }

    /// int-family and generic are mutually compatible; float is treated as
    /// generic for compatibility; pointers compatible iff element types
    /// match (§4.1).
    pub fn compatible(&self, other: &TypeNode) -> bool {
        use TypeNode::*;
        match (self, other) {
            (Ptr(a), Ptr(b)) => a.compatible(b),
            (Ptr(_), _) | (_, Ptr(_)) => false,
            (Array(a, na), Array(b, nb)) => na == nb && a.compatible(b),
            (Array(_, _), _) | (_, Array(_, _)) => false,
            (Void, Void) => true,
            (Void, _) | (_, Void) => false,
            _ => true,
        }
    }

    /// Strict equality of type shape (§4.1).
    pub fn same(&self, other: &TypeNode) -> bool {
        self == other
    }
}

/// A reference to a hardware register (`OUTA`, `DIRA`, ...), opaque to this
/// crate beyond its address and name (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HwRegRef {
    pub name: String,
    pub addr: u32,
}

/// One `DEBUG(...)` argument (§4.4), pre-compilation.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DebugArg {
    Str(Vec<u8>),
    IntLit(i64),
    Expr(Box<Ast>),
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DebugCall {
    pub tag: String,
    /// A trailing `_` on the tag name suppresses the embedded source
    /// expression text (§4.4).
    pub suppress_source_text: bool,
    pub args: Vec<DebugArg>,
    pub source_text: Option<String>,
}

/// Counting-repeat shape before lowering (§4.2); `step` is `None` for the
/// bare `REPEAT n BODY` form.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RepeatCounting {
    pub line: Line,
    pub var: Box<Ast>,
    pub from: Box<Ast>,
    pub to: Option<Box<Ast>>,
    pub step: Option<Box<Ast>>,
    pub body: Box<Ast>,
}

/// Canonical for-loop kind chosen during lowering (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ForKind {
    /// Ordinary `while (cond) { body; step }`-shaped loop.
    For,
    /// Execution-at-least-once is statically derivable: `do { body; step }
    /// while (cond)`.
    ForAtLeastOnce,
}

/// Canonical counting loop after lowering (§4.2).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ForLoop {
    pub kind: ForKind,
    pub line: Line,
    /// `None` when the bound expressions were constant and no hidden local
    /// was needed.
    pub init: Option<Box<Ast>>,
    pub cond: Box<Ast>,
    pub step: Box<Ast>,
    pub body: Box<Ast>,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CaseArm {
    /// `true` for a range arm (lowered with `ISBETWEEN`).
    pub is_range: bool,
    pub test: Box<Ast>,
    pub body: Box<Ast>,
}

/// Sum type for every AST shape this crate's passes consume or produce.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Ast {
    IntLit {
        line: Line,
        val: i32,
    },
    FloatLit {
        line: Line,
        val: f32,
    },
    StringLit {
        line: Line,
        bytes: Vec<u8>,
    },
    Ident {
        line: Line,
        name: String,
    },
    /// `OBJ#NAME` cross-module constant reference (§4.1).
    ConstRef {
        line: Line,
        module: String,
        name: String,
    },
    /// `@label` — byte offset of a label.
    AddrOf {
        line: Line,
        target: Box<Ast>,
    },
    /// `@@@label` — `offset + dat_base`, if known.
    AddrOfAbs {
        line: Line,
        target: Box<Ast>,
    },
    Unary {
        line: Line,
        op: UnOp,
        operand: Box<Ast>,
    },
    Binary {
        line: Line,
        op: BinOp,
        lhs: Box<Ast>,
        rhs: Box<Ast>,
    },
    /// `REV(a, n)`.
    Rev {
        line: Line,
        val: Box<Ast>,
        bits: Box<Ast>,
    },
    Assign {
        line: Line,
        lhs: Box<Ast>,
        rhs: Box<Ast>,
    },
    /// `x~` (zero) / `x~~` (minus-one) post-effect, pre-lowering (§4.2).
    PostEffect {
        line: Line,
        target: Box<Ast>,
        assign_minus_one: bool,
    },
    HwReg {
        line: Line,
        reg: HwRegRef,
    },
    /// `hi..lo` pair, pre-lowering.
    Range {
        line: Line,
        hi: Box<Ast>,
        lo: Box<Ast>,
    },
    /// `target[hi..lo]`, read position, pre-lowering.
    RangeRef {
        line: Line,
        target: Box<Ast>,
        hi: Box<Ast>,
        lo: Box<Ast>,
    },
    /// `target[hi..lo] := src`, pre-lowering.
    RangeAssign {
        line: Line,
        target: Box<Ast>,
        hi: Box<Ast>,
        lo: Box<Ast>,
        src: Box<Ast>,
    },
    Type(TypeNode),
    RepeatCounting(RepeatCounting),
    ForLoop(ForLoop),
    If {
        line: Line,
        cond: Box<Ast>,
        then_branch: Box<Ast>,
        else_branch: Option<Box<Ast>>,
    },
    Case {
        line: Line,
        scrutinee: Box<Ast>,
        arms: Vec<CaseArm>,
    },
    Block {
        line: Line,
        stmts: Vec<Ast>,
    },
    Return {
        line: Line,
        value: Option<Box<Ast>>,
    },
    Abort {
        line: Line,
        value: Option<Box<Ast>>,
    },
    FuncCall {
        line: Line,
        name: String,
        args: Vec<Ast>,
    },
    /// `COGINIT(cog, function(args))`.
    CogInit {
        line: Line,
        cog: Box<Ast>,
        function: String,
        args: Vec<Ast>,
    },
    /// `LOOKUP(ix : e1, e2, ...)`, pre-lowering.
    Lookup {
        line: Line,
        index: Box<Ast>,
        items: Vec<Ast>,
    },
    /// Synthetic DAT array declaration, hoisted to a function's
    /// `extradecl` list when a constant `LOOKUP(...)` table is extracted
    /// (§4.2). `items[i]` is element `i`, one word each regardless of each
    /// item's own bit width.
    ArrayDecl {
        line: Line,
        name: String,
        items: Vec<Ast>,
    },
    /// `name[index]`, a whole-element read out of an `ArrayDecl`-declared
    /// array. Distinct from `RangeRef`, which reads a bit field out of a
    /// single word rather than selecting one element of a word array.
    Index {
        line: Line,
        name: String,
        index: Box<Ast>,
    },
    /// `longmove(@dst, @src, n)`.
    Longmove {
        line: Line,
        dst: Box<Ast>,
        src: Box<Ast>,
        count: Box<Ast>,
    },
    BrkDebug {
        line: Line,
        call: DebugCall,
    },
    /// Opaque pointer to a PASM `Instruction` (§6); carried through
    /// unmodified by every pass that isn't the PASM emitter.
    InstrHolder {
        line: Line,
        text: String,
    },
    /// Opaque pointer to an `InstrModifier` (§6: `wz`, `wc`, `wr`, `nr`,
    /// `if_*`, `#`).
    InstrModifier {
        line: Line,
        name: String,
    },
}

impl Ast {
    pub fn line(&self) -> Line {
        match self {
            Ast::IntLit { line, .. }
            | Ast::FloatLit { line, .. }
            | Ast::StringLit { line, .. }
            | Ast::Ident { line, .. }
            | Ast::ConstRef { line, .. }
            | Ast::AddrOf { line, .. }
            | Ast::AddrOfAbs { line, .. }
            | Ast::Unary { line, .. }
            | Ast::Binary { line, .. }
            | Ast::Rev { line, .. }
            | Ast::Assign { line, .. }
            | Ast::PostEffect { line, .. }
            | Ast::HwReg { line, .. }
            | Ast::Range { line, .. }
            | Ast::RangeRef { line, .. }
            | Ast::RangeAssign { line, .. }
            | Ast::If { line, .. }
            | Ast::Case { line, .. }
            | Ast::Block { line, .. }
            | Ast::Return { line, .. }
            | Ast::Abort { line, .. }
            | Ast::FuncCall { line, .. }
            | Ast::CogInit { line, .. }
            | Ast::Lookup { line, .. }
            | Ast::ArrayDecl { line, .. }
            | Ast::Index { line, .. }
            | Ast::Longmove { line, .. }
            | Ast::BrkDebug { line, .. }
            | Ast::InstrHolder { line, .. }
            | Ast::InstrModifier { line, .. } => *line,
            Ast::Type(_) => 0,
            Ast::RepeatCounting(r) => r.line,
            Ast::ForLoop(f) => f.line,
        }
    }

    pub fn int_lit(line: Line, val: i32) -> Ast {
        Ast::IntLit { line, val }
    }

    pub fn ident(line: Line, name: impl Into<String>) -> Ast {
        Ast::Ident { line, name: name.into() }
    }
}

/// A function as the parser hands it over, mutated in place by
/// normalisation and inference, destroyed with its owning module (§3).
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub locals: Vec<String>,
    pub body: Vec<Ast>,
    /// `localsyms.parent == module.objsyms` (§3).
    pub localsyms: ScopeId,
    pub numparams: u32,
    pub numlocals: u32,
    pub rettype: TypeNode,
    pub resultexpr: Option<Ast>,
    pub is_public: bool,
    pub is_static: bool,
    pub force_static: bool,
    pub is_leaf: bool,
    pub is_recursive: bool,
    pub cog_task: bool,
    pub call_sites: u32,
    pub visit_flag: bool,
    pub parmarray: bool,
    pub localarray: bool,
    pub result_used: bool,
    pub doccomment: Option<String>,
    pub annotations: Vec<String>,
    pub extradecl: Vec<Ast>,
}

impl Function {
    pub fn new(name: impl Into<String>, localsyms: ScopeId) -> Self {
        Function {
            name: name.into(),
            params: Vec::new(),
            locals: Vec::new(),
            body: Vec::new(),
            localsyms,
            numparams: 0,
            numlocals: 0,
            rettype: TypeNode::Generic(4),
            resultexpr: Some(Ast::ident(0, "result")),
            is_public: false,
            is_static: true,
            force_static: false,
            is_leaf: true,
            is_recursive: false,
            cog_task: false,
            call_sites: 0,
            visit_flag: false,
            parmarray: false,
            localarray: false,
            result_used: false,
            doccomment: None,
            annotations: Vec::new(),
            extradecl: Vec::new(),
        }
    }
}

/// A module, owning its functions exclusively; modules reference each
/// other only via `Object` symbols (§3).
#[derive(Debug)]
pub struct Module {
    pub classname: String,
    pub objsyms: ScopeId,
    pub functions: Vec<Function>,
    pub datblock: Vec<Ast>,
    pub conblock: Vec<Ast>,
    pub funcblock: Vec<Ast>,
    /// Set when any code takes the address of a module variable (§5):
    /// downstream passes must not assume non-aliasing.
    pub volatile_variables: bool,
    pub needs_coginit: bool,
    pub pasm_labels: Vec<String>,
    pub needs_min_max: bool,
    /// Byte offset of the DAT base once laid out; `-1` before layout (§5).
    pub dat_offset: i64,
}

impl Module {
    pub fn new(classname: impl Into<String>, objsyms: ScopeId) -> Self {
        Module {
            classname: classname.into(),
            objsyms,
            functions: Vec::new(),
            datblock: Vec::new(),
            conblock: Vec::new(),
            funcblock: Vec::new(),
            volatile_variables: false,
            needs_coginit: false,
            pasm_labels: Vec::new(),
            needs_min_max: false,
            dat_offset: -1,
        }
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn find_function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }
}

#[cfg(all(test, feature = "serde"))]
mod serde_tests {
    use super::*;

    #[test]
    fn ast_payload_round_trips_through_json() {
        let ast = Ast::Binary {
            line: 12,
            op: BinOp::Add,
            lhs: Box::new(Ast::int_lit(12, 1)),
            rhs: Box::new(Ast::ident(12, "x")),
        };
        let json = serde_json::to_string(&ast).unwrap();
        let back: Ast = serde_json::from_str(&json).unwrap();
        assert_eq!(format!("{ast:?}"), format!("{back:?}"));
    }
}
