//! PASM `DEBUG` compiler (§4.4, component I): turns `DEBUG(...)` call sites
//! into a compact byte stream consumed by the on-chip debugger, and
//! assembles the final prologue + offset table + payload blob.
//!
//! Grounded on `original_source/backends/brkdebug.c`'s per-tag opcode byte,
//! which composes four independent bit-fields (signedness, size, numeric
//! type, array-ness) into one byte; that composition is modeled here with
//! [`bitflags`] rather than hand-rolled shifting, matching how this crate
//! uses `bitflags` elsewhere for PASM instruction modifiers.

use std::collections::HashMap;
use std::fmt::Write as _;

use bitflags::bitflags;
use itertools::iproduct;

use crate::consts::{DEBUG_TABLE_CAP, MAX_BRK_CODE};
use crate::error::CoreError;

bitflags! {
    /// The opcode byte prefixing a name-table tag's encoded arguments.
    ///
    /// Bits 7/6 are orthogonal flags; bits 5-4 hold one of four mutually
    /// exclusive sizes and bits 3-2 one of four mutually exclusive numeric
    /// types. Callers only ever combine one member from each field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugOpcodeByte: u8 {
        const SIGNED    = 0b1000_0000;
        const ARRAY     = 0b0100_0000;
        const SIZE_BYTE = 0b0001_0000;
        const SIZE_WORD = 0b0010_0000;
        const SIZE_LONG = 0b0011_0000;
        const TYPE_HEX  = 0b0000_0100;
        const TYPE_BIN  = 0b0000_1000;
        const TYPE_STR  = 0b0000_1100;
    }
}

/// Marker byte preceding a NUL-terminated string payload.
pub const DBC_STRING: u8 = 0xFE;
/// Marker byte preceding a compact-encoded integer payload.
pub const DBC_CHAR: u8 = 0xFF;
/// Threshold below which an integer is encoded as a plain two-byte value
/// rather than the 5-byte marker-plus-long form (§4.4 scenario S5).
const COMPACT_SMALL_LIMIT: i64 = 0x4000;
/// Register references encode as a 10-bit cog address with this 2-bit tag
/// in the high bits of the first byte (§4.4: `10XXXXXX XXXXXXXX`).
const REGISTER_TAG: u16 = 0b10 << 14;
const REGISTER_ADDR_LIMIT: u16 = 1024;

/// One name-table entry: the opcode byte it contributes and whether it is
/// a "simple" flow opcode (`if`/`ifnot`/`dly`), which may not take a `_`
/// suppression suffix (§4.4).
#[derive(Debug, Clone, Copy)]
struct TagInfo {
    opcode: DebugOpcodeByte,
    is_simple_flow: bool,
    /// Expected argument count: 2 for array forms (count + pointer), 1
    /// otherwise (§4.4: "Argument count is validated against an expected
    /// count").
    expected_args: u32,
}

fn numeric_entries(table: &mut HashMap<String, TagInfo>) {
    let types: [(&str, DebugOpcodeByte); 3] = [("dec", DebugOpcodeByte::empty()), ("hex", DebugOpcodeByte::TYPE_HEX), ("bin", DebugOpcodeByte::TYPE_BIN)];
    let signs: [(&str, DebugOpcodeByte); 2] = [("u", DebugOpcodeByte::empty()), ("s", DebugOpcodeByte::SIGNED)];
    let sizes: [(&str, DebugOpcodeByte); 4] = [
        ("", DebugOpcodeByte::empty()),
        ("_byte", DebugOpcodeByte::SIZE_BYTE),
        ("_word", DebugOpcodeByte::SIZE_WORD),
        ("_long", DebugOpcodeByte::SIZE_LONG),
    ];

    for ((sign_name, sign_bits), (type_name, type_bits), (size_suffix, size_bits)) in iproduct!(signs, types, sizes) {
        let base = format!("{sign_name}{type_name}{size_suffix}");
        let opcode = sign_bits | type_bits | size_bits;
        table.insert(
            base.clone(),
            TagInfo {
                opcode,
                is_simple_flow: false,
                expected_args: 1,
            },
        );
        // Array forms only make sense once a size has been fixed.
        if !size_suffix.is_empty() {
            table.insert(
                format!("{base}_array"),
                TagInfo {
                    opcode: opcode | DebugOpcodeByte::ARRAY,
                    is_simple_flow: false,
                    expected_args: 2,
                },
            );
        }
    }
}

fn build_tag_table() -> HashMap<String, TagInfo> {
    let mut table = HashMap::new();
    numeric_entries(&mut table);
    table.insert(
        "zstr".to_string(),
        TagInfo {
            opcode: DebugOpcodeByte::TYPE_STR,
            is_simple_flow: false,
            expected_args: 1,
        },
    );
    table.insert(
        "lstr".to_string(),
        TagInfo {
            opcode: DebugOpcodeByte::TYPE_STR | DebugOpcodeByte::ARRAY,
            is_simple_flow: false,
            expected_args: 2,
        },
    );
    for flow in ["if", "ifnot", "dly"] {
        table.insert(
            flow.to_string(),
            TagInfo {
                opcode: DebugOpcodeByte::empty(),
                is_simple_flow: true,
                expected_args: 1,
            },
        );
    }
    table
}

/// One argument passed to a `DEBUG(...)` call, already classified by the
/// parser/evaluator into the shape its name-table tag expects.
#[derive(Debug, Clone)]
pub enum DebugArgValue {
    Immediate(i64),
    StringLit(String),
    /// A PASM register reference, given its cog address.
    Register(u16),
}

/// One `DEBUG(...)` argument: the name-table tag it names (e.g. `udec`,
/// `uhex_long_array`), whether the caller wrote the `_`-suppressed form,
/// the source-expression text (used unless suppressed), and the
/// evaluated value.
#[derive(Debug, Clone)]
pub struct DebugArg {
    pub tag: String,
    pub suppress_expr: bool,
    pub expr_text: Option<String>,
    pub value: DebugArgValue,
}

/// A compiled `DEBUG(...)` site: its assigned `brkCode` and encoded byte
/// buffer.
#[derive(Debug, Clone)]
pub struct DebugSite {
    pub brk_code: u32,
    pub buffer: Vec<u8>,
}

/// Appends `value`'s compact encoding: two bytes big-endian when it fits
/// under [`COMPACT_SMALL_LIMIT`], else a 5-byte marker-plus-little-endian
/// long (§4.4 scenario S5).
fn push_compact_int(buf: &mut Vec<u8>, value: i64) {
    buf.push(DBC_CHAR);
    if (0..COMPACT_SMALL_LIMIT).contains(&value) {
        let v = value as u16;
        buf.push((v >> 8) as u8);
        buf.push((v & 0xFF) as u8);
    } else {
        buf.push(0x40);
        let v = value as u32;
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

fn push_string(buf: &mut Vec<u8>, s: &str) {
    buf.push(DBC_STRING);
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

fn push_register(buf: &mut Vec<u8>, addr: u16) -> Result<(), CoreError> {
    if addr >= REGISTER_ADDR_LIMIT {
        return Err(CoreError::UnexpectedShape {
            pass: "debugc",
            detail: format!("register address {addr:#x} exceeds 10-bit cog range"),
        });
    }
    let word = REGISTER_TAG | addr;
    buf.extend_from_slice(&word.to_be_bytes());
    Ok(())
}

/// Compiles and accumulates `DEBUG(...)` sites in source order, assigning
/// each a monotonically increasing `brkCode` (§4.4).
pub struct DebugCompiler {
    tags: HashMap<String, TagInfo>,
    sites: Vec<DebugSite>,
}

impl DebugCompiler {
    pub fn new() -> Self {
        DebugCompiler {
            tags: build_tag_table(),
            sites: Vec::new(),
        }
    }

    pub fn sites(&self) -> &[DebugSite] {
        &self.sites
    }

    /// Compiles one `DEBUG(...)` call into its byte buffer and assigns it
    /// the next `brkCode`.
    pub fn compile_site(&mut self, args: &[DebugArg]) -> Result<u32, CoreError> {
        let brk_code = self.sites.len() as u32;
        if brk_code >= MAX_BRK_CODE {
            return Err(CoreError::UnexpectedShape {
                pass: "debugc",
                detail: format!("brkCode {brk_code} exceeds the 256-site limit"),
            });
        }

        let mut buffer = Vec::new();
        let mut nocomma = false;
        for arg in args {
            let info = *self
                .tags
                .get(&arg.tag)
                .ok_or_else(|| CoreError::UndefinedSymbol(arg.tag.clone()))?;

            if info.is_simple_flow && arg.suppress_expr {
                return Err(CoreError::UnexpectedShape {
                    pass: "debugc",
                    detail: format!("flow tag `{}` may not use the `_` suppression suffix", arg.tag),
                });
            }

            if info.is_simple_flow {
                buffer.push(info.opcode.bits());
                self.push_arg_value(&mut buffer, arg)?;
                continue;
            }

            // Non-simple opcodes set a NOCOMMA flag on first use and, when
            // the source-expression text survived (no trailing `_`),
            // prepend it NUL-terminated ahead of the opcode byte (§4.4).
            let first_use = !nocomma;
            nocomma = true;
            if first_use {
                if let (false, Some(text)) = (arg.suppress_expr, arg.expr_text.as_deref()) {
                    buffer.extend_from_slice(text.as_bytes());
                    buffer.push(0);
                }
            }
            buffer.push(info.opcode.bits());
            self.push_arg_value(&mut buffer, arg)?;
        }

        self.sites.push(DebugSite { brk_code, buffer });
        Ok(brk_code)
    }

    fn push_arg_value(&self, buffer: &mut Vec<u8>, arg: &DebugArg) -> Result<(), CoreError> {
        match &arg.value {
            DebugArgValue::Immediate(v) => {
                push_compact_int(buffer, *v);
                Ok(())
            }
            DebugArgValue::StringLit(s) => {
                push_string(buffer, s);
                Ok(())
            }
            DebugArgValue::Register(addr) => push_register(buffer, *addr),
        }
    }

    /// The name-table tag's expected call-site argument count (2 for array
    /// forms — a count and a pointer — 1 otherwise). Validated by the
    /// caller against the actual `DEBUG(...)` call's argument list, since
    /// that list isn't visible at this layer once flattened into
    /// [`DebugArg`]s.
    pub fn expected_args(&self, tag: &str) -> Option<u32> {
        self.tags.get(tag).map(|info| info.expected_args)
    }
}

impl Default for DebugCompiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed offsets the prologue constants patch, in bytes from its start.
pub struct ProloguePatch {
    pub clkfreq_offset: usize,
    pub clkmode_offset: usize,
    pub debug_delay_offset: usize,
    pub debug_cogs_offset: usize,
}

/// Patches the four parser-visible constants into a copy of the prologue
/// template at their fixed offsets (§4.4, §6).
pub fn patch_prologue(template: &[u8], patch: &ProloguePatch, clkfreq: u32, clkmode: u32, debug_delay: u32, debug_cogs: u8) -> Vec<u8> {
    let mut out = template.to_vec();
    let write_u32 = |out: &mut Vec<u8>, offset: usize, value: u32| {
        if offset + 4 <= out.len() {
            out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
    };
    write_u32(&mut out, patch.clkfreq_offset, clkfreq);
    write_u32(&mut out, patch.clkmode_offset, clkmode);
    write_u32(&mut out, patch.debug_delay_offset, debug_delay);
    if patch.debug_cogs_offset < out.len() {
        out[patch.debug_cogs_offset] = debug_cogs;
    }
    out
}

/// Assembles the final DEBUG table: prologue bytes, a little-endian table
/// of per-`brkCode` offsets relative to the table's own start, then the
/// concatenated per-site payloads (§4.4, §6).
pub fn assemble_debug_table(prologue: &[u8], sites: &[DebugSite]) -> Result<Vec<u8>, CoreError> {
    let offsets_len = sites.len() * 2;
    let mut out = Vec::with_capacity(prologue.len() + offsets_len + sites.iter().map(|s| s.buffer.len()).sum::<usize>());
    out.extend_from_slice(prologue);

    let mut cursor = offsets_len;
    let mut offsets = Vec::with_capacity(sites.len());
    for site in sites {
        offsets.push(cursor as u16);
        cursor += site.buffer.len();
    }
    for offset in offsets {
        out.extend_from_slice(&offset.to_le_bytes());
    }
    for site in sites {
        out.extend_from_slice(&site.buffer);
    }

    if out.len() > DEBUG_TABLE_CAP {
        return Err(CoreError::DebugTableOverflow {
            size: out.len(),
            cap: DEBUG_TABLE_CAP,
        });
    }
    Ok(out)
}

/// Renders a diagnostic-friendly hex dump of a site's buffer, matching the
/// kind of terse formatting the teacher uses for byte-level test output.
pub fn hex_dump(buffer: &[u8]) -> String {
    let mut s = String::new();
    for (i, b) in buffer.iter().enumerate() {
        if i > 0 {
            s.push(' ');
        }
        let _ = write!(s, "{b:02X}");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imm_arg(tag: &str, value: i64) -> DebugArg {
        DebugArg {
            tag: tag.to_string(),
            suppress_expr: true,
            expr_text: None,
            value: DebugArgValue::Immediate(value),
        }
    }

    #[test]
    fn s5_small_compact_integer() {
        let mut dc = DebugCompiler::new();
        dc.compile_site(&[imm_arg("udec", 0x100)]).unwrap();
        let site = &dc.sites()[0];
        assert_eq!(site.buffer, vec![DebugOpcodeByte::empty().bits(), DBC_CHAR, 0x01, 0x00]);
    }

    #[test]
    fn s5_large_compact_integer() {
        let mut dc = DebugCompiler::new();
        dc.compile_site(&[imm_arg("udec", 0x40000)]).unwrap();
        let site = &dc.sites()[0];
        assert_eq!(site.buffer, vec![DebugOpcodeByte::empty().bits(), DBC_CHAR, 0x40, 0x00, 0x00, 0x04, 0x00]);
    }

    #[test]
    fn string_argument_is_nul_terminated() {
        let mut dc = DebugCompiler::new();
        let arg = DebugArg {
            tag: "zstr".to_string(),
            suppress_expr: true,
            expr_text: None,
            value: DebugArgValue::StringLit("hi".to_string()),
        };
        dc.compile_site(&[arg]).unwrap();
        let site = &dc.sites()[0];
        assert_eq!(site.buffer, vec![DebugOpcodeByte::TYPE_STR.bits(), DBC_STRING, b'h', b'i', 0]);
    }

    #[test]
    fn register_reference_encodes_ten_bit_address() {
        let mut dc = DebugCompiler::new();
        let arg = DebugArg {
            tag: "uhex".to_string(),
            suppress_expr: true,
            expr_text: None,
            value: DebugArgValue::Register(0x10),
        };
        dc.compile_site(&[arg]).unwrap();
        let site = &dc.sites()[0];
        assert_eq!(site.buffer[0], DebugOpcodeByte::TYPE_HEX.bits());
        let word = u16::from_be_bytes([site.buffer[1], site.buffer[2]]);
        assert_eq!(word >> 14, 0b10);
        assert_eq!(word & 0x3FF, 0x10);
    }

    #[test]
    fn register_reference_rejects_out_of_range_address() {
        let mut dc = DebugCompiler::new();
        let arg = DebugArg {
            tag: "uhex".to_string(),
            suppress_expr: true,
            expr_text: None,
            value: DebugArgValue::Register(2000),
        };
        assert!(dc.compile_site(&[arg]).is_err());
    }

    #[test]
    fn flow_tag_rejects_suppression_suffix() {
        let mut dc = DebugCompiler::new();
        let arg = DebugArg {
            tag: "if".to_string(),
            suppress_expr: true,
            expr_text: None,
            value: DebugArgValue::Immediate(1),
        };
        assert!(dc.compile_site(&[arg]).is_err());
    }

    #[test]
    fn unknown_tag_is_undefined_symbol() {
        let mut dc = DebugCompiler::new();
        assert!(dc.compile_site(&[imm_arg("not_a_tag", 1)]).is_err());
    }

    #[test]
    fn array_forms_require_a_size_suffix() {
        let table = build_tag_table();
        assert!(table.contains_key("udec_byte_array"));
        assert!(!table.contains_key("udec_array"));
    }

    #[test]
    fn expected_args_distinguishes_array_forms() {
        let dc = DebugCompiler::new();
        assert_eq!(dc.expected_args("udec"), Some(1));
        assert_eq!(dc.expected_args("udec_long_array"), Some(2));
        assert_eq!(dc.expected_args("not_a_tag"), None);
    }

    #[test]
    fn brk_codes_increment_monotonically() {
        let mut dc = DebugCompiler::new();
        let a = dc.compile_site(&[imm_arg("udec", 1)]).unwrap();
        let b = dc.compile_site(&[imm_arg("udec", 2)]).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn table_assembly_orders_prologue_offsets_then_payloads() {
        let mut dc = DebugCompiler::new();
        dc.compile_site(&[imm_arg("udec", 1)]).unwrap();
        dc.compile_site(&[imm_arg("udec", 2)]).unwrap();
        let prologue = vec![0xAAu8; 8];
        let table = assemble_debug_table(&prologue, dc.sites()).unwrap();
        assert_eq!(&table[..8], &prologue[..]);
        let site0_len = dc.sites()[0].buffer.len();
        let offset0 = u16::from_le_bytes([table[8], table[9]]);
        let offset1 = u16::from_le_bytes([table[10], table[11]]);
        assert_eq!(offset0 as usize, 4);
        assert_eq!(offset1 as usize, 4 + site0_len);
    }

    #[test]
    fn oversized_table_is_rejected() {
        let mut dc = DebugCompiler::new();
        dc.compile_site(&[imm_arg("udec", 1)]).unwrap();
        let huge_prologue = vec![0u8; DEBUG_TABLE_CAP + 1];
        assert!(assemble_debug_table(&huge_prologue, dc.sites()).is_err());
    }
}
