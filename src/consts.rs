//! Fixed numeric constants shared across passes.

/// Opcode reserved for pointer-dispatched ("direct") bytecodes.
pub const DIRECT_BYTECODE: u8 = 0;
/// Opcode reserved for `PUSHI` (immediate long) before/unless it is compressed.
pub const PUSHI_BYTECODE: u8 = 1;
/// Opcode reserved for `PUSHA` (immediate address) before/unless it is compressed.
pub const PUSHA_BYTECODE: u8 = 2;
/// First opcode number available for compression/direct assignment.
pub const FIRST_BYTECODE: u8 = 3;
/// One past the last assignable opcode; codes `>= MAX_BYTECODE` don't exist.
pub const MAX_BYTECODE: u16 = 0xF8;

/// Bound on recursive macro fusion depth (§4.3, §9).
pub const MAX_MACRO_DEPTH: u32 = 4;

/// Once `callSites` reaches this, further call-site marking short-circuits (§4.2).
pub const CALLSITES_MANY: u32 = 10;

/// Maximum `brkCode` a single DEBUG site may be assigned (§4.4).
pub const MAX_BRK_CODE: u32 = 256;

/// Total DEBUG table size cap, in bytes (§4.4, §6).
pub const DEBUG_TABLE_CAP: usize = 0xEC00;

/// Base address the DEBUG table's size cap is expressed against (§4.4).
pub const DEBUG_BASE: usize = 0xFC000;

/// Absolute ceiling implied by [`DEBUG_BASE`] + [`DEBUG_TABLE_CAP`] (§4.4).
pub const DEBUG_CEILING: usize = 0xFEC00;

/// Default `_clkfreq_con`, in Hz, when the Spin source doesn't override it (§6).
pub const DEFAULT_CLKFREQ: u32 = 10_000_000;

/// Default `DEBUG_COGS` mask: all eight cogs (§6).
pub const DEFAULT_DEBUG_COGS: u8 = 0xFF;
