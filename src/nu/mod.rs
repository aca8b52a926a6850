//! Nu bytecode back-end (§4.3, components G/H): a linear stack-machine IR
//! ([`ir`]) and the opcode allocator that compresses it into one-byte
//! opcodes ([`alloc`]).

pub mod alloc;
pub mod ir;
