//! Function normalisation & Spin-specific lowering (§4.2, component D/E).
//!
//! Each submodule is one independent tree rewrite; the driver in
//! [`crate::compile_core`] runs them in a fixed order against a function
//! body. All of them share [`temps::TempAllocator`] for materialising the
//! "fresh hidden locals" the spec calls for only when the corresponding
//! expression isn't already constant.

pub mod case;
pub mod longmove;
pub mod lookup;
pub mod postfix;
pub mod range;
pub mod repeat;
pub mod temps;
