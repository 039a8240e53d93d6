// The host platform seen through the two queries the CPU registry depends on.
//
// Three layers: abstraction (trait) -> facade (enum) -> real implementation, plus the
// mockall-generated mock in test builds and the public fake hardware from `crate::fake`.

mod abstractions;
mod facade;
mod real;

pub(crate) use abstractions::*;
pub(crate) use facade::*;
pub(crate) use real::*;
