//! Scalar/field evaluation: opcodes, signal kernels, and field kernels.

pub mod field_kernel;
pub mod opcode;
pub mod signal_kernel;

pub use field_kernel::FieldKernel;
pub use opcode::{Arity, ArityError, Opcode};
pub use signal_kernel::{combine, noise1d, smoothstep, step, Easing, Waveform};
