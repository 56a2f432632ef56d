//! Low-level compute kernels: AES-round generators and floating-point
//! environment control.
//!
//! Everything in this module is deterministic and platform-independent in its
//! output; only the execution speed differs between targets.

pub(crate) mod aes;
pub(crate) mod constants;
pub(crate) mod fenv;
