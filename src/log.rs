//! Feature-gated logging macros.
//!
//! With the `tracing` feature these are the `tracing` macros, without it they expand to nothing.

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, trace, warn};

#[cfg(not(feature = "tracing"))]
macro_rules! log_trace {
    ($($t:tt)*) => {{}};
}

#[cfg(not(feature = "tracing"))]
macro_rules! log_debug {
    ($($t:tt)*) => {{}};
}

#[cfg(not(feature = "tracing"))]
macro_rules! log_warn {
    ($($t:tt)*) => {{}};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use {log_debug as debug, log_trace as trace, log_warn as warn};
