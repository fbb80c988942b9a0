//! Profiling support via Tracy.
//!
//! Instrumentation is enabled with the `profiling` Cargo feature. Without it
//! every macro below expands to nothing.
//!
//! ```toml
//! [dependencies]
//! redgraph-core = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! # CPU Profiling
//!
//! ```ignore
//! use redgraph_core::{profile_function, profile_scope};
//!
//! fn record_pass() {
//!     profile_function!();
//!
//!     {
//!         profile_scope!("secondary_buffers");
//!         // ...
//!     }
//! }
//! ```
//!
//! # Frame Marking
//!
//! The frame graph calls [`frame_mark!`] once per presented frame.

#[cfg(feature = "profiling")]
pub use tracy_client::{
    self, Client, frame_mark as tracy_frame_mark, plot as tracy_plot, span,
};

/// Mark the end of a frame for Tracy's frame analysis.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! frame_mark {
    () => {
        $crate::profiling::tracy_frame_mark()
    };
}

/// Mark the end of a frame (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! frame_mark {
    () => {};
}

/// Create a profiling span for the current scope.
///
/// The span ends when the scope exits.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = $crate::profiling::span!($name);
    };
}

/// Create a profiling span (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope {
    ($name:expr) => {};
}

/// Create a profiling span covering the enclosing function.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_function {
    () => {
        let _profile_span = $crate::profiling::span!();
    };
}

/// Create a profiling span for function (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_function {
    () => {};
}

/// Plot a value over time in Tracy.
///
/// ```ignore
/// profile_plot!("deferred_resources", device.pending_resource_count());
/// ```
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        $crate::profiling::tracy_plot!($name, $value as f64)
    };
}

/// Plot a value (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        let _ = $value;
    };
}

/// Set the name of the current thread for Tracy.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! set_thread_name {
    ($name:expr) => {
        $crate::profiling::tracy_client::set_thread_name!($name)
    };
}

/// Set thread name (no-op when profiling disabled).
#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! set_thread_name {
    ($name:expr) => {};
}

/// Whether profiling instrumentation was compiled in.
pub const fn is_enabled() -> bool {
    cfg!(feature = "profiling")
}

// Re-export macros at module level
pub use frame_mark;
pub use profile_function;
pub use profile_plot;
pub use profile_scope;
pub use set_thread_name;
