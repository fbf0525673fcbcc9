//! Standardized logging utility for Vitrine
//!
//! This module provides the `wlog!` and `wtrace!` macros. Both forward to
//! `tracing` and tag every event with a `module` field so log output can be
//! filtered per subsystem (`RUST_LOG` plus a `module=` field filter).

#[macro_export]
macro_rules! wlog {
    ($module:expr, $($arg:tt)*) => {{
        ::tracing::debug!(module = $module, "{}", format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! wtrace {
    ($module:expr, $($arg:tt)*) => {{
        ::tracing::trace!(module = $module, "{}", format_args!($($arg)*));
    }};
}

/// Standardized module identifiers
pub const MAIN: &str = "MAIN";
pub const CORE: &str = "CORE";
pub const WAYLAND: &str = "WAYLAND";
pub const COMPOSITOR: &str = "COMPOSITOR";
pub const STATE: &str = "STATE";
pub const BUFFER: &str = "BUFFER";
pub const OUTPUT: &str = "OUTPUT";
pub const BACKEND: &str = "BACKEND";
pub const RENDER: &str = "RENDER";
pub const FEEDBACK: &str = "FEEDBACK";
pub const ROLE: &str = "ROLE";
