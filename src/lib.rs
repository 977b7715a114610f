//! dlagent: per-request identity and configuration core of a data-lake access gateway.
//!
//! A request arrives as a set of `X-GP-*` headers, becomes a `RequestContext`, picks up its
//! server's `Configuration`, and runs backend work under an effective identity through
//! `security::IdentityExecutor`. Kerberos-sensitive calls go through `retry::RetryingOperationExecutor`.

pub mod error;
pub mod config;
pub mod config_factory;
pub mod context;
pub mod request_parser;
pub mod retry;
pub mod security;

// Trace output for tests and debug builds only.
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// Release: no output, format arguments still type-checked.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        if false { let _ = format!($($arg)*); }
    });
}
