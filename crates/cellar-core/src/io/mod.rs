//! I/O primitives: verified downloads and archive extraction.

pub mod extract;
pub mod fetch;
