//! Foundation module - logging setup shared by binaries built on this crate

pub mod logging;
