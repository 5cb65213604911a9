//! Result persistence.

pub mod result_file;
