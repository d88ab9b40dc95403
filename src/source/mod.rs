//! Input readers.

pub mod csv;
