pub mod defs;
pub mod requests;
