//! Command implementations for the Finetune CLI.

pub mod base;
pub mod runs;
pub mod train;
