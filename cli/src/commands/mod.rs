pub mod cli;
pub mod collect;
pub mod status;
