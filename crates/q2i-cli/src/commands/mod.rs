//! CLI subcommands.

pub mod decode;
pub mod encode;
pub mod run;
pub mod status;
