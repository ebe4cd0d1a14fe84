pub mod cli;
pub mod diagnostics;
pub mod federation;
pub mod generate;
pub mod helpers;
pub mod model;
pub mod serialization;
pub mod target;
