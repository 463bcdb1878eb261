pub mod application;
pub mod cli;
pub mod domain;
pub mod io;
pub mod settings;
pub mod storage;

pub use domain::*;
pub use storage::Repository;
