pub mod config;
pub mod environment;
pub mod error;
pub mod io;
pub mod paths;
pub mod retry;
pub mod run;
pub mod store;
pub mod template;
pub mod types;

pub use error::{AdwError, Result};
