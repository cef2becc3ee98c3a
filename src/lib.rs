#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod config;
pub mod error;
pub mod executor;
pub mod hyperv;
pub mod logging;
pub mod outcome;
pub mod params;
pub mod paths;
pub mod runner;
pub mod script;
pub mod session;

pub use config::{Config, RunnerConfig};
pub use error::HvError;
pub use executor::Executor;
pub use hyperv::HyperV;
pub use params::ParameterSet;
pub use runner::Runner;
pub use script::Script;
pub use session::{Credentials, RemoteHost, Session};
