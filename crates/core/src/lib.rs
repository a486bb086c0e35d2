pub mod config;
pub mod experiment;
pub mod parsers;

pub use cctree_model as model;
pub use config::ReaderConfig;
pub use experiment::Experiment;
pub use parsers::{Error, ErrorKind};
