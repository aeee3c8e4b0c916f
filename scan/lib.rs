pub mod combinations;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod genotype;
pub mod io;
pub mod kernel;
pub mod pipeline;
pub mod purity;
pub mod results;
pub mod types;
