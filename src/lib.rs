pub mod chunker;
pub mod config;
pub mod error;
pub mod import;
pub mod model;
pub mod pack;
pub mod paths;
pub mod payload;
pub mod scanner;
pub mod scorer;
pub mod server;
pub mod snippet;
pub mod store;
pub mod tree;
