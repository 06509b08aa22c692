pub mod archive;
pub mod resolver;
pub mod store;
