//! External service clients used by the upload pipeline

pub mod imagehost;
