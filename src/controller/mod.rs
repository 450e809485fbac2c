pub mod executor;
pub mod reflection;
pub mod error_analyzer;
