pub mod cache;
pub mod cli;
pub mod config;
pub mod crawl;
pub mod error;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod recall;
pub mod resolver;
pub mod search;
pub mod server;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::ResolverError;
pub use resolver::{ResolveRequest, Resolver, ResolverContext, launch};
