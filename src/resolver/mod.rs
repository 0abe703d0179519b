//! 依赖冲突求解流水线

pub mod agents;
pub mod context;
pub mod events;
pub mod fix;
pub mod outlet;
pub mod query;
pub mod research;
pub mod web_crawl;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{ResolverContext, SessionRun};
pub use events::{EventReceiver, EventSender, PipelineEvent, Stage, event_channel};
pub use workflow::{ResolveRequest, Resolver, TimingScope, launch};
