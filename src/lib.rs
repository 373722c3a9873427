//! A composable, backpressure-aware async stream pipeline.
//!
//! A pipeline is a source followed by a sequence of stages. Pipelines are
//! immutable descriptions: every run builds fresh runtime state, so one
//! description can be run any number of times, concurrently.
//!
//! Flow control is a push/readiness handshake. Upstream pushes one item and waits
//! for the stage's readiness before pushing the next, so a slow consumer holds
//! back everything upstream of it instead of letting queues grow.
//!
//! # Features
//!
//! - Sources: fixed-rate ticks, repeat-as-fast-as-possible, caller-pushed items
//! - Stages: map, filter, flatMap, running reduce, bounded buffer
//! - Bounded-concurrency async mapping, ordered or in completion order
//! - Fire-and-forget side branches that skip items while busy
//! - Reusable partial pipelines that attach to any source
//! - Per-run metrics: emitted, delivered and dropped counts, delivery latency
//!
//! # Example
//!
//! ```no_run
//! use stream_flow::prelude::*;
//!
//! # async fn demo() -> stream_flow::Result<()> {
//! let running = pushable::<u32>()
//!     .filter(|n| n % 2 == 0)
//!     .map_async(4, |n| async move { Ok(n * 10) })
//!     .run(|n| async move {
//!         println!("{n}");
//!         Ok(())
//!     })?;
//!
//! running.input().initial_ready().await?;
//! for n in 0..10 {
//!     running.input().push(n).await?;
//! }
//! running.cancel().await;
//! # Ok(())
//! # }
//! ```

mod branch;
pub mod buffer;
mod chain;
pub mod context;
pub mod error;
pub mod logic;
pub mod metrics;
pub mod parallel;
pub mod partial;
pub mod pipeline;
mod slots;
pub mod source;
pub mod stage;

// Re-exports for convenience
pub use async_trait::async_trait;
pub use buffer::RingBuffer;
pub use context::FlowContext;
pub use error::{PipelineError, Result};
pub use logic::{ready_now, InitialReady, Logic, Next};
pub use metrics::{FlowMetrics, MetricsSnapshot};
pub use parallel::OutputOrder;
pub use partial::{FlowOps, PartialPipeline};
pub use pipeline::{pushable, repeat, tick, Pipeline, RunningPipeline};
pub use source::{PushHandle, Pushable, Repeat, Source, Tick};
pub use stage::{Stage, StageKind};

/// Everything needed to build and run pipelines
pub mod prelude {
    pub use crate::{
        pushable, repeat, tick, FlowOps, PartialPipeline, PipelineError, Result, Stage,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
