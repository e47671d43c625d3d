//! DANA Runtime — pipeline contract, orchestration cycle, guarded run loop.
//!
//! A concrete analysis implements [`Pipeline`] and one of the two shapes
//! ([`FanOutPipeline`] or [`LinearPipeline`]). The [`Orchestrator`] drives it
//! over every fetched item, isolating per-item failures by [`Phase`], and the
//! [`Runner`] repeats cycles under a single-instance [`ExecutionGuard`].
//!
//! [`Phase`]: dana_core::Phase

pub mod diagnostics;
pub mod failure;
pub mod guard;
pub mod orchestrator;
pub mod pipeline;
pub mod runner;
pub mod types;

pub use diagnostics::Diagnostics;
pub use failure::*;
pub use guard::{ExecutionGuard, GuardToken, PidFileGuard};
pub use orchestrator::Orchestrator;
pub use pipeline::*;
pub use runner::{Runner, Shutdown};
pub use types::*;
