//! Feature lifecycle orchestration.
//!
//! [`FeatureOrchestrator`] owns the feature registry, drives the lifecycle
//! state machine, orders startup by dependency, runs the periodic health
//! loop and is the guarded call surface for the rest of the host.

mod guard;
mod monitoring;
mod ordering;
mod registry;
mod shutdown;
mod startup;
mod state;
mod types;


pub use registry::FeatureOrchestrator;
pub use types::{FeatureState, ShutdownSummary, StartupSummary};
