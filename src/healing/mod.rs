//! Healing Orchestrator and its collaborators
//!
//! Issues are resolved to an integration, gated by the integration's attempt
//! budget, cooldown and circuit breaker, then handed to a
//! [`RemediationExecutor`]. Every decision produces a
//! [`HealingOutcome`](crate::types::HealingOutcome); decisions that stop
//! automation also produce an [`Escalation`](crate::types::Escalation).

mod orchestrator;
mod remediation;
mod resolver;

pub use orchestrator::{HealingOrchestrator, HealingPolicy, SweepReport, Trigger};
pub use remediation::{ControllerRemediator, RemediationError, RemediationExecutor};
pub use resolver::{ControllerResolver, IntegrationResolver, ResolveError, StaticResolver};
