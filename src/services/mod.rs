//! Service layer: admission, lifecycle, provider routing and the engine
//! that ties them together.

pub mod admission;
pub mod cancellation;
pub mod circuit_breaker;
pub mod cost_tracker;
pub mod engine;
pub mod export_trigger;
pub mod metrics;
pub mod provider_gateway;
pub mod result_assembler;
pub mod state_machine;
pub mod worker_pool;

pub use admission::{AdmissionController, AdmissionDecision, AdmissionPolicy};
pub use cancellation::{CancelCause, CancellationRegistry};
pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerService, CircuitState};
pub use cost_tracker::estimate_cost_or_fallback;
pub use engine::{AnalysisEngine, CancelOutcome, EngineComponents, EngineSettings};
pub use export_trigger::ExportTrigger;
pub use provider_gateway::{GatewayOutcome, ProviderGateway, ProviderRegistry};
pub use state_machine::{Milestone, TaskStateMachine};
pub use worker_pool::WorkerPool;
