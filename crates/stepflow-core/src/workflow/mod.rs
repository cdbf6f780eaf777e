//! Workflow engine - sequential execution of model-invocation steps.
//!
//! # Architecture
//!
//! ```text
//! run request ──► RunOrchestrator ──► WorkflowStore (status, step results)
//!                      │
//!        per step:  template::resolve ──► StepInvoker ──► criteria::evaluate
//!                      │                      │
//!                      ▼                 ModelService (HTTP)
//!             NotificationChannel ──► observers
//! ```

pub mod criteria;
pub mod executor;
pub mod invoker;
pub mod model_service;
pub mod schema;
pub mod template;

pub use executor::{RunHandle, RunOrchestrator, RunOutcome};
pub use invoker::{InvocationError, InvocationErrorKind, StepInvoker};
pub use model_service::{HttpModelService, ModelService, ModelServiceError};
pub use schema::WorkflowDefinition;
pub use template::TemplateError;
