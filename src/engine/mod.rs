//! Engine modules: turn a declared topology into an ordered operation plan.
//!
//! The engine sits between the topology file (what the operator wants) and the
//! executor (which admin calls to issue). It performs no I/O.

pub mod plan;

pub use plan::{CollectionPlan, PlanBuilder, PlanError, PlanOperation, ProvisionPlan};
