//! Approval Domain Types
//!
//! Compliance validations do not resolve themselves. When a validation
//! produces errors or warnings, a human has to sign off on it, and the
//! approval has to move up the chain of authority if nobody acts in time.
//!
//! # Key Concepts
//!
//! - **WorkflowTemplate**: A versioned, tenant-scoped blueprint. It owns the
//!   ordered approval steps, the routing rules that decide when it applies,
//!   and the approval matrix that decides who may act at each level.
//! - **RoutingRule / ConditionTree**: Conditions over a [`ValidationSnapshot`].
//!   Rules are compiled once into an explicit `Leaf | All | Any` tree.
//! - **MatrixEntry / ApproverPolicy**: Who may resolve a request at a level,
//!   how many distinct approvers are needed, and the authority ceilings.
//! - **ApprovalInstance**: The runtime aggregate. A small state machine with
//!   an append-only history and comment log.
//! - **ApprovalEvent**: Domain events emitted for notification and audit.
//!
//! # Design Principles
//!
//! 1. Every transition goes through the aggregate and leaves a history entry.
//! 2. An instance keeps the policy it was created under; template edits never
//!    reach back into open approvals.
//! 3. Malformed routing configuration degrades to "no match", never to a panic.

#![deny(unsafe_code)]

mod errors;
mod event;
mod history;
mod ids;
mod instance;
mod matrix;
mod rule;
mod snapshot;
mod stats;
mod template;

pub use errors::*;
pub use event::*;
pub use history::*;
pub use ids::*;
pub use instance::*;
pub use matrix::*;
pub use rule::*;
pub use snapshot::*;
pub use stats::*;
pub use template::*;
