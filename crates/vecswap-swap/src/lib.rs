//! vecswap-swap — replaces the active index version without downtime.
//!
//! # State machine
//!
//! ```text
//! Idle --begin_swap--> Validating
//! Validating --checks pass--> Migrating
//! Validating --any check fails--> Failed
//! Migrating --tick, step judged--> Migrating (traffic += step)
//! Migrating --100% judged clean--> Completed
//! Migrating --regression | cancel | no baseline--> RollingBack
//! RollingBack --split cleared--> RolledBack | Cancelled
//! ```
//!
//! Only one operation is ever non-terminal. The controller is the only
//! component that decides between rollback and hard failure; the registry
//! and router just report typed errors.

pub mod controller;
pub mod error;
pub mod validation;

pub use controller::{SwapController, SwapOptions};
pub use error::{SwapError, SwapResult};
pub use validation::{ValidationReport, run_checklist};
