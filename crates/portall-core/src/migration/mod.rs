//! Migration chain for Portall schemas.
//!
//! This module provides:
//! - Schema diffing between the live database and the declared model
//! - Immutable, linearly linked migration steps
//! - An on-disk store holding the chain and the applied-version marker
//! - Fail-fast application of pending steps with per-step outcomes
//!
//! # Example
//!
//! ```ignore
//! use portall_core::migration::MigrationStore;
//!
//! let store = MigrationStore::new("./migrations");
//! if store.initialize()? {
//!     store.generate_initial(&model)?;
//! }
//! let report = store.apply(&db)?;
//! println!("applied {} steps", report.applied_count());
//! ```

pub mod diff;
pub mod error;
pub mod state;
pub mod step;
pub mod store;

pub use diff::{ColumnChange, SchemaDiff, TableChange};
pub use error::MigrationError;
pub use state::{ApplyReport, StepOutcome, StepReport};
pub use step::{generate_step_id, MigrationStep, SchemaOperation};
pub use store::MigrationStore;
