//! SQLite-backed persistence for the Compass action core.
//!
//! Provides the `Database` wrapper plus repositories for the execution queue,
//! workflow runs, delegation contracts, and the authorization ledger.

pub mod db;
pub mod ledger;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use ledger::{ArtifactRepository, ContractRepository, EffectRepository, ProposalRepository};
pub use repository::{ExecutionRepository, RunRepository, WorkflowRepository};
