//! collsync core library — domain types, registry contract, config, errors.
//!
//! - [`types`] — registry entities and value types
//! - [`ids`] — idempotent identifier / tag / master-source helpers
//! - [`source`] — source records and the [`ExternalSource`] contract
//! - [`registry`] — [`RegistrySource`] contract and [`SnapshotRegistry`]
//! - [`config`] — YAML run configuration
//! - [`error`] — [`RegistryError`], [`ConfigError`], [`SourceError`]

pub mod config;
pub mod error;
pub mod ids;
pub mod registry;
pub mod source;
pub mod types;

pub use config::{StaffThresholds, SyncConfig};
pub use error::{ConfigError, RegistryError, SourceError};
pub use registry::{RegistrySnapshot, RegistrySource, SnapshotRegistry};
pub use source::{ExternalRef, ExternalSource, SourceKind, SourceRecord, SourceStaff};
pub use types::{
    Address, AlternativeCode, Collection, EntityKey, EntityKind, Identifier, IdentifierType,
    Institution, MachineTag, MasterSource, MasterSourceMetadata, Person,
};
