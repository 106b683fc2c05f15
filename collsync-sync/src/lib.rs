//! # collsync-sync
//!
//! Reconciliation of source records against the collections registry.
//!
//! Call [`run`] with a [`SyncContext`] to reconcile a whole export. The
//! building blocks are public for callers that drive records themselves:
//! [`MatchIndex`] and [`match_record`] find candidates, [`classify`] maps
//! them to a [`MatchState`], and [`reconcile_record`] applies the matching
//! strategy through a [`CallExecutor`].

pub mod converter;
pub mod driver;
pub mod error;
pub mod executor;
pub mod index;
pub mod load;
pub mod matcher;
pub mod normalize;
pub mod outcome;
pub mod pipeline;
pub mod staff;
pub mod strategies;

pub use driver::{classify, reconcile_all, reconcile_record, MatchState};
pub use error::{NotifyError, StepFailed, SyncError};
pub use executor::{CallExecutor, EntityRef, FailedAction, Notifier};
pub use index::MatchIndex;
pub use matcher::{match_record, MatchResult};
pub use outcome::{
    BothOutcome, ConflictOutcome, EntityMatch, InvalidRecord, NoMatchOutcome,
    OnlyCollectionOutcome, OnlyInstitutionOutcome, Outcome, StaffConflict, StaffOutcome,
    Summary, SyncReport,
};
pub use pipeline::{run, SyncContext};
pub use strategies::Reconciler;
