//! # leadsync protocol
//!
//! Data types shared by the leadsync cache, engine and CLI.
//!
//! This crate provides:
//! - [`LeadRecord`] and [`LeadStatus`] for leads as the remote store holds them
//! - [`SourceContact`] and [`Candidate`] for contacts coming from the source system
//! - [`FieldMap`] for custom field property/system name translation
//! - [`ActionCode`], [`LeadOperation`] and [`OperationBatch`] for planned writes
//! - JSON-RPC request/response helpers for the Sharpspring API
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod field_map;
mod lead;
mod operation;
pub mod rpc;
mod source;

pub use error::{ProtocolError, ProtocolResult, ValidationError};
pub use field_map::FieldMap;
pub use lead::{
    normalize_email, FieldKey, LeadRecord, LeadStatus, RemoteId, REMOTE_TIMESTAMP_FORMAT,
};
pub use operation::{ActionCode, BatchKind, LeadOperation, OperationBatch};
pub use rpc::{ObjectError, ObjectErrorKind, RecordOutcome};
pub use source::{Candidate, SourceContact};
