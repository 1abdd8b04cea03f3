//! Core types for postcraft.
//!
//! This crate provides the foundational types shared by the store, the generation
//! pipeline and the HTTP service:
//!
//! - **Identifiers**: `AccountId`, `TransactionId`, `PaymentRecordId`, `ArtifactId`
//! - **Accounts**: `Account` and the ledger posting rules
//! - **Ledger**: `LedgerEntry`, `LedgerTransaction`, `TransactionKind`
//! - **Payments**: `ExternalPaymentRecord`, `PaymentStatus`
//! - **Content**: `GenerationRequest`, `GeneratedContent`, `PostingTime`, `GenerationArtifact`
//!
//! # Credit Unit
//!
//! Credits are whole units stored as `i64`. One plain generation costs 1 credit,
//! a tool-augmented generation costs 2.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod content;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod metadata;
pub mod payment;

pub use account::{Account, DEFAULT_STARTING_GRANT};
pub use content::{
    GeneratedContent, GenerationArtifact, GenerationMetadata, GenerationMode, GenerationRequest,
    Length, Platform, PostingTime, Tone, TOPIC_MAX_CHARS, TOPIC_MIN_CHARS,
};
pub use error::{BillingError, Result};
pub use ids::{AccountId, ArtifactId, IdError, PaymentRecordId, TransactionId};
pub use ledger::{LedgerEntry, LedgerTransaction, TransactionKind};
pub use metadata::{Metadata, MetadataValue};
pub use payment::{ExternalPaymentRecord, PaymentStatus};
