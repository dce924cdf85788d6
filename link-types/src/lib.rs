//! # pairlink-types
//!
//! Shared types for the pairlink pairing and relay backend.
//!
//! This crate provides the foundational types used across pairlink crates:
//! - [`PrincipalId`], [`RequestId`] - Identity types
//! - [`RelayMessage`] - A message waiting in a recipient's relay queue
//! - [`OutboundFrame`], [`InboundRequest`] - Logical session frames
//! - [`TypesError`] - Encoding errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod frames;
mod ids;
mod messages;

pub use error::TypesError;
pub use frames::{DataFrame, InboundRequest, OutboundFrame, RequestType, ResponseFrame};
pub use ids::{PrincipalId, RequestId};
pub use messages::{MessageKind, RelayMessage};
