//! # pairlink-relay
//!
//! Device pairing coordinator and per-recipient message relay.
//!
//! This crate implements a backend that:
//! - Lets a user ask a device to pair, and lets the device accept or reject
//! - Keeps pending pairing requests in memory with a TTL
//! - Queues messages per recipient in bounded FIFO queues
//! - Multiplexes inbound writes and queued deliveries on one session
//!
//! ## Architecture
//!
//! ```text
//!  User ──HTTP──┐                         ┌──WebSocket── Device
//!               │                         │
//!        ┌──────┴─────────────────────────┴──────┐
//!        │              pairlink-relay           │
//!        │  PairingCoordinator    MessageRelay   │
//!        │   (WaitableRegistry)  (QueueBackend)  │
//!        │  ┌──────────────────┐                 │
//!        │  │ SQLite (pairs)   │                 │
//!        │  └──────────────────┘                 │
//!        └───────────────────────────────────────┘
//! ```
//!
//! ## Session frames
//!
//! Sessions exchange JSON text frames:
//! - `enqueue_request` / `enqueue_response` (client → server)
//! - `response` ack or error (server → client)
//! - `data` carrying a queued message (server → client)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod pairing;
pub mod registry;
pub mod relay;
pub mod server;
pub mod service;
pub mod session;
pub mod status;
pub mod storage;
pub mod transport;
