//! Cinder driver core
//!
//! This crate contains the event pump for a TLS 1.3 endpoint: the engine
//! that mediates between an asynchronous byte transport, a pure TLS state
//! machine, and application-level read/write/close requests.
//!
//! # Architecture: "The Hollow Shell"
//!
//! Protocol logic is strictly separated from effect execution:
//!
//! ```text
//!      ┌─────────────────────────────┐
//!      │ Machine (collaborator)      │
//!      │ - Pure TLS 1.3 transitions  │
//!      │ - (state, event) → actions  │
//!      └─────────────────────────────┘
//!                    ↑
//!      ┌─────────────────────────────┐
//!      │ Driver (this crate)         │
//!      │ - Pending event queue       │
//!      │ - Action pump               │
//!      │ - Lifetime management       │
//!      │ - Error/terminal control    │
//!      └─────────────────────────────┘
//!          ↑                   ↓
//! ┌─────────────────┐  ┌────────────────┐
//! │ TransportFeed   │  │ ActionVisitor  │
//! │ - AsyncRead →   │  │ - Applies each │
//! │   read buffer   │  │   action to the│
//! │ - EOF/errors →  │  │   surrounding  │
//! │   error state   │  │   endpoint     │
//! └─────────────────┘  └────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - Actions, Not Effects: the machine never performs I/O; it returns a
//!   finite ordered action list per event and the visitor executes it
//! - One Event In Flight: at most one machine invocation and one action
//!   visitation exist per driver at any time
//! - Single-Threaded: all public operations, visitor calls, and future
//!   continuations run on one execution context; no locks
//! - Errors Are Reified: public operations never fail; failures become the
//!   terminal state and per-write failure callbacks
//!
//! # Modules
//!
//! - [`driver`]: the pump, the driver handles, and the visitor contract
//! - [`event`]: application-originated events and write callbacks
//! - [`machine`]: the state-machine contract the driver consumes
//! - [`error`]: the driver's terminal failure reasons
//! - [`transport`]: coupling from an `AsyncRead` byte source to the driver

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod driver;
pub mod error;
pub mod event;
pub mod machine;
pub mod transport;
