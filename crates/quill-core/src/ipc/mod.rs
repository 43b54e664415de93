//! Single-instance IPC: a later invocation hands its work to the running one.
//!
//! The first instance starts a [`Session`]: it binds a private local endpoint,
//! writes the endpoint into the address record, and queues every message that
//! later invocations send. A later invocation uses [`IpcClient::try_send`]; if
//! that returns [`IpcClientError::NotRunning`] it becomes the session itself.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   address record   ┌──────────────────────────┐
//! │  IpcClient   │◀──────────────────│  Session (first process) │
//! │ (later run)  │                    │                          │
//! │              │  HTTP/1.1 + JSON   │  accept loop             │
//! │              │───────────────────▶│   └─ task per connection │
//! └──────────────┘  unix socket/tcp   │        └─▶ message queue │
//!                                     └────────────┬─────────────┘
//!                                                  │ next_message()
//!                                           ┌──────▼───────┐
//!                                           │  Application │
//!                                           └──────────────┘
//! ```

pub mod address;
pub mod client;
pub mod server;
pub mod types;

pub use address::{AddressError, Endpoint};
pub use client::{IpcClient, IpcClientError};
pub use server::{Session, SessionError, start_session};
pub use types::*;
