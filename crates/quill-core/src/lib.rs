#![deny(unsafe_code)]

//! Quill core runtime.
//!
//! Provides the single-instance IPC session that lets a later invocation hand
//! its files to the running one, the plugin scheduler that discovers, orders,
//! and sets up plugins, and log file setup shared by every instance.

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Single-instance rendezvous: address record, session, and client.
pub mod ipc;
/// Subscriber setup and per-instance log files.
pub mod logging;
/// Plugin discovery, dependency ordering, and isolated setup.
pub mod plugin;

pub use ipc::{
    Endpoint, IpcClient, IpcClientError, OpenRequest, Session, SessionError, start_session,
};
pub use logging::LogTarget;
pub use plugin::{
    BuiltinRegistry, LoadReport, ManifestImporter, Plugin, PluginDescriptor, PluginError,
    PluginImporter, PluginScheduler, UnitOutcome,
};
