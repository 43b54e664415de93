//! Shared message types for the single-instance session.
//!
//! Messages are serialized as JSON request bodies over the local transport.
//! Both the session (first instance) and the client (any later invocation)
//! use these types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Route that accepts one queued message per request.
pub const MESSAGE_ROUTE: &str = "/message";

/// Response header every reply from a session carries, so a client can tell
/// a live session from an unrelated program that took over its address.
pub const SESSION_HEADER: &str = "x-quill-session";

/// Largest message body the session accepts (file contents travel inline).
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// A request from a later invocation to the running editor.
///
/// `path: None` with `content: Some(..)` is an unnamed buffer (stdin or a
/// new empty file). Both `None` asks the running instance to raise its
/// window without opening anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub path: Option<PathBuf>,
    pub content: Option<String>,
}

impl OpenRequest {
    /// Open a file whose content was read by the sending process.
    pub fn file(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            content: Some(content.into()),
        }
    }

    /// Open an unnamed buffer with the given content.
    pub fn buffer(content: impl Into<String>) -> Self {
        Self {
            path: None,
            content: Some(content.into()),
        }
    }

    /// Open an empty unnamed buffer.
    pub fn new_file() -> Self {
        Self::buffer(String::new())
    }

    /// Only bring the running instance to the front.
    pub fn focus() -> Self {
        Self {
            path: None,
            content: None,
        }
    }

    /// Whether this request opens nothing.
    pub fn is_focus(&self) -> bool {
        self.path.is_none() && self.content.is_none()
    }
}
