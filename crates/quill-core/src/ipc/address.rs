//! Endpoint addresses and the on-disk address record.
//!
//! The record is a single line naming the transport and its address:
//! `unix:/tmp/quill-ipc-XXXX/ipc.sock` or `tcp:127.0.0.1:41234`. A record that
//! is missing, unreadable, or unparseable means "no running instance".

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

/// Errors from reading or parsing an address record.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("failed to read address record {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("malformed address {0:?}")]
    Malformed(String),

    #[error("unsupported address scheme {0:?}")]
    UnsupportedScheme(String),
}

/// A local endpoint a session listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket path.
    #[cfg(unix)]
    Unix(PathBuf),
    /// Loopback TCP address.
    Tcp(SocketAddr),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| AddressError::Malformed(s.to_string()))?;
        if rest.is_empty() {
            return Err(AddressError::Malformed(s.to_string()));
        }

        match scheme {
            #[cfg(unix)]
            "unix" => Ok(Endpoint::Unix(PathBuf::from(rest))),
            "tcp" => rest
                .parse::<SocketAddr>()
                .map(Endpoint::Tcp)
                .map_err(|_| AddressError::Malformed(s.to_string())),
            other => Err(AddressError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Read the endpoint recorded at `path`.
pub async fn read(path: &Path) -> Result<Endpoint, AddressError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| AddressError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    content.parse()
}

/// Publish `endpoint` at `path`, replacing any previous record.
///
/// The record is written next to its final location and renamed into place,
/// so a concurrent reader sees either the old or the new address.
pub async fn publish(path: &Path, endpoint: &Endpoint) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let staging = path.with_extension(format!("{}.tmp", std::process::id()));
    tokio::fs::write(&staging, format!("{endpoint}\n")).await?;
    if let Err(e) = tokio::fs::rename(&staging, path).await {
        tokio::fs::remove_file(&staging).await.ok();
        return Err(e);
    }

    debug!(path = %path.display(), %endpoint, "Published IPC address");
    Ok(())
}

/// Remove the record at `path` if it still names `endpoint`.
///
/// Another instance may have published its own address since; that record
/// is left alone.
pub async fn retract(path: &Path, endpoint: &Endpoint) {
    match read(path).await {
        Ok(current) if current == *endpoint => {
            if let Err(e) = tokio::fs::remove_file(path).await {
                debug!(path = %path.display(), error = %e, "Could not remove address record");
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_parse_tcp() {
        let endpoint: Endpoint = "tcp:127.0.0.1:4242".parse().unwrap();
        assert_eq!(endpoint, Endpoint::Tcp("127.0.0.1:4242".parse().unwrap()));
        assert_eq!(endpoint.to_string(), "tcp:127.0.0.1:4242");
    }

    #[cfg(unix)]
    #[test]
    fn test_parse_unix_with_trailing_newline() {
        let endpoint: Endpoint = "unix:/tmp/quill-ipc-abc/ipc.sock\n".parse().unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Unix(PathBuf::from("/tmp/quill-ipc-abc/ipc.sock"))
        );
        assert_eq!(endpoint.to_string(), "unix:/tmp/quill-ipc-abc/ipc.sock");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            "".parse::<Endpoint>(),
            Err(AddressError::Malformed(_))
        ));
        assert!(matches!(
            "no scheme here".parse::<Endpoint>(),
            Err(AddressError::Malformed(_))
        ));
        assert!(matches!(
            "tcp:not-an-address".parse::<Endpoint>(),
            Err(AddressError::Malformed(_))
        ));
        assert!(matches!(
            "tcp:".parse::<Endpoint>(),
            Err(AddressError::Malformed(_))
        ));
        assert!(matches!(
            "pipe:\\\\.\\pipe\\quill".parse::<Endpoint>(),
            Err(AddressError::UnsupportedScheme(_))
        ));
    }

    #[tokio::test]
    async fn test_read_missing_record() {
        let tmp = TempDir::new().unwrap();
        let result = read(&tmp.path().join("ipc_address.txt")).await;
        assert!(matches!(result, Err(AddressError::Read { .. })));
    }

    #[tokio::test]
    async fn test_publish_overwrites() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("ipc_address.txt");

        let first = Endpoint::Tcp("127.0.0.1:1111".parse().unwrap());
        let second = Endpoint::Tcp("127.0.0.1:2222".parse().unwrap());
        publish(&path, &first).await.unwrap();
        publish(&path, &second).await.unwrap();

        assert_eq!(read(&path).await.unwrap(), second);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, "tcp:127.0.0.1:2222\n");
    }

    #[tokio::test]
    async fn test_retract_only_own_record() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ipc_address.txt");
        let ours = Endpoint::Tcp("127.0.0.1:1111".parse().unwrap());
        let theirs = Endpoint::Tcp("127.0.0.1:2222".parse().unwrap());

        publish(&path, &theirs).await.unwrap();
        retract(&path, &ours).await;
        assert!(path.exists());

        retract(&path, &theirs).await;
        assert!(!path.exists());
    }
}
