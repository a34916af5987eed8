//! Converts a file between physical (materialized) and virtual (placeholder)
//! states: rename for physical→virtual, a control-socket request for the
//! reverse.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{info, warn};

/// Default bound on draining the control socket's reply, per spec.md §4.7.
pub const DEFAULT_SOCKET_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Rename `physical_path` to `physical_path` + `virtual_suffix`.
///
/// No-op (with a debug log) if `physical_path` is a directory; callers are
/// expected to have already checked the resolved state is `Physical`.
pub async fn physical_to_virtual(physical_path: &Path, virtual_suffix: &str) -> std::io::Result<()> {
    if tokio::fs::metadata(physical_path).await?.is_dir() {
        warn!(path = %physical_path.display(), "refusing to virtualize a directory");
        return Ok(());
    }

    let virt_path = append_suffix(physical_path, virtual_suffix);
    tokio::fs::rename(physical_path, &virt_path).await?;
    info!(from = %physical_path.display(), to = %virt_path.display(), "converted physical -> virtual");
    Ok(())
}

/// Ask the sync client to materialize `virtual_path` by sending a request
/// line over its control socket. Socket failures are logged and swallowed —
/// the request has been issued; the client owns actually fulfilling it.
pub async fn virtual_to_physical(virtual_path: &Path, control_socket_path: &Path, read_timeout: Duration) {
    let request = format!("DOWNLOAD_VIRTUAL_FILE:{}\n", virtual_path.display());

    let mut stream = match UnixStream::connect(control_socket_path).await {
        Ok(s) => s,
        Err(e) => {
            warn!(socket = %control_socket_path.display(), "connect failed: {e}");
            return;
        }
    };

    if let Err(e) = stream.write_all(request.as_bytes()).await {
        warn!("control socket write failed: {e}");
        return;
    }

    let mut buf = [0u8; 4096];
    match timeout(read_timeout, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            let reply = String::from_utf8_lossy(&buf[..n]);
            for line in reply.lines() {
                info!(line, "control socket reply");
            }
        }
        Ok(Ok(_)) => info!("control socket closed with no reply"),
        Ok(Err(e)) => warn!("control socket read failed: {e}"),
        Err(_) => warn!("control socket read timed out after {read_timeout:?}"),
    }
}

fn append_suffix(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut s = path.to_string_lossy().into_owned();
    s.push_str(suffix);
    std::path::PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn physical_to_virtual_renames_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("doc.pdf");
        std::fs::write(&p, b"hi").unwrap();

        physical_to_virtual(&p, ".owncloud").await.unwrap();

        assert!(!p.exists());
        assert!(dir.path().join("doc.pdf.owncloud").exists());
    }

    #[tokio::test]
    async fn physical_to_virtual_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("sub");
        std::fs::create_dir(&p).unwrap();

        physical_to_virtual(&p, ".owncloud").await.unwrap();

        assert!(p.exists());
        assert!(!dir.path().join("sub.owncloud").exists());
    }

    #[tokio::test]
    async fn virtual_to_physical_sends_exact_request_line() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("socket");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let virt_path = dir.path().join("doc.pdf.owncloud");
        let expected = format!("DOWNLOAD_VIRTUAL_FILE:{}\n", virt_path.display());
        let expected_len = expected.len();

        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; expected_len];
            conn.read_exact(&mut buf).await.unwrap();
            conn.write_all(b"ok\n").await.unwrap();
            buf
        });

        virtual_to_physical(&virt_path, &socket_path, DEFAULT_SOCKET_READ_TIMEOUT).await;

        let received = server.await.unwrap();
        assert_eq!(String::from_utf8(received).unwrap(), expected);
    }

    #[tokio::test]
    async fn virtual_to_physical_swallows_connect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing_socket = dir.path().join("no-such-socket");
        let virt_path = dir.path().join("doc.pdf.owncloud");

        // Must not panic even though nothing is listening.
        virtual_to_physical(&virt_path, &missing_socket, DEFAULT_SOCKET_READ_TIMEOUT).await;
    }
}
