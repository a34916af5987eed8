//! Decides whether the calling process should see raw on-disk state instead
//! of the overlay — root, and the sync client itself, always do.

use fuse3::path::Request;

pub fn is_transparent(req: &Request, client_pid: u32) -> bool {
    req.uid == 0 || req.pid == client_pid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(uid: u32, pid: u32) -> Request {
        Request { unique: 0, uid, gid: 0, pid }
    }

    #[test]
    fn root_is_transparent() {
        assert!(is_transparent(&req(0, 999), 42));
    }

    #[test]
    fn client_pid_is_transparent() {
        assert!(is_transparent(&req(1000, 42), 42));
    }

    #[test]
    fn ordinary_caller_is_not_transparent() {
        assert!(!is_transparent(&req(1000, 999), 42));
    }
}
