/// A placeholder-database row for one path, relative to the sync root.
///
/// Absent or unparsable rows are represented by `None` at the call site —
/// this type only exists once a row was actually found (see
/// `ocffs-db::PlaceholderDb::lookup`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderRecord {
    pub fileid: String,
    pub modtime: i64,
    pub filesize: i64,
    pub file_type: i64,
}

/// Identity of the sync client process that owns the placeholder database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncClient {
    pub pid: u32,
    pub uid: u32,
    /// Executable short name, e.g. `owncloud` or `testpilotcloud`.
    pub name: String,
}

impl SyncClient {
    /// Derive the virtual-file suffix for this client.
    ///
    /// `owncloud` is special-cased to the legacy suffix `.owncloud`; every
    /// other client gets `.<name>_virtual`.
    pub fn virtual_suffix(&self) -> String {
        if self.name == "owncloud" {
            ".owncloud".to_string()
        } else {
            format!(".{}_virtual", self.name)
        }
    }

    /// The client's local control socket, `/run/user/<uid>/<name>/socket`.
    pub fn control_socket_path(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(format!("/run/user/{}/{}/socket", self.uid, self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owncloud_gets_legacy_suffix() {
        let c = SyncClient { pid: 1, uid: 1000, name: "owncloud".into() };
        assert_eq!(c.virtual_suffix(), ".owncloud");
    }

    #[test]
    fn other_clients_get_virtual_suffix() {
        let c = SyncClient { pid: 1, uid: 1000, name: "testpilotcloud".into() };
        assert_eq!(c.virtual_suffix(), ".testpilotcloud_virtual");
    }

    #[test]
    fn control_socket_path_format() {
        let c = SyncClient { pid: 1, uid: 1000, name: "testpilotcloud".into() };
        assert_eq!(
            c.control_socket_path(),
            std::path::PathBuf::from("/run/user/1000/testpilotcloud/socket")
        );
    }
}
