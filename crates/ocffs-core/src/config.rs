use serde::{Deserialize, Serialize};

/// Runtime-tunable knobs for the mount, mirroring the teacher's `FuseConfig`
/// shape but sized to what this filesystem actually needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountTuning {
    /// Block size reported by `statfs` and honored as the read granularity
    /// for synthetic (placeholder) file descriptors.
    pub read_block_size: u32,
    /// Timeout for draining the control socket's reply after a
    /// `DOWNLOAD_VIRTUAL_FILE` request.
    pub control_socket_timeout_ms: u64,
}

impl Default for MountTuning {
    fn default() -> Self {
        Self {
            read_block_size: 4096,
            control_socket_timeout_ms: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let t = MountTuning::default();
        assert_eq!(t.read_block_size, 4096);
        assert_eq!(t.control_socket_timeout_ms, 200);
    }
}
