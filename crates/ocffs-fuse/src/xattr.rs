//! The synthetic `user.owncloud.virtual` extended attribute: the xattr
//! control plane that drives virtual/physical state transitions.

pub const VIRTUAL_XATTR: &str = "user.owncloud.virtual";

/// Value returned by `getxattr` for the synthetic attribute.
pub fn state_value(is_virtual: bool) -> &'static [u8] {
    if is_virtual {
        b"1"
    } else {
        b"0"
    }
}

/// The state a `setxattr` write on the synthetic attribute is requesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    Physical,
    Virtual,
}

/// Interpret a `setxattr` value per spec: empty or `"0"` asks for physical,
/// anything else (conventionally `"1"`) asks for virtual.
pub fn desired_state(value: &[u8]) -> DesiredState {
    if value.is_empty() || value == b"0" {
        DesiredState::Physical
    } else {
        DesiredState::Virtual
    }
}

/// Append the synthetic name to a regular file's listxattr output if it's
/// not already reported by the underlying filesystem.
pub fn with_synthetic_name(mut names: Vec<u8>, is_regular_file: bool) -> Vec<u8> {
    if !is_regular_file {
        return names;
    }
    let already_present = names
        .split(|&b| b == 0)
        .any(|name| name == VIRTUAL_XATTR.as_bytes());
    if !already_present {
        names.extend_from_slice(VIRTUAL_XATTR.as_bytes());
        names.push(0);
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_zero_mean_physical() {
        assert_eq!(desired_state(b""), DesiredState::Physical);
        assert_eq!(desired_state(b"0"), DesiredState::Physical);
    }

    #[test]
    fn anything_else_means_virtual() {
        assert_eq!(desired_state(b"1"), DesiredState::Virtual);
        assert_eq!(desired_state(b"yes"), DesiredState::Virtual);
    }

    #[test]
    fn state_value_matches_spec() {
        assert_eq!(state_value(true), b"1");
        assert_eq!(state_value(false), b"0");
    }

    #[test]
    fn listxattr_appends_synthetic_name_once() {
        let names = with_synthetic_name(b"user.foo\0".to_vec(), true);
        let count = names
            .split(|&b| b == 0)
            .filter(|n| n == &VIRTUAL_XATTR.as_bytes())
            .count();
        assert_eq!(count, 1);

        // already present — stays at one
        let again = with_synthetic_name(names, true);
        let count = again
            .split(|&b| b == 0)
            .filter(|n| n == &VIRTUAL_XATTR.as_bytes())
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn listxattr_skips_directories() {
        let names = with_synthetic_name(Vec::new(), false);
        assert!(names.is_empty());
    }
}
