//! State names and their canonical shared-object form.
//!
//! A user name is plain ASCII alphanumerics and dots; the library prepends
//! `/kstate.` before handing it to the OS, so all states share one namespace
//! and the prefix can be stripped again when reporting the name back.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Error;

/// Longest accepted user-visible name, in bytes.
pub const MAX_NAME_LEN: usize = 254;

const NAME_PREFIX: &str = "/kstate.";

/// A validated, canonical shared-object name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StateName(String);

impl StateName {
    pub(crate) fn new(user_name: &str) -> Result<Self, Error> {
        validate(user_name)?;
        Ok(StateName(format!("{NAME_PREFIX}{user_name}")))
    }

    /// The full name as the OS sees it, e.g. `/kstate.Fred.A`.
    pub(crate) fn os_name(&self) -> &str {
        &self.0
    }

    /// The name the user supplied, prefix stripped.
    pub(crate) fn user_name(&self) -> &str {
        &self.0[NAME_PREFIX.len()..]
    }
}

fn validate(name: &str) -> Result<(), Error> {
    let invalid = |reason| Error::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name may not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 254 bytes"));
    }
    if name.starts_with('.') || name.ends_with('.') {
        return Err(invalid("name may not start or end with '.'"));
    }

    let mut prev_was_dot = false;
    for b in name.bytes() {
        if b == b'.' {
            if prev_was_dot {
                return Err(invalid("name may not contain adjacent '.'s"));
            }
            prev_was_dot = true;
        } else if b.is_ascii_alphanumeric() {
            prev_was_dot = false;
        } else {
            return Err(invalid("name may only contain ASCII alphanumerics and '.'"));
        }
    }
    Ok(())
}

/// Build a name that is unique on this host, for tests and scratch states.
///
/// The name is `prefix.<seconds><microseconds>.<pid>.<serial>`, so it is
/// only as unique as the wall clock plus a process-wide counter. Good
/// enough for test isolation, not a cryptographic guarantee.
pub fn unique_name(prefix: &str) -> String {
    static SERIAL: AtomicU32 = AtomicU32::new(0);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let serial = SERIAL.fetch_add(1, Ordering::Relaxed);
    format!(
        "{prefix}.{}{:06}.{}.{}",
        now.as_secs(),
        now.subsec_micros(),
        std::process::id(),
        serial
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_names_are_valid() {
        for name in ["Fred", "Fred.A", "a", "0", "A.1.b2"] {
            assert!(validate(name).is_ok(), "{name:?} should be valid");
        }
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(matches!(validate(""), Err(Error::InvalidName { .. })));
    }

    #[test]
    fn max_length_boundary() {
        let ok = "a".repeat(MAX_NAME_LEN);
        assert!(validate(&ok).is_ok());

        let too_long = "a".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            validate(&too_long),
            Err(Error::InvalidName { .. })
        ));
    }

    #[test]
    fn dot_placement_is_rejected() {
        for name in [".Fred", "Fred.", "Fred..A", "."] {
            assert!(
                matches!(validate(name), Err(Error::InvalidName { .. })),
                "{name:?} should be invalid"
            );
        }
    }

    #[test]
    fn non_alphanumerics_are_rejected() {
        for name in ["Fred-A", "Fred A", "Fred/A", "Fréd", "Fred_A"] {
            assert!(
                matches!(validate(name), Err(Error::InvalidName { .. })),
                "{name:?} should be invalid"
            );
        }
    }

    #[test]
    fn canonical_form_round_trips() {
        let name = StateName::new("Fred.A").expect("valid");
        assert_eq!(name.os_name(), "/kstate.Fred.A");
        assert_eq!(name.user_name(), "Fred.A");
    }

    #[test]
    fn unique_names_are_distinct_and_valid() {
        let a = unique_name("test");
        let b = unique_name("test");
        assert_ne!(a, b);
        assert!(validate(&a).is_ok());
        assert!(validate(&b).is_ok());
    }
}
