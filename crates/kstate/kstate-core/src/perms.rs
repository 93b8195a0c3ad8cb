use std::fmt;
use std::ops::BitOr;

/// Access rights for a state or transaction handle.
///
/// A bitmask with exactly two defined bits: `READ = 1` and `WRITE = 2`.
/// Requesting `WRITE` alone is treated as `READ | WRITE` everywhere a
/// handle is bound; there is no write-only access.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Permissions(u32);

impl Permissions {
    /// The state may be read.
    pub const READ: Permissions = Permissions(1);
    /// The state may be written.
    pub const WRITE: Permissions = Permissions(2);

    const ALL: u32 = 0b11;

    /// Interpret raw bits. `None` for 0 and for any bit outside
    /// `READ | WRITE`.
    pub fn from_bits(bits: u32) -> Option<Permissions> {
        if bits == 0 || bits & !Self::ALL != 0 {
            None
        } else {
            Some(Permissions(bits))
        }
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn can_read(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    pub fn can_write(self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }

    /// Writers always read their own state: `WRITE` alone gains `READ`.
    pub(crate) fn normalized(self) -> Permissions {
        if self.can_write() {
            Permissions(self.0 | Self::READ.0)
        } else {
            self
        }
    }
}

impl BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Permissions) -> Permissions {
        Permissions(self.0 | rhs.0)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.can_read(), self.can_write()) {
            (true, true) => write!(f, "read|write"),
            (true, false) => write!(f, "read"),
            (false, true) => write!(f, "write"),
            (false, false) => write!(f, "<no permissions>"),
        }
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permissions({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bits_accepts_defined_bits_only() {
        assert_eq!(Permissions::from_bits(1), Some(Permissions::READ));
        assert_eq!(Permissions::from_bits(2), Some(Permissions::WRITE));
        assert_eq!(
            Permissions::from_bits(3),
            Some(Permissions::READ | Permissions::WRITE)
        );
        assert_eq!(Permissions::from_bits(0), None);
        assert_eq!(Permissions::from_bits(4), None);
        assert_eq!(Permissions::from_bits(5), None);
    }

    #[test]
    fn write_alone_normalizes_to_readwrite() {
        assert_eq!(
            Permissions::WRITE.normalized(),
            Permissions::READ | Permissions::WRITE
        );
        assert_eq!(Permissions::READ.normalized(), Permissions::READ);
    }

    #[test]
    fn display_matches_diagnostic_format() {
        assert_eq!(Permissions::READ.to_string(), "read");
        assert_eq!(Permissions::WRITE.to_string(), "write");
        assert_eq!(
            (Permissions::READ | Permissions::WRITE).to_string(),
            "read|write"
        );
        assert_eq!(Permissions::default().to_string(), "<no permissions>");
    }
}
