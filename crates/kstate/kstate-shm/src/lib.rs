//! Mapping adapter over the POSIX shared-memory namespace.
//!
//! Everything that touches `shm_open`/`shm_unlink` or a mapping lives here;
//! the engine crate never issues an OS call of its own. Regions come in two
//! flavors by protection ([`RoRegion`], [`RwRegion`]) plus a private
//! anonymous buffer ([`PrivateBuffer`]) whose protection can be dropped to
//! read-only after it has been filled.

use std::fs::File;

use memmap2::{Mmap, MmapMut, MmapOptions};
use rustix::fs::ftruncate;
use rustix::shm;

pub use rustix::fs::Mode;
pub use rustix::io::Errno;

pub type Result<T> = std::result::Result<T, ShmError>;

/// Errors surfaced by the shared-memory primitives.
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    /// `shm_open`, `ftruncate` or `shm_unlink` failed with an errno.
    #[error("{op} failed for `{name}`")]
    Posix {
        op: &'static str,
        name: String,
        #[source]
        source: Errno,
    },

    /// Mapping a named object into the address space failed.
    #[error("mapping `{name}` failed")]
    Map {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// An anonymous mapping could not be allocated.
    #[error("anonymous mapping of {len} bytes failed")]
    AnonMap {
        len: usize,
        #[source]
        source: std::io::Error,
    },

    /// Changing the protection of a private buffer failed.
    #[error("changing protection on a private buffer failed")]
    Protect {
        #[source]
        source: std::io::Error,
    },
}

impl ShmError {
    fn posix(op: &'static str, name: &str, source: Errno) -> Self {
        Self::Posix {
            op,
            name: name.to_string(),
            source,
        }
    }

    fn map(name: &str, source: std::io::Error) -> Self {
        Self::Map {
            name: name.to_string(),
            source,
        }
    }

    /// The errno behind this error. Mapping failures without an OS code
    /// (which in practice means address-space exhaustion) report `ENOMEM`.
    pub fn errno(&self) -> Errno {
        match self {
            ShmError::Posix { source, .. } => *source,
            ShmError::Map { source, .. }
            | ShmError::AnonMap { source, .. }
            | ShmError::Protect { source } => source
                .raw_os_error()
                .map(Errno::from_raw_os_error)
                .unwrap_or(Errno::NOMEM),
        }
    }
}

/// Host page size. Every state region is exactly one page long.
pub fn page_size() -> usize {
    rustix::param::page_size()
}

/// Remove a name from the shared-memory namespace.
///
/// Existing mappings of the object stay valid until they are unmapped; only
/// future opens are affected.
pub fn unlink(name: &str) -> Result<()> {
    shm::unlink(name).map_err(|e| ShmError::posix("shm_unlink", name, e))
}

/// A read-only mapping of a named shared-memory object.
#[derive(Debug)]
pub struct RoRegion {
    /// Keeps the object's fd alive for the lifetime of the mapping.
    _file: File,
    map: Mmap,
}

impl RoRegion {
    /// Open an existing object read-only and map `len` bytes of it.
    pub fn open(name: &str, len: usize) -> Result<Self> {
        let fd = shm::open(name, shm::OFlags::RDONLY, Mode::empty())
            .map_err(|e| ShmError::posix("shm_open", name, e))?;
        let file = File::from(fd);
        // SAFETY: fresh mapping of an object we just opened; nothing in this
        // process aliases it yet.
        let map = unsafe { MmapOptions::new().len(len).map(&file) }
            .map_err(|e| ShmError::map(name, e))?;
        Ok(Self { _file: file, map })
    }

    /// Open the object read-write, creating it if absent, size it to `len`,
    /// and map it read-only.
    ///
    /// The extended portion of a newly created object reads as zero bytes.
    /// An already existing object keeps its contents. The name is left in
    /// place on failure; the caller owns unlink policy.
    pub fn open_or_create(name: &str, len: usize, mode: Mode) -> Result<Self> {
        let fd = shm::open(name, shm::OFlags::RDWR | shm::OFlags::CREATE, mode)
            .map_err(|e| ShmError::posix("shm_open", name, e))?;
        ftruncate(&fd, len as u64).map_err(|e| ShmError::posix("ftruncate", name, e))?;
        let file = File::from(fd);
        // SAFETY: as in `open`; the protection is read-only even though the
        // descriptor is read-write.
        let map = unsafe { MmapOptions::new().len(len).map(&file) }
            .map_err(|e| ShmError::map(name, e))?;
        Ok(Self { _file: file, map })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The mapped bytes. Another process may change them between two reads;
    /// writes through this view trap.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.map[..]
    }
}

/// A read-write mapping of a named shared-memory object.
pub struct RwRegion {
    _file: File,
    map: MmapMut,
}

impl RwRegion {
    /// Open an existing object read-write and map `len` bytes of it.
    pub fn open(name: &str, len: usize) -> Result<Self> {
        let fd = shm::open(name, shm::OFlags::RDWR, Mode::empty())
            .map_err(|e| ShmError::posix("shm_open", name, e))?;
        let file = File::from(fd);
        // SAFETY: fresh mapping of an object we just opened.
        let map = unsafe { MmapOptions::new().len(len).map_mut(&file) }
            .map_err(|e| ShmError::map(name, e))?;
        Ok(Self { _file: file, map })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.map[..]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map[..]
    }
}

/// A private anonymous buffer, writable when allocated.
///
/// [`into_read_only`](Self::into_read_only) hands the buffer back with its
/// pages protected read-only, so later writes trap instead of succeeding
/// silently.
pub struct PrivateBuffer {
    map: Buffer,
}

enum Buffer {
    Rw(MmapMut),
    Ro(Mmap),
}

impl PrivateBuffer {
    /// Allocate an anonymous buffer initialized with a copy of `src`.
    pub fn from_bytes(src: &[u8]) -> Result<Self> {
        let mut map = MmapOptions::new()
            .len(src.len())
            .map_anon()
            .map_err(|source| ShmError::AnonMap {
                len: src.len(),
                source,
            })?;
        map.copy_from_slice(src);
        Ok(Self {
            map: Buffer::Rw(map),
        })
    }

    /// Drop write protection. Idempotent.
    pub fn into_read_only(self) -> Result<Self> {
        let map = match self.map {
            Buffer::Rw(m) => {
                Buffer::Ro(m.make_read_only().map_err(|source| ShmError::Protect { source })?)
            }
            ro @ Buffer::Ro(_) => ro,
        };
        Ok(Self { map })
    }

    #[inline]
    pub fn len(&self) -> usize {
        match &self.map {
            Buffer::Rw(m) => m.len(),
            Buffer::Ro(m) => m.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        match &self.map {
            Buffer::Rw(m) => &m[..],
            Buffer::Ro(m) => &m[..],
        }
    }

    /// Mutable view of the buffer, or `None` once it has been made
    /// read-only.
    #[inline]
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match &mut self.map {
            Buffer::Rw(m) => Some(&mut m[..]),
            Buffer::Ro(_) => None,
        }
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        matches!(self.map, Buffer::Rw(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_name(tag: &str) -> String {
        format!("/kstate-shm-test.{tag}.{}", std::process::id())
    }

    #[test]
    fn create_open_and_unlink() {
        let name = test_name("roundtrip");
        let len = page_size();

        let created = RoRegion::open_or_create(&name, len, Mode::RWXU).expect("create");
        assert_eq!(created.len(), len);
        assert!(created.as_slice().iter().all(|&b| b == 0));

        let opened = RoRegion::open(&name, len).expect("open");
        assert_eq!(opened.len(), len);

        unlink(&name).expect("unlink");
        let err = RoRegion::open(&name, len).expect_err("open after unlink");
        assert_eq!(err.errno(), Errno::NOENT);
    }

    #[test]
    fn rw_region_writes_are_visible_to_ro_mapping() {
        let name = test_name("visible");
        let len = page_size();

        let ro = RoRegion::open_or_create(&name, len, Mode::RWXU).expect("create");
        let mut rw = RwRegion::open(&name, len).expect("open rw");
        rw.as_mut_slice()[0] = 0xAB;
        assert_eq!(ro.as_slice()[0], 0xAB);

        unlink(&name).expect("unlink");
    }

    #[test]
    fn open_missing_name_is_noent() {
        let err = RoRegion::open(&test_name("missing"), page_size()).expect_err("must not exist");
        assert_eq!(err.errno(), Errno::NOENT);
    }

    #[test]
    fn private_buffer_copy_and_freeze() {
        let src = vec![7u8; 128];
        let mut buf = PrivateBuffer::from_bytes(&src).expect("map_anon");
        assert_eq!(buf.as_slice(), &src[..]);
        assert!(buf.is_writable());

        buf.as_mut_slice().expect("writable")[0] = 9;
        assert_eq!(buf.as_slice()[0], 9);

        let buf = buf.into_read_only().expect("mprotect");
        assert!(!buf.is_writable());
        assert_eq!(buf.as_slice()[0], 9);
    }
}
