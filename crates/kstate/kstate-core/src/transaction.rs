//! The update side: snapshot-isolated transactions over a state.

use std::fmt;

use kstate_shm::{PrivateBuffer, RoRegion, RwRegion};
use tracing::debug;

use crate::error::{Error, Result};
use crate::id;
use crate::name::StateName;
use crate::perms::Permissions;
use crate::state::State;

/// A scoped view of a state: stable for readers, optimistic for writers.
///
/// `start` takes a private copy of the state's bytes (the working buffer)
/// plus, for writable transactions, a snapshot that serves as the reference
/// for the commit check. The transaction re-opens the shared object under
/// its own mappings, so it stays usable after the originating [`State`] is
/// unsubscribed or dropped. Dropping an active transaction aborts it.
pub struct Transaction {
    id: u32,
    inner: Option<Active>,
}

struct Active {
    name: StateName,
    permissions: Permissions,
    mode: TxnMode,
    working: PrivateBuffer,
}

/// The live mapping, split by writability so a writable transaction cannot
/// exist without its snapshot.
enum TxnMode {
    /// Held only to co-own the shared object for the transaction's lifetime.
    ReadOnly { _live: RoRegion },
    Writable { live: RwRegion, snapshot: Vec<u8> },
}

impl Transaction {
    /// A fresh, inactive transaction. The id is assigned here and identifies
    /// this handle for its whole lifetime.
    pub fn new() -> Transaction {
        Transaction {
            id: id::next_transaction_id(),
            inner: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    /// Begin a transaction on a subscribed state.
    ///
    /// `WRITE` alone is normalized to `READ | WRITE`; a write transaction on
    /// a state subscribed read-only fails with `EINVAL`. For a read-only
    /// transaction the working buffer's protection is dropped to read-only
    /// once it is filled, so stray writes through its pointer trap. On any
    /// failure all partial resources are released and the transaction stays
    /// inactive.
    pub fn start(&mut self, state: &State, permissions: Permissions) -> Result<()> {
        if self.inner.is_some() {
            return Err(Error::TransactionActive);
        }
        let (name, state_permissions, len) =
            state.subscription_parts().ok_or(Error::NotSubscribed)?;
        if permissions.is_empty() {
            return Err(Error::NoPermissions);
        }
        let permissions = permissions.normalized();
        if permissions.can_write() && !state_permissions.can_write() {
            return Err(Error::StateNotWritable);
        }

        // The transaction owns its name and mappings outright; it must not
        // depend on `state` once this call returns.
        let name = name.clone();

        let (mode, working) = if permissions.can_write() {
            let live = RwRegion::open(name.os_name(), len)?;
            // Reference point for the optimistic commit check. Nothing
            // serializes this copy against a concurrent committer.
            let snapshot = live.as_slice().to_vec();
            let working = PrivateBuffer::from_bytes(live.as_slice())?;
            (TxnMode::Writable { live, snapshot }, working)
        } else {
            let live = RoRegion::open(name.os_name(), len)?;
            let working = PrivateBuffer::from_bytes(live.as_slice())?.into_read_only()?;
            (TxnMode::ReadOnly { _live: live }, working)
        };

        debug!(id = self.id, name = name.user_name(), %permissions, "transaction started");
        self.inner = Some(Active {
            name,
            permissions,
            mode,
            working,
        });
        Ok(())
    }

    /// Discard the working buffer and release all transaction resources.
    ///
    /// Fails with `EINVAL` if the transaction is not active (never started,
    /// or already committed or aborted).
    pub fn abort(&mut self) -> Result<()> {
        let active = self.inner.take().ok_or(Error::TransactionNotActive)?;
        debug!(id = self.id, name = active.name.user_name(), "transaction aborted");
        Ok(())
    }

    /// Publish the working buffer into the shared region, if nobody else
    /// committed first.
    ///
    /// The decision is byte-for-byte: if the live region still equals the
    /// snapshot taken at `start`, the working buffer is copied over it and
    /// the commit succeeds; otherwise the commit fails with `EPERM`. Either
    /// way the transaction is torn down. Committing a read-only transaction
    /// fails with `EPERM` and leaves it active, so it can still be aborted.
    ///
    /// The compare and the copy are not serialized against other
    /// committers: two writers that both pass the compare can interleave
    /// their copies. Callers that need strict serialization must arrange a
    /// cross-process lock of their own. There is also no ABA protection; a
    /// state changed and changed back while the transaction was open counts
    /// as unchanged.
    pub fn commit(&mut self) -> Result<()> {
        match &self.inner {
            None => return Err(Error::TransactionNotActive),
            Some(active) if !active.permissions.can_write() => {
                return Err(Error::ReadOnlyCommit);
            }
            Some(_) => {}
        }
        // A writable transaction always carries the Writable mode.
        let Some(Active {
            name,
            mode: TxnMode::Writable { mut live, snapshot },
            working,
            ..
        }) = self.inner.take()
        else {
            return Err(Error::TransactionNotActive);
        };

        if live.as_slice() != snapshot.as_slice() {
            debug!(id = self.id, name = name.user_name(), "commit lost, state changed");
            return Err(Error::Conflict);
        }
        if live.as_slice() != working.as_slice() {
            live.as_mut_slice().copy_from_slice(working.as_slice());
        }
        debug!(id = self.id, name = name.user_name(), "transaction committed");
        Ok(())
    }

    /// The state's user-visible name, or `None` when inactive.
    pub fn name(&self) -> Option<&str> {
        self.inner.as_ref().map(|a| a.name.user_name())
    }

    /// The (normalized) transaction permissions; empty when inactive.
    pub fn permissions(&self) -> Permissions {
        self.inner
            .as_ref()
            .map(|a| a.permissions)
            .unwrap_or_default()
    }

    /// This handle's id, or 0 when inactive.
    pub fn id(&self) -> u32 {
        if self.inner.is_some() {
            self.id
        } else {
            0
        }
    }

    /// The working buffer, or `None` when inactive.
    ///
    /// This is the transaction's private copy: it never changes under the
    /// reader, whatever other processes commit in the meantime.
    pub fn data(&self) -> Option<&[u8]> {
        self.inner.as_ref().map(|a| a.working.as_slice())
    }

    /// Mutable access to the working buffer. `None` when the transaction is
    /// inactive or read-only.
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        self.inner.as_mut().and_then(|a| a.working.as_mut_slice())
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.inner.is_some() {
            let _ = self.abort();
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(a) => write!(
                f,
                "Transaction {} for {} on '{}'",
                self.id,
                a.permissions,
                a.name.user_name()
            ),
            None => write!(f, "Transaction <not active>"),
        }
    }
}
