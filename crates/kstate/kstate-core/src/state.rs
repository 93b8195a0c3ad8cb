//! The subscription side: a named state and its read-only view.

use std::fmt;

use kstate_shm::{self as shm, Mode, RoRegion};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::id;
use crate::name::StateName;
use crate::perms::Permissions;

/// Policy knobs applied at subscription time.
#[derive(Clone, Debug)]
pub struct SubscribeOptions {
    /// Mode bits for a shared object this subscription has to create.
    ///
    /// The default is wide open (world read/write/execute) so that unrelated
    /// processes can cooperate without ceremony; deployments that care pass
    /// something tighter.
    pub create_mode: Mode,

    /// Unlink the shared name when this handle unsubscribes.
    ///
    /// With the default (`true`) a name is effectively single-use: once any
    /// subscriber lets go, future subscribers must recreate it with a
    /// writable subscription. Existing mappings, including transactions,
    /// are unaffected by the unlink.
    pub unlink_on_unsubscribe: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            create_mode: Mode::RWXU | Mode::RWXG | Mode::RWXO,
            unlink_on_unsubscribe: true,
        }
    }
}

/// A handle on a named shared-memory state.
///
/// Created empty, then bound with [`subscribe`](State::subscribe). The
/// mapped view is always read-only, whatever the subscription permissions;
/// writing requires a [`Transaction`](crate::Transaction). Dropping a
/// subscribed handle unsubscribes it.
pub struct State {
    id: u32,
    sub: Option<Subscription>,
}

struct Subscription {
    name: StateName,
    permissions: Permissions,
    region: RoRegion,
    unlink_on_unsubscribe: bool,
}

impl State {
    /// A fresh, unsubscribed handle. The id is assigned here and identifies
    /// this handle for its whole lifetime.
    pub fn new() -> State {
        State {
            id: id::next_state_id(),
            sub: None,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.sub.is_some()
    }

    /// Subscribe with default [`SubscribeOptions`].
    pub fn subscribe(&mut self, name: &str, permissions: Permissions) -> Result<()> {
        self.subscribe_with(name, permissions, &SubscribeOptions::default())
    }

    /// Bind this handle to the named state.
    ///
    /// A writable subscription opens the shared object with `O_CREAT` and
    /// sizes a fresh object to one page (which therefore reads as zeros); a
    /// read-only subscription requires the object to exist already and
    /// fails with `ENOENT` otherwise. `WRITE` alone is normalized to
    /// `READ | WRITE`. On any failure the handle is left unsubscribed with
    /// no resources held.
    pub fn subscribe_with(
        &mut self,
        name: &str,
        permissions: Permissions,
        options: &SubscribeOptions,
    ) -> Result<()> {
        if self.sub.is_some() {
            return Err(Error::AlreadySubscribed);
        }
        if permissions.is_empty() {
            return Err(Error::NoPermissions);
        }
        let name = StateName::new(name)?;
        let permissions = permissions.normalized();

        // The mapping is read-only regardless of the permissions; the
        // permissions decide whether the object may be created and whether
        // transactions started from this handle may write.
        let len = shm::page_size();
        let region = if permissions.can_write() {
            RoRegion::open_or_create(name.os_name(), len, options.create_mode)?
        } else {
            RoRegion::open(name.os_name(), len)?
        };

        debug!(id = self.id, name = name.user_name(), %permissions, "subscribed");
        self.sub = Some(Subscription {
            name,
            permissions,
            region,
            unlink_on_unsubscribe: options.unlink_on_unsubscribe,
        });
        Ok(())
    }

    /// Drop the mapping and (by default) unlink the shared name.
    ///
    /// Idempotent and best-effort: a failing unlink is logged, and the
    /// handle becomes unsubscribed unconditionally. Transactions already
    /// started from this state keep their own mappings and are unaffected.
    pub fn unsubscribe(&mut self) {
        let Some(sub) = self.sub.take() else {
            return;
        };
        debug!(id = self.id, name = sub.name.user_name(), "unsubscribing");

        // Unmap before removing the name.
        drop(sub.region);
        if sub.unlink_on_unsubscribe {
            if let Err(e) = shm::unlink(sub.name.os_name()) {
                if e.errno() == shm::Errno::NOENT {
                    debug!(name = sub.name.user_name(), "name already unlinked");
                } else {
                    warn!(name = sub.name.user_name(), error = %e, "unlink failed");
                }
            }
        }
    }

    /// The user-visible name, or `None` when unsubscribed.
    pub fn name(&self) -> Option<&str> {
        self.sub.as_ref().map(|s| s.name.user_name())
    }

    /// The (normalized) subscription permissions; empty when unsubscribed.
    pub fn permissions(&self) -> Permissions {
        self.sub
            .as_ref()
            .map(|s| s.permissions)
            .unwrap_or_default()
    }

    /// This handle's id, or 0 when unsubscribed.
    pub fn id(&self) -> u32 {
        if self.sub.is_some() {
            self.id
        } else {
            0
        }
    }

    /// The committed bytes of the state, or `None` when unsubscribed.
    ///
    /// The view is read-only and live: a commit by any process shows up
    /// here. For a read that must not move underfoot, start a read-only
    /// [`Transaction`](crate::Transaction) and use its buffer.
    pub fn data(&self) -> Option<&[u8]> {
        self.sub.as_ref().map(|s| s.region.as_slice())
    }

    pub(crate) fn subscription_parts(&self) -> Option<(&StateName, Permissions, usize)> {
        self.sub
            .as_ref()
            .map(|s| (&s.name, s.permissions, s.region.len()))
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for State {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub {
            Some(s) => write!(
                f,
                "State {} on '{}' for {}",
                self.id,
                s.name.user_name(),
                s.permissions
            ),
            None => write!(f, "State <unsubscribed>"),
        }
    }
}
