//! `kstate-core`: shared state for cooperating processes on one host.
//!
//! Each named state is a page-sized shared-memory region. Any process can
//! subscribe to it by name and gets a read-only view of the committed bytes;
//! updates go through optimistic transactions that either commit atomically
//! or are rejected because someone else committed first.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐  read-only map   ┌──────────────────┐
//! │  State A  │ ───────────────► │                  │
//! │ (Process  │                  │  shared region   │
//! │     1)    │                  │  "/kstate.Name"  │
//! └───────────┘                  │   (one page)     │
//! ┌───────────┐  read-only map   │                  │
//! │  State B  │ ───────────────► │                  │
//! │ (Process  │                  └──────────────────┘
//! │     2)    │                        ▲
//! └───────────┘                        │ commit: compare snapshot,
//!       │ start                        │ then copy working buffer
//!       ▼                              │
//! ┌─────────────────────────────┐      │
//! │ Transaction                 │ ─────┘
//! │  live map + snapshot +      │
//! │  private working buffer     │
//! └─────────────────────────────┘
//! ```
//!
//! The state's own mapping is never writable; the MMU, not a code check,
//! enforces that readers cannot scribble on shared bytes. A transaction
//! re-opens the region on its own, so it keeps working after its originating
//! [`State`] is unsubscribed or dropped.
//!
//! # Example
//!
//! ```ignore
//! use kstate_core::{Permissions, State, Transaction};
//!
//! let mut state = State::new();
//! state.subscribe("Sensor.Temperature", Permissions::READ | Permissions::WRITE)?;
//!
//! let mut txn = Transaction::new();
//! txn.start(&state, Permissions::WRITE)?;
//! txn.data_mut().unwrap()[..4].copy_from_slice(&25i32.to_le_bytes());
//! txn.commit()?; // fails with EPERM if another writer got there first
//!
//! assert_eq!(&state.data().unwrap()[..4], &25i32.to_le_bytes());
//! ```

#![forbid(unsafe_code)]

mod error;
mod id;
mod name;
mod perms;
mod state;
mod transaction;

pub use error::{Error, Result};
pub use name::{unique_name, MAX_NAME_LEN};
pub use perms::Permissions;
pub use state::{State, SubscribeOptions};
pub use transaction::Transaction;

// Callers tightening `SubscribeOptions::create_mode` need the mode bits;
// errno matching in tests and bindings needs `Errno`.
pub use kstate_shm::{Errno, Mode};
