//! Two-process end-to-end test: a writer process publishes a counter through
//! optimistic transactions while this process watches the committed bytes
//! through its own subscription.
//!
//! The test re-invokes its own executable with a role environment variable
//! to get a genuinely separate OS process on the other side of the shared
//! region:
//!
//! ```text
//! [orchestrator] ─ subscribe(read) ──► poll committed counter ──► verify
//!       │
//!       └─ spawn ─► [writer] subscribe(read|write), then
//!                   start / bump counter / commit, TARGET times
//! ```

use std::env;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use kstate_core::{unique_name, Errno, Permissions, State, Transaction};

/// Writes to stderr with an immediate flush, bypassing test output capture.
macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const ENV_ROLE: &str = "KSTATE_E2E_ROLE";
const ENV_NAME: &str = "KSTATE_E2E_NAME";
const ROLE_WRITER: &str = "writer";

/// Number of commits the writer performs.
const TARGET: u64 = 400;

/// The writer pauses briefly every this many commits so the watcher gets to
/// observe intermediate values.
const WRITER_BATCH_SIZE: u64 = 50;

fn counter_of(bytes: &[u8]) -> u64 {
    u64::from_le_bytes(bytes[..8].try_into().expect("8 bytes"))
}

/// Child-process entry point: create the state and commit 1..=TARGET.
fn run_writer(state_name: &str) {
    log!("[WRITER] Subscribing to '{state_name}' for read|write");
    let mut state = State::new();
    state
        .subscribe(state_name, Permissions::READ | Permissions::WRITE)
        .expect("writer: subscribe");

    for i in 1..=TARGET {
        let mut txn = Transaction::new();
        txn.start(&state, Permissions::WRITE).expect("writer: start");
        txn.data_mut().expect("writer: working buffer")[..8].copy_from_slice(&i.to_le_bytes());
        // Sole writer: the optimistic commit can never lose.
        txn.commit().expect("writer: commit");

        if i % WRITER_BATCH_SIZE == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    log!("[WRITER] Done, {TARGET} commits");
    // Dropping `state` unsubscribes and unlinks the name; the
    // orchestrator's existing mapping stays readable regardless.
}

#[test]
fn two_process_commit_visibility() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let state_name = env::var(ENV_NAME).expect("KSTATE_E2E_NAME not set");
        match role.as_str() {
            ROLE_WRITER => run_writer(&state_name),
            other => panic!("Unknown role: {other}"),
        }
        return;
    }

    let state_name = unique_name("e2e");
    let exe = env::current_exe().expect("current executable path");

    log!("[ORCHESTRATOR] Spawning writer for state '{state_name}'");
    let mut writer_proc = Command::new(&exe)
        .arg("--exact")
        .arg("two_process_commit_visibility")
        .env(ENV_ROLE, ROLE_WRITER)
        .env(ENV_NAME, &state_name)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("spawn writer process");

    // The writer creates the state; retry the read-only subscribe until the
    // name appears.
    let mut state = State::new();
    let subscribe_deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match state.subscribe(&state_name, Permissions::READ) {
            Ok(()) => break,
            Err(e) if e.errno() == Errno::NOENT && Instant::now() < subscribe_deadline => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => panic!("[ORCHESTRATOR] subscribe failed: {e}"),
        }
    }
    log!("[ORCHESTRATOR] Subscribed read-only, watching commits");

    // Watch the live view while the writer runs. Values observed mid-commit
    // may be transient, so only progress is sampled here; correctness is
    // asserted on the final bytes below.
    let mut observations = 0u64;
    let mut last_seen = 0u64;
    let watch_deadline = Instant::now() + Duration::from_secs(20);
    while Instant::now() < watch_deadline {
        let seen = counter_of(state.data().expect("mapped"));
        if seen != last_seen {
            observations += 1;
            last_seen = seen;
        }
        if seen == TARGET {
            break;
        }
        std::hint::spin_loop();
    }

    let writer_status = writer_proc.wait().expect("wait for writer");
    log!("[ORCHESTRATOR] Writer exit status: {writer_status}, {observations} value changes observed");
    assert!(writer_status.success(), "writer failed: {writer_status}");

    // The writer has exited; the view is stable now.
    assert_eq!(counter_of(state.data().expect("mapped")), TARGET);
    assert!(observations > 0, "never observed a committed value");

    // The writer already unlinked the name on exit, so a fresh subscriber
    // cannot find it anymore...
    let mut late = State::new();
    let err = late
        .subscribe(&state_name, Permissions::READ)
        .expect_err("name should be unlinked");
    assert_eq!(err.errno(), Errno::NOENT);

    // ...while this process's established mapping still reads the final
    // value.
    assert_eq!(counter_of(state.data().expect("mapped")), TARGET);
}
