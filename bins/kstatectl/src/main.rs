//! kstatectl: read, write, and watch shared states from the command line.
//!
//! `get` and `watch` take a stable snapshot through a read-only transaction;
//! `set` goes through a writable transaction and retries a bounded number of
//! times when it loses the optimistic commit race. None of the inspection
//! commands unlink the state's name; `unlink` does exactly that and nothing
//! else.

mod config;

use config::{ConfigError, CtlConfig};
use kstate_core::{Errno, Permissions, State, SubscribeOptions, Transaction};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const CONFIG_PATH: &str = "kstatectl.toml";

const USAGE: &str = "usage: kstatectl <get|set|watch|unlink> <name> [value]
    get <name>          print the state's bytes
    set <name> <value>  commit <value> (UTF-8, or 0x-prefixed hex) at offset 0
    watch <name>        poll the state and print every change
    unlink <name>       remove the state's name from the namespace";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match CtlConfig::load(CONFIG_PATH) {
        Ok(config) => config,
        // No config file is the normal case; everything has a default.
        Err(ConfigError::Read { .. }) => CtlConfig::default(),
        Err(e) => return Err(e.into()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, name, value) = match args.as_slice() {
        [command, name] => (command.as_str(), name.as_str(), None),
        [command, name, value] => (command.as_str(), name.as_str(), Some(value.as_str())),
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    debug!(command, name, "kstatectl starting");
    match (command, value) {
        ("get", None) => get(name, &config),
        ("set", Some(value)) => set(name, value, &config),
        ("watch", None) => watch(name, &config),
        ("unlink", None) => unlink(name),
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

/// Inspection commands must not tear the name down when they are done.
fn keep_name() -> SubscribeOptions {
    SubscribeOptions {
        unlink_on_unsubscribe: false,
        ..SubscribeOptions::default()
    }
}

fn get(name: &str, config: &CtlConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut state = State::new();
    state.subscribe_with(name, Permissions::READ, &keep_name())?;

    // A read-only transaction pins the bytes while they are printed.
    let mut txn = Transaction::new();
    txn.start(&state, Permissions::READ)?;
    dump(txn.data().expect("active transaction"), config.dump_width);
    txn.abort()?;
    Ok(())
}

fn set(name: &str, value: &str, config: &CtlConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = parse_value(value)?;

    let mut state = State::new();
    state.subscribe_with(name, Permissions::READ | Permissions::WRITE, &keep_name())?;
    let page = state.data().expect("subscribed").len();
    if bytes.len() > page {
        return Err(format!("value is {} bytes, the state holds {page}", bytes.len()).into());
    }

    for attempt in 1..=config.set_retries {
        let mut txn = Transaction::new();
        txn.start(&state, Permissions::WRITE)?;
        txn.data_mut().expect("writable transaction")[..bytes.len()].copy_from_slice(&bytes);
        match txn.commit() {
            Ok(()) => {
                info!(name, len = bytes.len(), attempt, "committed");
                return Ok(());
            }
            Err(e) if e.errno() == Errno::PERM => {
                debug!(name, attempt, "lost the commit race, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(format!("gave up after {} conflicting commits", config.set_retries).into())
}

fn watch(name: &str, config: &CtlConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut state = State::new();
    state.subscribe_with(name, Permissions::READ, &keep_name())?;
    info!(name, interval_ms = config.poll_interval_ms, "watching");

    let mut previous: Option<Vec<u8>> = None;
    loop {
        // Snapshot through a read-only transaction so a commit landing
        // mid-print cannot tear the output.
        let mut txn = Transaction::new();
        txn.start(&state, Permissions::READ)?;
        let current = txn.data().expect("active transaction").to_vec();
        txn.abort()?;

        if previous.as_deref() != Some(&current[..]) {
            println!("--- {name} changed:");
            dump(&current, config.dump_width);
            previous = Some(current);
        }
        std::thread::sleep(std::time::Duration::from_millis(config.poll_interval_ms));
    }
}

fn unlink(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut state = State::new();
    // Default options unlink on unsubscribe, which is the whole point here.
    state.subscribe(name, Permissions::READ)?;
    state.unsubscribe();
    info!(name, "unlinked");
    Ok(())
}

/// `0x`-prefixed hex, or the literal UTF-8 bytes.
fn parse_value(value: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let Some(hex) = value.strip_prefix("0x") else {
        return Ok(value.as_bytes().to_vec());
    };
    if hex.is_empty() || hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err("hex value must be an even number of hex digits".into());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(Into::into))
        .collect()
}

/// Hex dump with all-zero rows collapsed into a single `*`.
fn dump(bytes: &[u8], width: usize) {
    let width = width.max(1);
    let mut skipping = false;
    for (i, row) in bytes.chunks(width).enumerate() {
        if row.iter().all(|&b| b == 0) {
            if !skipping {
                println!("*");
                skipping = true;
            }
            continue;
        }
        skipping = false;
        let hex: Vec<String> = row.iter().map(|b| format!("{b:02x}")).collect();
        println!("{:08x}  {}", i * width, hex.join(" "));
    }
    println!("{:08x}", bytes.len());
}
