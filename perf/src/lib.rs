use kstate_core::unique_name;

/// A state name that is unique per process and label, so benchmark runs
/// never collide with each other or with leftovers from aborted runs.
pub fn bench_state_name(label: &str) -> String {
    unique_name(&format!("bench.{label}"))
}

/// A recognizable fill for commit payloads.
pub fn fill_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
