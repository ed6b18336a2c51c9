//! System information reported alongside benchmark summaries

use std::process;
use std::thread::available_parallelism;
use sysinfo::System;

/// Get the number of logical cores available on the machine.
pub fn num_cores() -> usize {
    available_parallelism().map(|n| n.get()).unwrap_or(1) // Fallback to 1 if detection fails
}

/// Get the memory usage of the current process and the total system memory, in MB.
/// Process memory is `None` if the process table could not be read.
pub fn get_memory_info() -> (Option<u64>, u64) {
    let mut system = System::new_all();
    system.refresh_all();

    let current_pid = process::id();
    let program_memory_mb = system
        .process(sysinfo::Pid::from(current_pid as usize))
        .map(|p| bytes_to_mb(p.memory()));
    let total_memory_mb = bytes_to_mb(system.total_memory());

    (program_memory_mb, total_memory_mb)
}

fn bytes_to_mb(bytes: u64) -> u64 {
    // Convert bytes to MB (binary)
    (bytes as f64 / 1_048_576.0).round() as u64
}
