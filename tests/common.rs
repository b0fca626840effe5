#![allow(dead_code)]

use nbmap::HashMap;

// Run the test on different configurations of a `HashMap`.
pub fn with_map(mut test: impl FnMut(&dyn Fn() -> HashMap)) {
    // Default configuration.
    if !cfg!(nbmap_stress) {
        test(&(|| HashMap::builder().build().unwrap()));
    }

    // The smallest table with a single slot copied per operation, to stress operations
    // on nested generations.
    test(&(|| HashMap::builder().scale(0).copy_chunk(1).build().unwrap()));

    // A small table with a large chunk to promote interference with incremental copying.
    test(&(|| HashMap::builder().scale(4).copy_chunk(128).build().unwrap()));
}

// Installs a `tracing` subscriber configured through `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Returns the number of threads to use for stress testing.
pub fn threads() -> usize {
    if cfg!(miri) {
        2
    } else {
        num_cpus::get_physical().next_power_of_two()
    }
}
