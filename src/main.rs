//! Runs the fit policy scenario against one heap per policy and prints the
//! addresses chosen. Policies are given as arguments (`first`, `best`,
//! `worst`, `next`), or taken from `HEAPFIT_POLICY` when none are.
//!
//! ```text
//! cargo run -- best worst
//! ```

use anyhow::{Context, Result};
use log::{debug, info};

use heapfit::{FitPolicy, Heap, HeapConfig};

fn run(config: HeapConfig) -> Result<()> {
    let mut heap = Heap::new(config).context("could not create the heap")?;

    println!("\n== {} fit ==", config.policy);

    let ptr1 = heap.allocate(1000);
    let _buf1 = heap.allocate(1);
    let ptr2 = heap.allocate(5000);
    let _buf2 = heap.allocate(10);
    let ptr3 = heap.allocate(8000);
    println!("Best fit should pick this address: {ptr2:?}");
    println!("Worst fit should pick this address: {ptr3:?}");

    unsafe {
        heap.free(ptr1);
        heap.free(ptr2);
        heap.free(ptr3);
    }

    let ptr4 = heap.allocate(4000);
    println!("Chosen address: {ptr4:?}");

    unsafe { heap.free(ptr4) };

    debug!("{} blocks on the chain", heap.blocks().count());

    // The statistics report is printed when `heap` is dropped here.
    Ok(())
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let config = HeapConfig::from_env()?;

    let policies = std::env::args()
        .skip(1)
        .map(|arg| arg.parse::<FitPolicy>())
        .collect::<Result<Vec<_>, _>>()?;

    let policies = if policies.is_empty() { vec![config.policy] } else { policies };
    info!("running {} scenario(s)", policies.len());

    for policy in policies {
        run(config.with_policy(policy))?;
    }

    Ok(())
}
