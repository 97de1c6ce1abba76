//! Fans one kernel out to every device and collects the results later.
//!
//! ```text
//! MQPU_DEVICES=4 RUST_LOG=debug cargo run --example multi_device --features subscriber
//! ```

use std::collections::BTreeMap;
use std::error::Error;
use std::thread;
use std::time::Duration;

use mqpu_dispatch::prelude::*;
use mqpu_dispatch::telemetry::init_tracing;

const TROTTER_ITERS: u64 = 7;

/// Tallies how often each operation appears in the unrolled program.
fn tally(job: &JobDescriptor<Kernel>, device: DeviceId) -> BTreeMap<String, usize> {
    // stand-in for real device latency
    thread::sleep(Duration::from_millis(50 * (device.index() as u64 + 1)));
    job.program().unroll(job.repeat_count()).into_iter().fold(BTreeMap::new(), |mut acc, step| {
        *acc.entry(step.op).or_insert(0) += 1;
        acc
    })
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing()?;

    let target = Target::from_env()?;
    println!("Number of devices: {}", target.num_devices());

    let executor = CpuExecutor::new(&target, |job: &JobDescriptor<Kernel>, device: DeviceId| Ok(tally(job, device)))?;
    let dispatcher = Dispatcher::new(target, executor);

    let kernel = Kernel::new("trotter", 4).repeat([
        Step::new("cy", [0, 3]),
        Step::new("ry", [1]).with_params([0.26]),
        Step::new("cx", [1, 2]),
    ]);
    println!("Kernel {}: {} qubits, {} steps per iteration", kernel.name(), kernel.width(), kernel.body().len());
    let job = JobDescriptor::kernel(kernel, TROTTER_ITERS)?;

    let handles = dispatcher.dispatch_all_devices(&job)?;

    println!("I can do something else while I wait for the results");

    for handle in &handles {
        let counts = handle.get()?;
        println!("{}: {counts:?}", handle.device());
    }

    Ok(())
}
