use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use mqpu_dispatch::error::BoxError;
use mqpu_dispatch::prelude::*;
use parking_lot::Mutex;
use rand::Rng;

fn trotter() -> Kernel {
    Kernel::new("trotter", 4).repeat([
        Step::new("cy", [0, 3]),
        Step::new("ry", [1]).with_params([0.26]),
        Step::new("cx", [1, 2]),
    ])
}

#[test]
fn test_every_device_runs_the_unrolled_kernel() {
    let target = Target::new("cpu-mqpu", 4).unwrap();
    let exec = CpuExecutor::new(&target, |job: &JobDescriptor<Kernel>, device: DeviceId| {
        let steps = job.program().unroll(job.repeat_count());
        Ok((device, steps.len(), thread::current().name().map(str::to_string)))
    })
    .unwrap();
    let dispatcher = Dispatcher::new(target, exec);

    let job = JobDescriptor::kernel(trotter(), 7).unwrap();
    let handles = dispatcher.dispatch_all_devices(&job).unwrap();
    assert_eq!(handles.len(), 4);

    for (i, handle) in handles.iter().enumerate() {
        let (device, steps, worker) = handle.get().unwrap();
        assert_eq!(device, DeviceId(i));
        assert_eq!(steps, 21);
        assert_eq!(worker.as_deref(), Some(format!("device-{i}").as_str()));
    }
}

#[test]
fn test_shared_kernel_over_executor_devices() {
    let target = Target::new("cpu-mqpu", 3).unwrap();
    let exec = CpuExecutor::new(&target, |job: &JobDescriptor<Kernel>, _device: DeviceId| {
        let kernel = job.program();
        Ok((kernel.width(), kernel.body().len() as u64 * job.repeat_count()))
    })
    .unwrap();
    let dispatcher = Dispatcher::new(target, exec);
    let devices = dispatcher.executor().device_count();
    assert_eq!(devices, 3);

    let kernel = Arc::new(trotter());
    for repeat in [1, 5] {
        let job = JobDescriptor::from_shared(Arc::clone(&kernel), repeat);
        assert!(std::ptr::eq(job.program(), Arc::as_ptr(&kernel)));
        let handles = dispatcher.dispatch_all(&job, devices).unwrap();
        assert_eq!(handles.len(), devices);
        for handle in &handles {
            assert_eq!(handle.get().unwrap(), (4, 3 * repeat));
        }
    }
}

#[test]
fn test_random_completion_order() {
    let target = Target::new("cpu-mqpu", 6).unwrap();
    let exec = CpuExecutor::new(&target, |job: &JobDescriptor<u64>, device: DeviceId| {
        let millis = rand::rng().random_range(0..40);
        thread::sleep(Duration::from_millis(millis));
        Ok(job.program() * 100 + device.index() as u64)
    })
    .unwrap();
    let dispatcher = Dispatcher::new(target, exec);
    let handles = dispatcher.dispatch_all_devices(&JobDescriptor::new(3, 1)).unwrap();

    for (i, handle) in handles.iter().enumerate().rev() {
        assert_eq!(handle.get().unwrap(), 300 + i as u64);
    }
}

#[test]
fn test_execution_failure_is_isolated_to_its_device() {
    let target = Target::new("cpu-mqpu", 3).unwrap();
    let exec = CpuExecutor::new(&target, |_: &JobDescriptor<()>, device: DeviceId| -> Result<usize, BoxError> {
        if device == DeviceId(1) {
            return Err("calibration drift".into());
        }
        Ok(device.index())
    })
    .unwrap();
    let dispatcher = Dispatcher::new(target, exec);
    let handles = dispatcher.dispatch_all_devices(&JobDescriptor::new((), 1)).unwrap();

    assert_eq!(handles[0].get().unwrap(), 0);
    assert_eq!(handles[2].get().unwrap(), 2);
    match handles[1].get() {
        Err(RetrieveError::Execution(err)) => {
            assert_eq!(err.device, DeviceId(1));
            assert_eq!(err.source.to_string(), "calibration drift");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(handles[1].state(), HandleState::Failed);
}

#[test]
fn test_unavailable_device_fails_fast() {
    let target = Target::new("cpu-mqpu", 3).unwrap();
    let exec = CpuExecutor::new(&target, |_: &JobDescriptor<()>, device: DeviceId| Ok(device.index())).unwrap();
    exec.set_available(DeviceId(1), false);
    let dispatcher = Dispatcher::new(target, exec);

    let err = dispatcher.dispatch_all_devices(&JobDescriptor::new((), 1)).unwrap_err();
    assert_eq!(err.first(), Some(&SubmissionError::DeviceUnavailable { device: DeviceId(1) }));
    assert_eq!(err.handles().len(), 1);
    assert_eq!(err.handles()[0].get().unwrap(), 0);

    // retry is the caller's job
    dispatcher.executor().set_available(DeviceId(1), true);
    let retried = dispatcher.dispatch(&JobDescriptor::new((), 1), DeviceId(1)).unwrap();
    assert_eq!(retried.get().unwrap(), 1);
}

#[test]
fn test_cancelled_job_is_skipped_on_a_busy_device() {
    let (release, gate) = mpsc::channel::<()>();
    let gate = Arc::new(Mutex::new(gate));
    let runs = Arc::new(AtomicUsize::new(0));

    let target = Target::new("cpu-mqpu", 1).unwrap();
    let exec = {
        let gate = Arc::clone(&gate);
        let runs = Arc::clone(&runs);
        CpuExecutor::new(&target, move |job: &JobDescriptor<bool>, _device: DeviceId| {
            runs.fetch_add(1, Ordering::SeqCst);
            if *job.program() {
                gate.lock().recv().map_err(|e| -> BoxError { Box::new(e) })?;
            }
            Ok(job.repeat_count())
        })
        .unwrap()
    };
    let dispatcher = Dispatcher::new(target, exec);

    let blocking = dispatcher.dispatch(&JobDescriptor::new(true, 1), DeviceId(0)).unwrap();
    let queued = dispatcher.dispatch(&JobDescriptor::new(false, 2), DeviceId(0)).unwrap();

    assert!(queued.cancel());
    release.send(()).unwrap();

    assert_eq!(blocking.get().unwrap(), 1);
    assert!(matches!(queued.get(), Err(RetrieveError::Cancelled { .. })));

    // the lane is serial, so once a follow-up job finishes the cancelled one was already skipped
    let follow_up = dispatcher.dispatch(&JobDescriptor::new(false, 3), DeviceId(0)).unwrap();
    assert_eq!(follow_up.get().unwrap(), 3);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_timeout_does_not_disturb_execution() {
    let target = Target::new("cpu-mqpu", 1).unwrap();
    let exec = CpuExecutor::new(&target, |_: &JobDescriptor<()>, _: DeviceId| {
        thread::sleep(Duration::from_millis(80));
        Ok("done")
    })
    .unwrap();
    let dispatcher = Dispatcher::new(target, exec);
    let handle = dispatcher.dispatch(&JobDescriptor::new((), 1), DeviceId(0)).unwrap();

    assert!(matches!(
        handle.get_timeout(Duration::from_millis(5)),
        Err(RetrieveError::Timeout { .. })
    ));
    assert_eq!(handle.get_timeout(Duration::from_secs(5)).unwrap(), "done");
}

#[test]
fn test_handles_can_be_awaited() {
    let target = Target::new("cpu-mqpu", 3).unwrap();
    let exec = CpuExecutor::new(&target, |job: &JobDescriptor<Kernel>, _: DeviceId| {
        Ok(job.program().name().to_string())
    })
    .unwrap();
    let dispatcher = Dispatcher::new(target, exec);
    let handles = dispatcher.dispatch_all_devices(&JobDescriptor::kernel(trotter(), 2).unwrap()).unwrap();

    let names = pollster::block_on(async {
        let mut names = Vec::new();
        for handle in &handles {
            names.push(handle.wait().await.unwrap());
        }
        names
    });
    assert_eq!(names, vec!["trotter"; 3]);
}
