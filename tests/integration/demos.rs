//! Built-in workloads on real worker pools.

use streamdf::demos::Demo;
use streamdf::{Runtime, RuntimeConfig};

fn runtime(workers: usize) -> Runtime {
    Runtime::new(RuntimeConfig {
        num_workers: workers,
        ..RuntimeConfig::default()
    })
    .expect("valid configuration")
}

#[test]
fn test_every_demo_is_correct() {
    for workers in [1, 2, 4] {
        let runtime = runtime(workers);
        for demo in Demo::ALL {
            let run = demo.run(&runtime, 100).expect("run completes");
            assert!(
                run.is_correct(),
                "{} on {} workers: {} != {}",
                demo,
                workers,
                run.checksum,
                run.expected
            );
            assert_eq!(run.report.frames_created, run.report.frames_executed);
        }
    }
}

#[test]
fn test_pipeline_reuses_buffers() {
    let run = Demo::Pipeline.run(&runtime(2), 50).expect("run completes");
    assert!(run.is_correct());
    assert_eq!(run.report.totals.reuse_hits + run.report.totals.reuse_copies, 50);
    // One node: every reuse is local.
    assert_eq!(run.report.totals.reuse_copies, 0);
}

#[test]
fn test_broadcast_copies_once_per_producer() {
    let run = Demo::Broadcast.run(&runtime(3), 40).expect("run completes");
    assert!(run.is_correct());
    assert_eq!(run.report.totals.broadcasts, 40);
}

#[test]
fn test_report_serializes() {
    let run = Demo::Reduction.run(&runtime(2), 16).expect("run completes");
    let json = serde_json::to_value(&run).expect("serializable");
    assert_eq!(json["demo"], "reduction");
    assert_eq!(json["report"]["workers"], 2);
    assert_eq!(json["checksum"], 136);
}
