// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use cvd_core::test_support::{group_config, instance_config};
use std::sync::{Arc, Mutex};

struct RecordingNode {
    name: &'static str,
    deps: &'static [&'static str],
    log: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl ImageNode for RecordingNode {
    fn name(&self) -> &'static str {
        self.name
    }

    fn dependencies(&self) -> &'static [&'static str] {
        self.deps
    }

    async fn generate(&self, _ctx: &PipelineContext) -> Result<(), Status> {
        self.log.lock().unwrap().push(self.name);
        Ok(())
    }
}

fn recording_pipeline(
    specs: &[(&'static str, &'static [&'static str])],
) -> (PipelineRunner, Arc<Mutex<Vec<&'static str>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let nodes: Vec<Box<dyn ImageNode>> = specs
        .iter()
        .map(|&(name, deps)| {
            Box::new(RecordingNode {
                name,
                deps,
                log: Arc::clone(&log),
            }) as Box<dyn ImageNode>
        })
        .collect();
    (PipelineRunner::new(nodes), log)
}

fn context(dir: &std::path::Path) -> PipelineContext {
    let config = group_config(dir);
    let instance = instance_config(dir, 1);
    PipelineContext {
        config,
        instance,
        avb: crate::avb::Avb::new("/host/bin/avbtool", "SHA256_RSA4096", "/host/key.pem"),
        default_target_zip: None,
        system_target_zip: None,
    }
}

// ── Topological ordering ─────────────────────────────────────────────────────

#[tokio::test]
async fn dependencies_run_before_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let (runner, log) = recording_pipeline(&[
        ("composite", &["boot", "env"]),
        ("env", &[]),
        ("boot", &["env"]),
    ]);
    runner.run(&context(dir.path())).await.unwrap();

    let order = log.lock().unwrap().clone();
    let position = |name| order.iter().position(|&n| n == name).unwrap();
    assert!(position("env") < position("boot"));
    assert!(position("boot") < position("composite"));
    assert_eq!(order.len(), 3);
}

#[tokio::test]
async fn unknown_dependency_is_an_invariant_error() {
    let dir = tempfile::tempdir().unwrap();
    let (runner, _) = recording_pipeline(&[("composite", &["missing"])]);
    let err = runner.run(&context(dir.path())).await.unwrap_err();
    assert_eq!(err.kind, cvd_core::StatusKind::Invariant);
    assert!(err.message.contains("missing"));
}

#[tokio::test]
async fn cycle_is_an_invariant_error() {
    let dir = tempfile::tempdir().unwrap();
    let (runner, _) = recording_pipeline(&[("a", &["b"]), ("b", &["a"])]);
    let err = runner.run(&context(dir.path())).await.unwrap_err();
    assert_eq!(err.kind, cvd_core::StatusKind::Invariant);
    assert!(err.message.contains("cycle"));
}

#[test]
fn standard_pipeline_orders_cleanly() {
    let runner = PipelineRunner::standard();
    let order = runner.topological_order().unwrap();
    assert_eq!(order.len(), 18);
}

#[tokio::test]
async fn node_failures_carry_the_node_name() {
    struct FailingNode;

    #[async_trait]
    impl ImageNode for FailingNode {
        fn name(&self) -> &'static str {
            "exploding"
        }

        async fn generate(&self, _ctx: &PipelineContext) -> Result<(), Status> {
            Err(Status::filesystem("disk on fire"))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let runner = PipelineRunner::new(vec![Box::new(FailingNode)]);
    let err = runner.run(&context(dir.path())).await.unwrap_err();
    assert!(err.message.contains("exploding"));
    assert!(err.message.contains("disk on fire"));
}

// ── Disk-space guard ─────────────────────────────────────────────────────────

#[test]
fn guard_passes_with_no_data_image() {
    let dir = tempfile::tempdir().unwrap();
    PipelineRunner::check_disk_space(&context(dir.path())).unwrap();
}

#[test]
fn guard_passes_for_fully_allocated_image() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    std::fs::write(&ctx.instance.data_image, vec![1u8; 4096]).unwrap();
    PipelineRunner::check_disk_space(&ctx).unwrap();
}

#[test]
fn guard_fails_when_sparse_hole_exceeds_free_space() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    // Sparse-extend past what the filesystem can provide.
    let target = cvd_adapters::files::available_space(dir.path()).unwrap() + (1 << 30);
    let file = std::fs::File::create(&ctx.instance.data_image).unwrap();
    if file.set_len(target).is_err() {
        // Filesystem refuses a sparse file that large; nothing to verify.
        return;
    }
    drop(file);

    let err = PipelineRunner::check_disk_space(&ctx).unwrap_err();
    assert!(err.message.contains("not enough space"));
}
