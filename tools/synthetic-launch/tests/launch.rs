#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use synthetic_launch::{LaunchError, LaunchPlan, NumaPolicy};
use tracing_test::traced_test;

/// Write an executable shell script into a per-test temp directory.
fn script(test: &str, body: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("synthetic-launch-{}-{test}", std::process::id()));
    fs::create_dir_all(&dir).expect("create temp dir");
    let path = dir.join("fake-synthetic");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

#[tokio::test]
#[traced_test]
async fn propagates_child_exit_code() {
    let bin = script("exit-code", "exit 7");
    let plan = LaunchPlan::build(&NumaPolicy::Disabled, &bin, &["127.0.0.1:5190"]);

    assert_eq!(plan.run().await.expect("launch"), 7);
}

#[tokio::test]
async fn forwards_arguments_verbatim() {
    let bin = script("args", "printf '%s\\n' \"$@\" > \"$(dirname \"$0\")/argv\"");
    let args = [
        "127.0.0.1:5190",
        "--config",
        "client.config",
        "--threads",
        "16",
        "-d",
        "bimodal2",
        "-s",
    ];
    let plan = LaunchPlan::build(&NumaPolicy::Disabled, &bin, &args);

    assert_eq!(plan.run().await.expect("launch"), 0);
    let argv = fs::read_to_string(bin.with_file_name("argv")).expect("read argv");
    assert_eq!(argv.lines().collect::<Vec<_>>(), args);
}

#[tokio::test]
async fn signal_death_maps_to_128_plus_signal() {
    let bin = script("signal", "kill -TERM $$");
    let plan = LaunchPlan::build(&NumaPolicy::Disabled, &bin, &["127.0.0.1:5190"]);

    // SIGTERM is 15
    assert_eq!(plan.run().await.expect("launch"), 143);
}

#[tokio::test]
async fn missing_binary_is_not_found() {
    let plan = LaunchPlan::build(
        &NumaPolicy::Disabled,
        Path::new("/nonexistent/synthetic"),
        &["127.0.0.1:5190"],
    );

    let err = plan.run().await.expect_err("spawn should fail");
    assert!(matches!(err, LaunchError::NotFound(_)));
    assert_eq!(err.exit_code(), 127);
}

#[tokio::test]
async fn non_executable_binary_is_rejected() {
    let bin = script("noexec", "exit 0");
    fs::set_permissions(&bin, fs::Permissions::from_mode(0o644)).expect("chmod");
    let plan = LaunchPlan::build(&NumaPolicy::Disabled, &bin, &["127.0.0.1:5190"]);

    let err = plan.run().await.expect_err("spawn should fail");
    assert_eq!(err.exit_code(), 126);
}

#[tokio::test]
async fn numactl_wrapper_receives_node_and_binary() {
    // stands in for numactl: records its argv, then execs the rest after
    // dropping `-N <node>`
    let numactl = script(
        "numactl",
        "printf '%s\\n' \"$@\" > \"$(dirname \"$0\")/argv\"\nshift 2\nexec \"$@\"",
    );
    let bin = script("numactl-child", "exit 4");
    let numa = NumaPolicy::Node {
        node: 0,
        membind: false,
        numactl: numactl.clone(),
    };
    let plan = LaunchPlan::build(&numa, &bin, &["127.0.0.1:5190", "-s"]);

    assert_eq!(plan.run().await.expect("launch"), 4);
    let argv = fs::read_to_string(numactl.with_file_name("argv")).expect("read argv");
    let expected = ["-N", "0", bin.to_str().expect("utf8 path"), "127.0.0.1:5190", "-s"];
    assert_eq!(argv.lines().collect::<Vec<_>>(), expected);
}
