use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "ccsim-rs-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_file(dir: &PathBuf, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write temp file");
    path
}

fn write_base_configs(dir: &PathBuf, ranks: usize) -> (PathBuf, PathBuf, PathBuf) {
    let network = write_file(
        dir,
        "network.json",
        &format!(
            r#"{{ "dims": [ {{ "size": {ranks}, "bandwidth_gb_per_sec": 1.0, "latency_ns": 500 }} ] }}"#
        ),
    );
    let system = write_file(dir, "system.json", "{}");
    let remote = write_file(dir, "remote.json", "{}");
    (system, network, remote)
}

fn all_reduce_trace() -> &'static str {
    r#"[
        { "id": 1, "type": "COMM_COLL", "comm_type": "all_reduce", "comm_size": 1024 }
    ]"#
}

#[test]
fn two_rank_all_reduce_reports_identical_finish_times() {
    let dir = unique_temp_dir("all-reduce");
    let (system, network, remote) = write_base_configs(&dir, 2);
    write_file(&dir, "trace.0.et", all_reduce_trace());
    write_file(&dir, "trace.1.et", all_reduce_trace());
    let workload = dir.join("trace");

    let output = Command::new(env!("CARGO_BIN_EXE_cluster_sim"))
        .args([
            "--workload-configuration",
            workload.to_str().unwrap(),
            "--system-configuration",
            system.to_str().unwrap(),
            "--network-configuration",
            network.to_str().unwrap(),
            "--remote-memory-configuration",
            remote.to_str().unwrap(),
        ])
        .output()
        .expect("run cluster_sim");
    assert!(
        output.status.success(),
        "cluster_sim failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    // 两次 1012ns 的传输加三次 100ns 的内存总线
    assert!(
        stdout.contains("rank_report rank=0 finished_at_ns=2324"),
        "stdout: {stdout}"
    );
    assert!(
        stdout.contains("rank_report rank=1 finished_at_ns=2324"),
        "stdout: {stdout}"
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn missing_trace_file_fails_with_nonzero_exit() {
    let dir = unique_temp_dir("missing-trace");
    let (system, network, remote) = write_base_configs(&dir, 2);
    let workload = dir.join("nonexistent");

    let output = Command::new(env!("CARGO_BIN_EXE_cluster_sim"))
        .args([
            "--workload-configuration",
            workload.to_str().unwrap(),
            "--system-configuration",
            system.to_str().unwrap(),
            "--network-configuration",
            network.to_str().unwrap(),
            "--remote-memory-configuration",
            remote.to_str().unwrap(),
        ])
        .output()
        .expect("run cluster_sim");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not exist"), "stderr: {stderr}");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn malformed_system_config_fails_with_nonzero_exit() {
    let dir = unique_temp_dir("bad-system");
    let (_system, network, remote) = write_base_configs(&dir, 2);
    let system = write_file(&dir, "broken.json", "{ not json");
    write_file(&dir, "trace.0.et", all_reduce_trace());
    write_file(&dir, "trace.1.et", all_reduce_trace());
    let workload = dir.join("trace");

    let output = Command::new(env!("CARGO_BIN_EXE_cluster_sim"))
        .args([
            "--workload-configuration",
            workload.to_str().unwrap(),
            "--system-configuration",
            system.to_str().unwrap(),
            "--network-configuration",
            network.to_str().unwrap(),
            "--remote-memory-configuration",
            remote.to_str().unwrap(),
        ])
        .output()
        .expect("run cluster_sim");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to parse"), "stderr: {stderr}");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn unknown_policy_name_is_a_config_error() {
    let dir = unique_temp_dir("bad-policy");
    let (_system, network, remote) = write_base_configs(&dir, 2);
    let system = write_file(
        &dir,
        "system.json",
        r#"{ "scheduling_policy": "mystery" }"#,
    );
    write_file(&dir, "trace.0.et", all_reduce_trace());
    write_file(&dir, "trace.1.et", all_reduce_trace());
    let workload = dir.join("trace");

    let output = Command::new(env!("CARGO_BIN_EXE_cluster_sim"))
        .args([
            "--workload-configuration",
            workload.to_str().unwrap(),
            "--system-configuration",
            system.to_str().unwrap(),
            "--network-configuration",
            network.to_str().unwrap(),
            "--remote-memory-configuration",
            remote.to_str().unwrap(),
        ])
        .output()
        .expect("run cluster_sim");
    assert!(!output.status.success());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn comm_scale_doubles_collective_payload() {
    let dir = unique_temp_dir("comm-scale");
    let (system, network, remote) = write_base_configs(&dir, 2);
    write_file(&dir, "trace.0.et", all_reduce_trace());
    write_file(&dir, "trace.1.et", all_reduce_trace());
    let workload = dir.join("trace");

    let output = Command::new(env!("CARGO_BIN_EXE_cluster_sim"))
        .args([
            "--workload-configuration",
            workload.to_str().unwrap(),
            "--system-configuration",
            system.to_str().unwrap(),
            "--network-configuration",
            network.to_str().unwrap(),
            "--remote-memory-configuration",
            remote.to_str().unwrap(),
            "--comm-scale",
            "2.0",
        ])
        .output()
        .expect("run cluster_sim");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    // chunk 变成 1024B：tx = 500 + 1024，总线不变。
    assert!(
        stdout.contains("rank_report rank=0 finished_at_ns=3348"),
        "stdout: {stdout}"
    );

    let _ = fs::remove_dir_all(&dir);
}
