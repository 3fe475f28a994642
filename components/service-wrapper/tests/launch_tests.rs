//! End-to-end launches of small shell programs through the wrapper runtime.
#![cfg(unix)]

use service_wrapper::helpers::load_config::{LogMode, WrapperConfig};
use service_wrapper::launcher::errors::EXIT_NOT_FOUND;
use service_wrapper::launcher::strategy::StrategySelection;
use service_wrapper::runtime::runtime::run_wrapper;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use sync_common::helpers::shutdown::Shutdown;

fn write_script(path: &Path, body: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// A resolved config that runs `main.sh` from `root` with the host `sh`.
fn sh_config(root: &Path) -> WrapperConfig {
    WrapperConfig {
        install_root: root.to_path_buf(),
        interpreter: "sh".into(),
        entry_point: "main.sh".into(),
        echo_to_console: false,
        grace_period_secs: 2,
        ..WrapperConfig::default()
    }
    .resolve()
    .unwrap()
}

fn captured(config: &WrapperConfig) -> String {
    std::fs::read_to_string(config.capture_path()).unwrap()
}

#[tokio::test]
async fn existing_log_directory_is_reused() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("log")).unwrap();
    write_script(&root.path().join("main.sh"), "echo started\n");

    let config = sh_config(root.path());
    let code = run_wrapper(&config, &Shutdown::new()).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(captured(&config), "started\n");
}

#[tokio::test]
async fn missing_log_directory_is_created() {
    let root = tempfile::tempdir().unwrap();
    write_script(&root.path().join("main.sh"), "echo started\n");

    let config = sh_config(root.path());
    run_wrapper(&config, &Shutdown::new()).await.unwrap();

    assert!(root.path().join("log").is_dir());
    assert!(config.capture_path().is_file());
}

#[tokio::test]
async fn program_runs_from_the_installation_root() {
    let root = tempfile::tempdir().unwrap();
    write_script(&root.path().join("main.sh"), "pwd -P\n");

    let config = sh_config(root.path());
    run_wrapper(&config, &Shutdown::new()).await.unwrap();

    let expected = root.path().canonicalize().unwrap();
    assert_eq!(captured(&config).trim_end(), expected.to_str().unwrap());
}

#[tokio::test]
async fn isolated_environment_is_used_when_present() {
    let root = tempfile::tempdir().unwrap();
    let env_dir = root.path().join(".venv");
    write_script(&env_dir.join("bin").join("activate"), "");
    write_script(
        &env_dir.join("bin").join("sh"),
        "#!/bin/sh\necho \"env=$VIRTUAL_ENV entry=$1\"\n",
    );
    write_script(&root.path().join("main.sh"), "echo host\n");

    let config = sh_config(root.path());
    let code = run_wrapper(&config, &Shutdown::new()).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(
        captured(&config),
        format!("env={} entry=main.sh\n", env_dir.display())
    );
}

#[tokio::test]
async fn host_runtime_is_used_without_isolated_environment() {
    let root = tempfile::tempdir().unwrap();
    write_script(&root.path().join("main.sh"), "echo \"env=${VIRTUAL_ENV:-none}\"\n");

    let config = sh_config(root.path());
    run_wrapper(&config, &Shutdown::new()).await.unwrap();

    let out = captured(&config);
    // The host may itself run inside an environment; only the wrapper's own
    // environment directory must not leak in.
    assert!(out.starts_with("env="));
    assert!(!out.contains(".venv"));
}

#[tokio::test]
async fn forced_direct_strategy_skips_present_environment() {
    let root = tempfile::tempdir().unwrap();
    let env_dir = root.path().join(".venv");
    write_script(&env_dir.join("bin").join("activate"), "");
    write_script(&env_dir.join("bin").join("sh"), "#!/bin/sh\necho isolated\n");
    write_script(&root.path().join("main.sh"), "echo host\n");

    let mut config = sh_config(root.path());
    config.strategy = StrategySelection::Direct;
    run_wrapper(&config, &Shutdown::new()).await.unwrap();

    assert_eq!(captured(&config), "host\n");
}

#[tokio::test]
async fn large_output_on_both_streams_is_fully_captured() {
    let root = tempfile::tempdir().unwrap();
    write_script(
        &root.path().join("main.sh"),
        "i=0\nwhile [ $i -lt 5000 ]; do\n  echo \"out $i\"\n  echo \"err $i\" >&2\n  i=$((i+1))\ndone\n",
    );

    let config = sh_config(root.path());
    let code = run_wrapper(&config, &Shutdown::new()).await.unwrap();
    assert_eq!(code, 0);

    let out = captured(&config);
    let stdout_lines = out.lines().filter(|l| l.starts_with("out ")).count();
    let stderr_lines = out.lines().filter(|l| l.starts_with("err ")).count();
    assert_eq!(stdout_lines, 5000);
    assert_eq!(stderr_lines, 5000);
    assert!(out.contains("out 4999\n"));
    assert!(out.contains("err 4999\n"));
}

#[tokio::test]
async fn blocked_log_directory_prevents_launch() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("log"), b"a file, not a directory").unwrap();
    write_script(&root.path().join("main.sh"), "touch launched\n");

    let config = sh_config(root.path());
    let err = run_wrapper(&config, &Shutdown::new()).await.unwrap_err();

    assert_eq!(err.exit_code(), 1);
    assert!(!root.path().join("launched").exists());
}

#[tokio::test]
async fn missing_entry_point_fails_with_output_in_the_log() {
    let root = tempfile::tempdir().unwrap();

    let config = sh_config(root.path());
    let code = run_wrapper(&config, &Shutdown::new()).await.unwrap();

    assert_ne!(code, 0);
    assert!(!captured(&config).is_empty());
}

#[tokio::test]
async fn missing_interpreter_is_reported_in_the_log() {
    let root = tempfile::tempdir().unwrap();
    let mut config = sh_config(root.path());
    config.interpreter = "multi-sync-no-such-runtime".into();

    let err = run_wrapper(&config, &Shutdown::new()).await.unwrap_err();

    assert_eq!(err.exit_code(), EXIT_NOT_FOUND);
    assert!(captured(&config).contains("failed to launch"));
}

#[tokio::test]
async fn exit_code_is_propagated() {
    let root = tempfile::tempdir().unwrap();
    write_script(&root.path().join("main.sh"), "echo failing\nexit 3\n");

    let config = sh_config(root.path());
    let code = run_wrapper(&config, &Shutdown::new()).await.unwrap();

    assert_eq!(code, 3);
}

#[tokio::test]
async fn append_mode_keeps_earlier_runs() {
    let root = tempfile::tempdir().unwrap();
    write_script(&root.path().join("main.sh"), "echo run\n");

    let config = sh_config(root.path());
    run_wrapper(&config, &Shutdown::new()).await.unwrap();
    run_wrapper(&config, &Shutdown::new()).await.unwrap();

    assert_eq!(captured(&config), "run\nrun\n");
}

#[tokio::test]
async fn truncate_mode_keeps_only_the_latest_run() {
    let root = tempfile::tempdir().unwrap();
    write_script(&root.path().join("main.sh"), "echo run\n");

    let mut config = sh_config(root.path());
    config.log_mode = LogMode::Truncate;
    run_wrapper(&config, &Shutdown::new()).await.unwrap();
    run_wrapper(&config, &Shutdown::new()).await.unwrap();

    assert_eq!(captured(&config), "run\n");
}

#[tokio::test]
async fn shutdown_kills_a_child_that_ignores_it() {
    let root = tempfile::tempdir().unwrap();
    write_script(&root.path().join("main.sh"), "echo waiting\nexec sleep 60\n");

    let mut config = sh_config(root.path());
    config.grace_period_secs = 0;
    let shutdown = Shutdown::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        trigger.trigger();
    });

    let started = std::time::Instant::now();
    let code = run_wrapper(&config, &shutdown).await.unwrap();

    assert!(started.elapsed() < std::time::Duration::from_secs(30));
    // SIGKILL
    assert_eq!(code, 128 + 9);
}
