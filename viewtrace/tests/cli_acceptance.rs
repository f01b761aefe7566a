use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    temp_dir: TempDir,
    home: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            temp_dir,
            home,
            xdg_config,
            xdg_state,
        }
    }

    fn write_config(&self, content: &str) {
        let dir = self.xdg_config.join("viewtrace");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        fs::write(dir.join("config.toml"), content).expect("failed to write config");
    }

    fn write_signals(&self, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join("signals.jsonl");
        fs::write(&path, content).expect("failed to write signals");
        path
    }
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("viewtrace"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute viewtrace: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    assert!(
        output.status.success(),
        "viewtrace {:?} failed\nstatus: {:?}\nstdout:\n{}\nstderr:\n{}",
        args,
        output.status.code(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn status_reports_configured_collector() {
    let env = CliTestEnv::new();
    env.write_config(
        r#"
[collector]
endpoint = "https://collector.example.com/v1/events"
batch_size = 5

[policy]
skip = ["mouse_move"]
"#,
    );

    let args = ["status"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("https://collector.example.com/v1/events"));
    assert!(stdout.contains("Batch Size:      5"));
    assert!(stdout.contains("mouse_move"));
    assert!(stdout.contains("scroll_behavior every 5000ms"));
    assert!(stdout.contains("Status: Ready"));
}

#[test]
fn status_fails_on_invalid_config() {
    let env = CliTestEnv::new();
    env.write_config("[collector]\nbatch_size = 0\n");

    let output = run_bin(&env, &["status"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("batch_size"));
}

#[test]
fn replay_dry_run_records_batches() {
    let env = CliTestEnv::new();
    env.write_config("[collector]\nbatch_size = 2\n");
    let signals = env.write_signals(
        r#"{"kind":"session","userId":"u-1","sessionId":"s-1"}
{"kind":"track","type":"cta_click","label":"signup"}
{"kind":"track","type":"video_play"}
{"kind":"wait","ms":10}
{"kind":"performance","name":"first-contentful-paint","entryType":"paint","duration":0}
"#,
    );
    let signals = signals.to_str().expect("utf-8 temp path");

    let args = ["replay", signals, "--dry-run"];
    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Replaying 5 signal(s)"));
    assert!(stdout.contains("Tracked:         3 admitted, 0 rejected"));
    assert!(stdout.contains("Events Sent:     3"));
    assert!(stdout.contains("Dry run: 2 batch(es) recorded"));
    assert!(stdout.contains("\"sessionId\":\"s-1\""));
    assert!(stdout.contains("perf_paint"));
}

#[test]
fn replay_rejects_malformed_file() {
    let env = CliTestEnv::new();
    let signals = env.write_signals("{\"kind\":\"flush\"}\nnot json\n");
    let signals = signals.to_str().expect("utf-8 temp path");

    let output = run_bin(&env, &["replay", signals, "--dry-run"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("line 2"));
}
