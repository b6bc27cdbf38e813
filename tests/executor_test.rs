mod helpers;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, Instant};

use anyhow::Result;
use camino::Utf8Path;
use concierge::error::ConciergeError;
use concierge::system::{Command, RealSystem, System};

fn typed(err: &anyhow::Error) -> &ConciergeError {
    err.downcast_ref::<ConciergeError>()
        .unwrap_or_else(|| panic!("expected ConciergeError, got: {:#}", err))
}

#[test]
fn successful_command_captures_stdout() -> Result<()> {
    let (_dir, home) = helpers::utf8_tempdir();
    let system = helpers::test_system(&home);

    let output = system.run(&Command::new("sh", ["-c", "echo hello; echo oops >&2"]))?;
    assert_eq!(output.stdout_lossy(), "hello\n");
    assert_eq!(output.stderr_lossy(), "oops\n");

    assert!(system.run(&Command::new("true", Vec::<String>::new())).is_ok());
    Ok(())
}

#[test]
fn non_zero_exit_keeps_status_and_output() {
    let (_dir, home) = helpers::utf8_tempdir();
    let system = helpers::test_system(&home);

    let err = system
        .run(&Command::new("sh", ["-c", "echo not ready >&2; exit 3"]))
        .unwrap_err();

    match typed(&err) {
        ConciergeError::Execution { command, status, output } => {
            assert_eq!(command, "sh -c echo not ready >&2; exit 3");
            assert!(status.contains('3'), "unexpected status: {}", status);
            assert!(output.contains("not ready"));
        }
        other => panic!("expected Execution, got {:?}", other),
    }
}

#[test]
fn trace_transcript_is_written_for_failing_commands() {
    let (_dir, home) = helpers::utf8_tempdir();
    let buffer = helpers::SharedBuffer::default();
    let system = helpers::test_system(&home).with_trace_writer(Box::new(buffer.clone()));

    let result = system.run(&Command::new("sh", ["-c", "echo x >&2; exit 1"]));
    assert!(result.is_err());

    let transcript = buffer.contents();
    assert!(transcript.contains("Command:"), "transcript: {}", transcript);
    assert!(transcript.contains("sh -c echo x >&2; exit 1"), "transcript: {}", transcript);
    assert!(transcript.contains("Stderr:"), "transcript: {}", transcript);
    assert!(!transcript.contains("Stdout:"), "transcript: {}", transcript);
}

#[test]
fn missing_executable_is_command_not_found() {
    let (_dir, home) = helpers::utf8_tempdir();
    let system = helpers::test_system(&home);

    let err = system
        .run(&Command::new("this-command-should-not-exist", Vec::<String>::new()))
        .unwrap_err();
    assert!(
        matches!(typed(&err), ConciergeError::CommandNotFound { command } if command == "this-command-should-not-exist"),
        "unexpected error: {:#}",
        err
    );
    assert!(err.to_string().contains("not found in PATH"));
}

#[test]
fn missing_executable_is_never_retried() {
    let (_dir, home) = helpers::utf8_tempdir();
    let system = RealSystem::with_user(helpers::test_user(&home), false);

    let start = Instant::now();
    let err = system
        .run_with_retries(
            &Command::new("this-command-should-not-exist", Vec::<String>::new()),
            Duration::from_secs(30),
        )
        .unwrap_err();
    assert!(matches!(typed(&err), ConciergeError::CommandNotFound { .. }));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn retries_stop_at_the_deadline() {
    let (_dir, home) = helpers::utf8_tempdir();
    let attempts = home.join("attempts");
    let system = RealSystem::with_user(helpers::test_user(&home), false)
        .with_initial_backoff(Duration::from_secs(1));

    let script = format!("echo attempt >> {}; exit 1", attempts);
    let err = system
        .run_with_retries(&Command::new("sh", ["-c", script.as_str()]), Duration::from_secs(2))
        .unwrap_err();
    assert!(matches!(typed(&err), ConciergeError::Execution { .. }));

    let count = fs::read_to_string(&attempts).unwrap().lines().count();
    assert!((1..=2).contains(&count), "unexpected attempt count: {}", count);
}

#[test]
fn retries_until_success() -> Result<()> {
    let (_dir, home) = helpers::utf8_tempdir();
    let marker = home.join("ready");
    let system = helpers::test_system(&home);

    // Fails on the first attempt, succeeds on the second.
    let script = format!("if [ -e {0} ]; then exit 0; else touch {0}; exit 1; fi", marker);
    system.run_with_retries(&Command::new("sh", ["-c", script.as_str()]), Duration::from_secs(10))?;
    assert!(marker.exists());
    Ok(())
}

#[test]
fn exclusive_runs_complete_across_threads() {
    let (_dir, home) = helpers::utf8_tempdir();
    let system = helpers::test_system(&home);
    let log = home.join("log");
    let script = format!("echo start >> {0}; sleep 0.1; echo end >> {0}", log);

    std::thread::scope(|s| {
        for _ in 0..3 {
            s.spawn(|| {
                system
                    .run_exclusive(&Command::new("sh", ["-c", script.as_str()]))
                    .unwrap();
            });
        }
    });

    let lines: Vec<String> = fs::read_to_string(&log)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(lines.len(), 6);
    for pair in lines.chunks(2) {
        assert_eq!(pair, ["start", "end"], "interleaved runs: {:?}", lines);
    }
}

#[test]
fn home_files_round_trip() -> Result<()> {
    let (_dir, home) = helpers::utf8_tempdir();
    let system = helpers::test_system(&home);
    let path = Utf8Path::new(".cache/concierge/concierge.yaml");

    system.write_home_file(path, b"status: succeeded\n")?;
    assert_eq!(system.read_home_file(path)?, b"status: succeeded\n");
    assert!(home.join(".cache/concierge").is_dir());

    system.remove_all_home(Utf8Path::new(".cache"))?;
    assert!(!home.join(".cache").exists());

    // Removing something that is already gone is fine.
    system.remove_all_home(Utf8Path::new(".cache"))?;
    system.remove_path(&home.join("never-existed"))?;
    Ok(())
}

#[test]
fn reading_a_missing_file_is_an_io_error() {
    let (_dir, home) = helpers::utf8_tempdir();
    let system = helpers::test_system(&home);

    let err = system.read_home_file(Utf8Path::new("missing.yaml")).unwrap_err();
    assert!(matches!(typed(&err), ConciergeError::Io { .. }));
    assert!(err.to_string().ends_with("I/O error: not found"));
}

#[test]
fn mkdir_all_applies_mode_and_chown_all_recurses() -> Result<()> {
    let (_dir, home) = helpers::utf8_tempdir();
    let system = helpers::test_system(&home);
    let nested = home.join("a/b/c");

    system.mkdir_all(&nested, 0o750)?;
    let mode = fs::metadata(&nested)?.permissions().mode() & 0o777;
    assert_eq!(mode, 0o750);

    fs::write(nested.join("file"), b"x")?;
    system.chown_all(&home.join("a"), system.user())?;
    Ok(())
}

#[test]
fn elevated_command_renders_with_sudo() {
    let cmd = Command::new("juju", ["show-controller", "concierge-lxd"])
        .as_user("ubuntu")
        .with_group("lxd");
    assert_eq!(
        cmd.command_string(),
        "sudo -u ubuntu -g lxd juju show-controller concierge-lxd"
    );
}
