use std::path::Path;
use std::process::{Command, Output};
use std::str;

/// CLI interface tests
#[cfg(test)]
mod cli_tests {
    use super::*;

    fn replcom(home: &Path, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_replcom"))
            .args(args)
            .current_dir(home)
            .env("HOME", home)
            .env_remove("RUST_LOG")
            .output()
            .expect("Failed to execute command")
    }

    #[test]
    fn test_cli_help() {
        let home = tempfile::tempdir().unwrap();
        let output = replcom(home.path(), &["--help"]);
        assert!(output.status.success());

        let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");
        assert!(stdout.contains("MicroPython"));
        assert!(stdout.contains("Usage:"));
        assert!(stdout.contains("Commands:"));
        assert!(stdout.contains("ports"));
        assert!(stdout.contains("repl"));
        assert!(stdout.contains("put"));
        assert!(stdout.contains("config"));
    }

    #[test]
    fn test_cli_version() {
        let home = tempfile::tempdir().unwrap();
        let output = replcom(home.path(), &["--version"]);
        assert!(output.status.success());

        let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");
        assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_demo_runs_against_mock_board() {
        let home = tempfile::tempdir().unwrap();
        let output = replcom(home.path(), &["--quiet", "demo"]);
        assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

        let stdout = str::from_utf8(&output.stdout).expect("Invalid UTF-8");
        assert!(stdout.contains("boot.py"));
        assert!(stdout.contains("main.py"));

        let stderr = str::from_utf8(&output.stderr).expect("Invalid UTF-8");
        assert!(stderr.contains("ZeroDivisionError"));
    }

    #[test]
    fn test_put_without_port_fails() {
        let home = tempfile::tempdir().unwrap();
        let local = home.path().join("main.py");
        std::fs::write(&local, "print(1)\n").unwrap();

        let output = replcom(home.path(), &["put", local.to_str().unwrap()]);
        assert!(!output.status.success());

        let stderr = str::from_utf8(&output.stderr).expect("Invalid UTF-8");
        assert!(stderr.contains("--port"));
    }

    #[test]
    fn test_config_init_creates_project_file() {
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();

        let output = replcom(
            home.path(),
            &["config", "init", "--dir", project.path().to_str().unwrap()],
        );
        assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

        let config_file = project.path().join(".replcom").join("config.toml");
        let content = std::fs::read_to_string(config_file).unwrap();
        assert!(content.contains("pico"));

        // A second init refuses to overwrite.
        let again = replcom(
            home.path(),
            &["config", "init", "--dir", project.path().to_str().unwrap()],
        );
        assert!(!again.status.success());
    }

    #[test]
    fn test_invalid_command() {
        let home = tempfile::tempdir().unwrap();
        let output = replcom(home.path(), &["invalid-command"]);
        assert!(!output.status.success());

        let stderr = str::from_utf8(&output.stderr).expect("Invalid UTF-8");
        assert!(stderr.contains("error:") || stderr.contains("unrecognized"));
    }

    #[test]
    fn test_send_rejects_bad_hex() {
        let home = tempfile::tempdir().unwrap();
        let output = replcom(
            home.path(),
            &["send", "zz", "--format", "hex", "--port", "/dev/replcom-missing"],
        );
        assert!(!output.status.success());
    }
}
