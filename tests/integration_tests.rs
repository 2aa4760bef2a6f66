//! Integration tests for zenus: drive the built binary against a
//! scratch `--state-root`, matching the reference ToolRegistry/
//! Translator's recognized inputs (§10). The reference `Translator` is
//! a deterministic keyword stub, not a real model — inputs here use
//! exactly the phrasing it recognizes (`mkdir <path>`, any string
//! containing both "write" and "file").

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn zenus() -> Command {
    cargo_bin_cmd!("zenus")
}

fn state_root(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("state")
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_zenus_help() {
        zenus().arg("--help").assert().success();
    }

    #[test]
    fn test_zenus_version() {
        zenus().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_state_root() {
        let dir = TempDir::new().unwrap();
        let root = state_root(&dir);

        zenus()
            .arg("--state-root")
            .arg(&root)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("initialized"));

        assert!(root.exists());
    }

    #[test]
    fn test_health_on_fresh_state_root() {
        let dir = TempDir::new().unwrap();
        let root = state_root(&dir);

        zenus()
            .arg("--state-root")
            .arg(&root)
            .arg("health")
            .assert()
            .success()
            .stdout(predicate::str::contains("state root"))
            .stdout(predicate::str::contains("open circuits"));
    }

    #[test]
    fn test_log_on_fresh_state_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let root = state_root(&dir);

        zenus().arg("--state-root").arg(&root).arg("log").assert().success();
    }
}

// Seed scenario A/B (§8): a single reversible mkdir, previewed and
// then actually rolled back.
mod rollback_flow {
    use super::*;

    #[test]
    fn test_mkdir_then_rollback_dry_run_previews_inverse() {
        let dir = TempDir::new().unwrap();
        let root = state_root(&dir);
        let target = dir.path().join("scratch-dir");

        zenus()
            .arg("--state-root")
            .arg(&root)
            .arg("run")
            .arg(format!("mkdir {}", target.display()))
            .assert()
            .success();

        assert!(target.exists());

        zenus()
            .arg("--state-root")
            .arg(&root)
            .arg("rollback")
            .arg("1")
            .arg("--dry-run")
            .assert()
            .success()
            .stdout(predicate::str::contains("would invert"));
    }

    #[test]
    fn test_mkdir_then_rollback_removes_directory_entry() {
        let dir = TempDir::new().unwrap();
        let root = state_root(&dir);
        let target = dir.path().join("scratch-dir-2");

        zenus()
            .arg("--state-root")
            .arg(&root)
            .arg("run")
            .arg(format!("mkdir {}", target.display()))
            .assert()
            .success();

        assert!(target.exists());

        zenus()
            .arg("--state-root")
            .arg(&root)
            .arg("rollback")
            .arg("1")
            .assert()
            .success()
            .stdout(predicate::str::contains("reverted"));

        assert!(!target.exists());
    }

    #[test]
    fn test_write_file_on_new_path_then_rollback_deletes_it() {
        let dir = TempDir::new().unwrap();
        let root = state_root(&dir);

        zenus()
            .current_dir(dir.path())
            .arg("--state-root")
            .arg(&root)
            .arg("run")
            .arg("write a file please")
            .assert()
            .success();

        assert!(dir.path().join("output.txt").exists());

        zenus()
            .current_dir(dir.path())
            .arg("--state-root")
            .arg(&root)
            .arg("rollback")
            .arg("1")
            .assert()
            .success()
            .stdout(predicate::str::contains("reverted"));

        assert!(!dir.path().join("output.txt").exists());
    }
}

mod unrecognized_input {
    use super::*;

    #[test]
    fn test_unrecognized_input_exits_with_schema_code() {
        let dir = TempDir::new().unwrap();
        let root = state_root(&dir);

        zenus()
            .arg("--state-root")
            .arg(&root)
            .arg("run")
            .arg("do something entirely unparseable and vague")
            .assert()
            .code(2);
    }
}

mod global_flags {
    use super::*;

    #[test]
    fn test_verbose_flag_accepted() {
        let dir = TempDir::new().unwrap();
        let root = state_root(&dir);

        zenus()
            .arg("--state-root")
            .arg(&root)
            .arg("--verbose")
            .arg("health")
            .assert()
            .success();
    }

    #[test]
    fn test_yes_flag_accepted() {
        let dir = TempDir::new().unwrap();
        let root = state_root(&dir);

        zenus()
            .arg("--state-root")
            .arg(&root)
            .arg("--yes")
            .arg("health")
            .assert()
            .success();
    }
}

// Seed scenario C (§8): two independent steps run end to end and both
// show up, in order, in the recorded action log.
mod feature_integration {
    use super::*;

    #[test]
    fn test_mkdir_then_log_shows_recorded_action() {
        let dir = TempDir::new().unwrap();
        let root = state_root(&dir);
        let target = dir.path().join("logged-dir");

        zenus()
            .arg("--state-root")
            .arg(&root)
            .arg("run")
            .arg(format!("mkdir {}", target.display()))
            .assert()
            .success();

        zenus()
            .arg("--state-root")
            .arg(&root)
            .arg("log")
            .assert()
            .success()
            .stdout(predicate::str::contains("file_ops"))
            .stdout(predicate::str::contains("mkdir"));
    }

    #[test]
    fn test_log_filtered_by_tool() {
        let dir = TempDir::new().unwrap();
        let root = state_root(&dir);
        let target = dir.path().join("filter-dir");

        zenus()
            .arg("--state-root")
            .arg(&root)
            .arg("run")
            .arg(format!("mkdir {}", target.display()))
            .assert()
            .success();

        zenus()
            .arg("--state-root")
            .arg(&root)
            .arg("log")
            .arg("--tool")
            .arg("file_ops")
            .assert()
            .success()
            .stdout(predicate::str::contains("mkdir"));

        zenus()
            .arg("--state-root")
            .arg(&root)
            .arg("log")
            .arg("--tool")
            .arg("network_ops")
            .assert()
            .success()
            .stdout(predicate::str::contains("mkdir").not());
    }
}
