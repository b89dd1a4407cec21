use anyhow::Result;
use std::env;
use std::process::Command;

use super::common::TestEnvironment;

pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Build the binary and run it with `--root` pointing at the test tree.
pub fn run_usrctl(env: &TestEnvironment, args: &[&str]) -> Result<CommandOutput> {
    let build_output = Command::new("cargo")
        .args(["build", "--bin", "usrctl"])
        .current_dir(env::current_dir()?)
        .output()?;

    if !build_output.status.success() {
        return Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::from_utf8_lossy(&build_output.stderr).to_string(),
            exit_code: build_output.status.code().unwrap_or(-1),
        });
    }

    let project_dir = env::current_dir()?;
    let binary_path = project_dir.join("target/debug/usrctl");

    let mut cmd = Command::new(&binary_path);
    cmd.arg("--root")
        .arg(env.root())
        .args(args)
        .current_dir(&project_dir);

    let output = cmd.output()?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}
