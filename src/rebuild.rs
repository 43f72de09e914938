use crate::error::{Result, StoveError};
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs the profile's `build` command so the next workers start from fresh code.
pub struct BuildStep;

impl BuildStep {
    /// Run `argv` (if any) in `working_dir` and fail on a non-zero exit.
    pub async fn run(argv: Option<&[String]>, working_dir: Option<&Path>) -> Result<()> {
        let Some((program, args)) = argv.and_then(|a| a.split_first()) else {
            return Ok(());
        };

        info!("Building: {} {}", program, args.join(" "));
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await?;
        debug!("Build finished with exit code: {:?}", output.status.code());
        forward_output(&output);

        if output.status.success() {
            Ok(())
        } else {
            Err(StoveError::Build(format!(
                "'{}' exited with {}",
                program, output.status
            )))
        }
    }
}

fn forward_output(output: &Output) {
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        debug!(target: "stove::build", "{}", line);
    }
    if output.status.success() {
        return;
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        warn!(target: "stove::build", "{}", line);
    }
}
