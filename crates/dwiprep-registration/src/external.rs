//! Blocking external-tool invocation.
//!
//! A tool counts as successful only when it exits with status zero within
//! the timeout and every declared output file exists afterwards. Declared
//! outputs left over from an earlier run are removed before the tool starts.

use crate::error::{RegistrationError, Result};
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Longest stderr excerpt carried in an error.
const STDERR_EXCERPT: usize = 2000;

/// Captured output of a successful run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// One invocation of an external program.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    name: String,
    program: PathBuf,
    args: Vec<OsString>,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
    outputs: Vec<PathBuf>,
}

impl ToolCommand {
    /// `name` identifies the tool in logs and errors; `program` is what gets executed.
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: None,
            outputs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `--key=value` style argument.
    pub fn flag(self, key: &str, value: impl AsRef<Path>) -> Self {
        let mut arg = OsString::from(format!("--{}=", key));
        arg.push(value.as_ref().as_os_str());
        self.arg(arg)
    }

    pub fn envs(mut self, env: &[(String, String)]) -> Self {
        self.env.extend(env.iter().cloned());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Declare a file the tool must leave behind. Any existing copy is
    /// deleted before the tool runs.
    pub fn expect_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The command line as it would be typed.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion, then check exit status and declared outputs.
    pub fn run(&self) -> Result<ToolOutput> {
        tracing::debug!("Command: {}", self.command_line());
        self.clear_outputs()?;
        let started = Instant::now();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RegistrationError::ExternalToolFailed {
                tool: self.name.clone(),
                status: "not started".to_string(),
                stderr: format!("{}: {}", self.program.display(), e),
            })?;

        // Drain both pipes concurrently so a chatty tool cannot block on a full pipe.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match self.wait(&mut child)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RegistrationError::ExternalToolTimeout {
                    tool: self.name.clone(),
                    seconds: self.timeout.map_or(0, |t| t.as_secs()),
                });
            }
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            tracing::error!("{} failed ({}): {}", self.name, status, stderr.trim());
            return Err(RegistrationError::ExternalToolFailed {
                tool: self.name.clone(),
                status: status.to_string(),
                stderr: excerpt(&stderr),
            });
        }

        for path in &self.outputs {
            if !path.exists() {
                return Err(RegistrationError::MissingOutput {
                    tool: self.name.clone(),
                    path: path.clone(),
                });
            }
        }

        let elapsed = started.elapsed();
        tracing::debug!("{} finished in {:.1}s", self.name, elapsed.as_secs_f64());
        Ok(ToolOutput { stdout, stderr, elapsed })
    }

    fn clear_outputs(&self) -> Result<()> {
        for path in &self.outputs {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!("Removed stale {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// `Ok(None)` when the timeout elapsed first.
    fn wait(&self, child: &mut Child) -> Result<Option<std::process::ExitStatus>> {
        let Some(timeout) = self.timeout else {
            return Ok(Some(child.wait()?));
        };
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut text = String::new();
        if let Some(mut pipe) = pipe {
            let mut bytes = Vec::new();
            let _ = pipe.read_to_end(&mut bytes);
            text = String::from_utf8_lossy(&bytes).into_owned();
        }
        text
    })
}

fn excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_EXCERPT {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_EXCERPT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    fn sh(script: &str) -> ToolCommand {
        ToolCommand::new("sh", "/bin/sh").arg("-c").arg(script)
    }

    #[test]
    fn test_success_with_declared_output() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let output = sh(&format!("echo hi; touch {}", out.display()))
            .expect_output(&out)
            .run()
            .unwrap();
        assert_eq!(output.stdout.trim(), "hi");
    }

    #[test]
    fn test_non_zero_exit_is_failure() {
        let err = sh("echo broken >&2; exit 3").run().unwrap_err();
        match &err {
            RegistrationError::ExternalToolFailed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(err.kind(), ErrorKind::ExternalTool);
    }

    #[test]
    fn test_missing_output_after_success() {
        let dir = tempdir().unwrap();
        let err = sh("exit 0").expect_output(dir.path().join("never.nii.gz")).run().unwrap_err();
        assert!(matches!(err, RegistrationError::MissingOutput { .. }));
    }

    #[test]
    fn test_stale_output_does_not_count() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("dwi_reg.nii.gz");
        std::fs::write(&out, b"from an earlier run").unwrap();

        let err = sh("exit 0").expect_output(&out).run().unwrap_err();
        assert!(matches!(err, RegistrationError::MissingOutput { ref path, .. } if path == &out));
        assert!(!out.exists());
    }

    #[test]
    fn test_timeout_kills_tool() {
        let started = Instant::now();
        let err = sh("sleep 5").timeout(Some(Duration::from_millis(200))).run().unwrap_err();
        assert!(matches!(err, RegistrationError::ExternalToolTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_program() {
        let err = ToolCommand::new("flirt", "/no/such/flirt").run().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalTool);
    }

    #[test]
    fn test_environment_passed() {
        let output = sh("printf %s \"$FSLOUTPUTTYPE\"")
            .envs(&[("FSLOUTPUTTYPE".to_string(), "NIFTI_GZ".to_string())])
            .run()
            .unwrap();
        assert_eq!(output.stdout, "NIFTI_GZ");
    }

    #[test]
    fn test_flag_format() {
        let cmd = ToolCommand::new("topup", "topup").flag("imain", "/a/b0.nii.gz");
        assert_eq!(cmd.command_line(), "topup --imain=/a/b0.nii.gz");
    }
}
