//! External tool invocation: the fusion tool and the optional external
//! aligner.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use stackfuse_common::cancel::CancelFlag;
use stackfuse_common::config::{ExternalAlignConfig, FusionConfig};
use stackfuse_common::error::{FocusError, FocusResult};

/// How often a running tool is checked for exit or cancellation.
const TOOL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured output of a finished tool.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Whether `binary` can be found on `PATH` (or is an existing path).
///
/// `PATH` is searched directly; the name never reaches a shell.
pub fn command_exists(binary: &str) -> bool {
    if binary.is_empty() {
        return false;
    }
    if binary.contains('/') {
        return Path::new(binary).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file()))
        .unwrap_or(false)
}

/// Run `binary` with `args` to completion.
///
/// Both pipes are drained on helper threads. If `cancel` fires while the tool
/// runs, the child is killed and `Cancelled` is returned. A non-zero exit is a
/// `Process` error carrying the tool's stderr.
pub fn run_tool(binary: &str, args: &[String], cancel: &CancelFlag) -> FocusResult<ToolOutput> {
    cancel.check()?;
    tracing::debug!(tool = binary, ?args, "Running external tool");

    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FocusError::ToolNotFound {
                tool: binary.to_string(),
            },
            _ => FocusError::process(binary, "spawn failure", e.to_string()),
        })?;

    let started = std::time::Instant::now();
    tracing::info!(tool = binary, pid = child.id(), "External tool started");

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.is_cancelled() {
            tracing::warn!(tool = binary, "Cancellation requested, killing external tool");
            let _ = child.kill();
            let _ = child.wait();
            return Err(FocusError::Cancelled);
        }
        std::thread::sleep(TOOL_POLL_INTERVAL);
    };

    let output = ToolOutput {
        stdout: stdout.map(join_drain).unwrap_or_default(),
        stderr: stderr.map(join_drain).unwrap_or_default(),
    };

    tracing::info!(
        tool = binary,
        %status,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "External tool finished"
    );

    if !status.success() {
        let code = status
            .code()
            .map(|c| format!("exit code {c}"))
            .unwrap_or_else(|| "a signal".to_string());
        return Err(FocusError::process(binary, code, output.stderr.trim()));
    }
    Ok(output)
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        match pipe.read_to_string(&mut buf) {
            Ok(_) => buf,
            Err(err) => format!("<failed to read tool output: {err}>"),
        }
    })
}

fn join_drain(handle: std::thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Backends able to fuse a masked stack into one image.
pub trait FusionBackend: Send + Sync {
    /// Fuse `inputs` (in stack order) into `output`.
    fn fuse(&self, inputs: &[PathBuf], output: &Path, cancel: &CancelFlag) -> FocusResult<()>;

    /// Check if this backend is available on the system.
    fn is_available(&self) -> bool;

    /// Backend name.
    fn name(&self) -> &str;
}

/// `enfuse` (or a compatible binary) driven through its command line.
#[derive(Debug, Clone)]
pub struct EnfuseBackend {
    config: FusionConfig,
}

impl EnfuseBackend {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    /// `[--hard-mask] [extra...] -o <output> <inputs...>`
    pub fn args(&self, inputs: &[PathBuf], output: &Path) -> Vec<String> {
        let mut args = Vec::with_capacity(inputs.len() + self.config.extra_args.len() + 3);
        if self.config.hard_mask {
            args.push("--hard-mask".to_string());
        }
        args.extend(self.config.extra_args.iter().cloned());
        args.push("-o".to_string());
        args.push(output.display().to_string());
        args.extend(inputs.iter().map(|p| p.display().to_string()));
        args
    }
}

impl FusionBackend for EnfuseBackend {
    fn fuse(&self, inputs: &[PathBuf], output: &Path, cancel: &CancelFlag) -> FocusResult<()> {
        if inputs.is_empty() {
            return Err(FocusError::Other(anyhow::anyhow!("nothing to fuse")));
        }
        let args = self.args(inputs, output);
        run_tool(&self.config.binary, &args, cancel)?;
        if !output.exists() {
            return Err(FocusError::process(
                &self.config.binary,
                "exit code 0",
                format!("expected output {} was not written", output.display()),
            ));
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        command_exists(&self.config.binary)
    }

    fn name(&self) -> &str {
        &self.config.binary
    }
}

/// `align_image_stack` as a replacement for the built-in aligner.
#[derive(Debug, Clone)]
pub struct ExternalAligner {
    config: ExternalAlignConfig,
}

impl ExternalAligner {
    pub fn new(config: ExternalAlignConfig) -> Self {
        Self { config }
    }

    pub fn is_available(&self) -> bool {
        command_exists(&self.config.binary)
    }

    /// `-a <prefix> [-C] [-i] [-m] --corr=<t> -c <n> -g <n> -s <n> <inputs...>`
    pub fn args(&self, prefix: &Path, inputs: &[PathBuf]) -> Vec<String> {
        let c = &self.config;
        let mut args = vec!["-a".to_string(), prefix.display().to_string()];
        if c.autocrop {
            args.push("-C".to_string());
        }
        if c.center_shift {
            args.push("-i".to_string());
        }
        if c.field_of_view {
            args.push("-m".to_string());
        }
        args.push(format!("--corr={}", c.correlation_threshold));
        args.extend([
            "-c".to_string(),
            c.control_points.to_string(),
            "-g".to_string(),
            c.grid_size.to_string(),
            "-s".to_string(),
            c.scale_factor.to_string(),
        ]);
        args.extend(inputs.iter().map(|p| p.display().to_string()));
        args
    }

    /// Files the tool writes for `count` inputs: `{prefix}NNNN.tif`.
    pub fn expected_outputs(prefix: &Path, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| PathBuf::from(format!("{}{i:04}.tif", prefix.display())))
            .collect()
    }

    /// Run the tool and return its outputs in stack order.
    pub fn align(
        &self,
        inputs: &[PathBuf],
        prefix: &Path,
        cancel: &CancelFlag,
    ) -> FocusResult<Vec<PathBuf>> {
        run_tool(&self.config.binary, &self.args(prefix, inputs), cancel)?;
        let outputs = Self::expected_outputs(prefix, inputs.len());
        if let Some(missing) = outputs.iter().find(|p| !p.exists()) {
            return Err(FocusError::FileNotFound {
                path: missing.clone(),
            });
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn enfuse_args_put_output_before_inputs() {
        let backend = EnfuseBackend::new(FusionConfig::default());
        let args = backend.args(&paths(&["masked_a.png", "masked_b.png"]), Path::new("out.tif"));
        assert_eq!(args, vec!["-o", "out.tif", "masked_a.png", "masked_b.png"]);
    }

    #[test]
    fn enfuse_hard_mask_and_extra_args() {
        let backend = EnfuseBackend::new(FusionConfig {
            hard_mask: true,
            extra_args: vec!["--exposure-weight=0".to_string()],
            ..FusionConfig::default()
        });
        let args = backend.args(&paths(&["a.png"]), Path::new("o.tif"));
        assert_eq!(args, vec!["--hard-mask", "--exposure-weight=0", "-o", "o.tif", "a.png"]);
    }

    #[test]
    fn align_image_stack_args_follow_options() {
        let aligner = ExternalAligner::new(ExternalAlignConfig {
            autocrop: true,
            center_shift: true,
            field_of_view: true,
            correlation_threshold: 0.8,
            control_points: 12,
            grid_size: 4,
            scale_factor: 2,
            ..ExternalAlignConfig::default()
        });
        let args = aligner.args(Path::new("/w/aligned_"), &paths(&["a.jpg", "b.jpg"]));
        assert_eq!(
            args,
            vec![
                "-a", "/w/aligned_", "-C", "-i", "-m", "--corr=0.8", "-c", "12", "-g", "4", "-s",
                "2", "a.jpg", "b.jpg"
            ]
        );

        let plain = ExternalAligner::new(ExternalAlignConfig {
            autocrop: false,
            ..ExternalAlignConfig::default()
        });
        let args = plain.args(Path::new("p"), &[]);
        assert_eq!(args, vec!["-a", "p", "--corr=0.9", "-c", "8", "-g", "5", "-s", "1"]);
    }

    #[test]
    fn expected_outputs_are_numbered() {
        assert_eq!(
            ExternalAligner::expected_outputs(Path::new("/w/al_"), 2),
            paths(&["/w/al_0000.tif", "/w/al_0001.tif"])
        );
    }

    #[test]
    fn successful_tool_output_is_captured() {
        let out = run_tool(
            "sh",
            &["-c".to_string(), "echo hello; echo oops >&2".to_string()],
            &CancelFlag::new(),
        )
        .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[test]
    fn non_zero_exit_is_a_process_failure() {
        let err = run_tool(
            "sh",
            &["-c".to_string(), "echo broken >&2; exit 3".to_string()],
            &CancelFlag::new(),
        )
        .unwrap_err();
        match err {
            FocusError::Process { tool, status, stderr } => {
                assert_eq!(tool, "sh");
                assert_eq!(status, "exit code 3");
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_binary_is_tool_not_found() {
        let err = run_tool("stackfuse-no-such-tool", &[], &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, FocusError::ToolNotFound { .. }));
        assert!(!command_exists("stackfuse-no-such-tool"));
        assert!(command_exists("sh"));
    }

    #[test]
    fn tool_names_are_not_shell_evaluated() {
        let marker = Path::new("stackfuse_tools_injected");
        let _ = std::fs::remove_file(marker);

        assert!(!command_exists("sh; touch stackfuse_tools_injected"));
        assert!(!command_exists("sh && true"));
        assert!(!command_exists("$(echo sh)"));
        assert!(!command_exists(""));
        assert!(!marker.exists());
    }

    #[test]
    fn cancellation_kills_the_child() {
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let killer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = run_tool("sleep", &["10".to_string()], &cancel).unwrap_err();
        killer.join().unwrap();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
