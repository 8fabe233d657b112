//! tshark capture source
//!
//! Runs tshark in field-extraction mode and exposes its stdout as raw
//! tab-separated lines. One line per frame, fields in the order the
//! parser expects.

use crate::process::ProcessLines;
use async_trait::async_trait;
use netfeed_core::parser::FIELD_COUNT;
use netfeed_core::{
    CaptureError, CaptureExit, CaptureSource, CaptureTarget, PipelineConfig, PluginInfo,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Fields requested from tshark, in column order
pub const TSHARK_FIELDS: [&str; FIELD_COUNT] = [
    "frame.time_epoch",
    "ip.src",
    "ip.dst",
    "tcp.srcport",
    "udp.srcport",
    "tcp.dstport",
    "udp.dstport",
    "_ws.col.Protocol",
    "frame.len",
    "data.text",
    "frame.number",
];

/// Default grace period between SIGTERM and SIGKILL
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(3);

/// Arguments for a field-extraction run over `target`
pub fn tshark_args(target: &CaptureTarget) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-n",
        "-l",
        "-T",
        "fields",
        "-E",
        "separator=\t",
        "-E",
        "quote=n",
        "-E",
        "occurrence=f",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();

    for field in TSHARK_FIELDS {
        args.push("-e".into());
        args.push(field.into());
    }

    match target {
        CaptureTarget::Live { interface } => {
            args.push("-i".into());
            args.push(interface.into());
        }
        CaptureTarget::File { path } => {
            args.push("-r".into());
            args.push(path.into());
        }
    }

    args
}

/// Origin label recorded in every record, e.g. `tshark:live:wlan0`
pub fn source_label(target: &CaptureTarget) -> String {
    format!("tshark:{}:{}", target.mode(), target.location())
}

/// Locate an executable: paths are checked as given, bare names on `PATH`
pub fn find_binary(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return is_executable(path).then(|| path.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Render a command line for logging
fn display_command(program: &str, args: &[OsString]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string_lossy().replace('\t', "\\t"));
    }
    line
}

/// tshark source configuration
#[derive(Debug, Clone)]
pub struct TsharkConfig {
    /// Executable name or path
    pub program: String,
    pub target: CaptureTarget,
    /// Time allowed between SIGTERM and SIGKILL
    pub stop_grace: Duration,
}

impl TsharkConfig {
    pub fn new(target: CaptureTarget) -> Self {
        Self {
            program: "tshark".to_string(),
            target,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

impl From<&PipelineConfig> for TsharkConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            program: config.tshark_path.clone(),
            target: config.target.clone(),
            stop_grace: config.stop_grace,
        }
    }
}

/// Capture source backed by a tshark subprocess
pub struct TsharkCapture {
    config: TsharkConfig,
    label: String,
    process: Option<ProcessLines>,
    lines_read: u64,
}

impl TsharkCapture {
    pub fn new(config: TsharkConfig) -> Self {
        let label = source_label(&config.target);
        Self {
            config,
            label,
            process: None,
            lines_read: 0,
        }
    }

    pub fn config(&self) -> &TsharkConfig {
        &self.config
    }
}

impl PluginInfo for TsharkCapture {
    fn name(&self) -> &str {
        "tshark"
    }

    fn description(&self) -> &str {
        "Packet fields extracted by a tshark subprocess"
    }
}

#[async_trait]
impl CaptureSource for TsharkCapture {
    fn label(&self) -> &str {
        &self.label
    }

    async fn start(&mut self) -> Result<(), CaptureError> {
        if self.process.is_some() {
            return Err(CaptureError::AlreadyStarted);
        }

        let binary = find_binary(&self.config.program)
            .ok_or_else(|| CaptureError::BinaryNotFound(self.config.program.clone()))?;
        debug!("Using {} at {}", self.config.program, binary.display());

        let args = tshark_args(&self.config.target);
        info!("$ {}", display_command(&self.config.program, &args));

        let mut command = Command::new(&binary);
        command.args(&args);
        self.process = Some(ProcessLines::spawn(&self.config.program, command)?);
        self.lines_read = 0;
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<String>, CaptureError> {
        let process = self.process.as_mut().ok_or(CaptureError::NotStarted)?;
        let line = process.next_line().await?;
        if line.is_some() {
            self.lines_read += 1;
        }
        Ok(line)
    }

    fn lines_read(&self) -> u64 {
        self.lines_read
    }

    async fn stop(&mut self) -> Result<CaptureExit, CaptureError> {
        match self.process.take() {
            Some(process) => process.shutdown(self.config.stop_grace).await,
            None => Ok(CaptureExit::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_as_strings(target: &CaptureTarget) -> Vec<String> {
        tshark_args(target)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_live_args() {
        let target = CaptureTarget::Live {
            interface: "wlan0".to_string(),
        };
        let args = args_as_strings(&target);

        assert_eq!(
            &args[..10],
            &[
                "-n",
                "-l",
                "-T",
                "fields",
                "-E",
                "separator=\t",
                "-E",
                "quote=n",
                "-E",
                "occurrence=f"
            ]
        );
        assert_eq!(&args[args.len() - 2..], &["-i", "wlan0"]);
        assert!(!args.contains(&"-r".to_string()));
    }

    #[test]
    fn test_file_args() {
        let target = CaptureTarget::File {
            path: PathBuf::from("/data/capture.pcap"),
        };
        let args = args_as_strings(&target);
        assert_eq!(&args[args.len() - 2..], &["-r", "/data/capture.pcap"]);
        assert!(!args.contains(&"-i".to_string()));
    }

    #[test]
    fn test_fields_in_column_order() {
        let target = CaptureTarget::Live {
            interface: "eth0".to_string(),
        };
        let args = args_as_strings(&target);
        let fields: Vec<&str> = args
            .windows(2)
            .filter(|pair| pair[0] == "-e")
            .map(|pair| pair[1].as_str())
            .collect();

        assert_eq!(fields.len(), FIELD_COUNT);
        assert_eq!(fields[0], "frame.time_epoch");
        assert_eq!(fields[7], "_ws.col.Protocol");
        assert_eq!(fields[10], "frame.number");
    }

    #[test]
    fn test_source_label() {
        let live = CaptureTarget::Live {
            interface: "wlan0".to_string(),
        };
        assert_eq!(source_label(&live), "tshark:live:wlan0");

        let file = CaptureTarget::File {
            path: PathBuf::from("/tmp/a.pcap"),
        };
        assert_eq!(source_label(&file), "tshark:file:/tmp/a.pcap");
    }

    #[test]
    fn test_display_command_escapes_tab() {
        let line = display_command("tshark", &["-E".into(), "separator=\t".into()]);
        assert_eq!(line, "tshark -E separator=\\t");
    }

    #[test]
    fn test_find_binary_missing() {
        assert!(find_binary("/nonexistent/dir/tshark").is_none());
        assert!(find_binary("netfeed-no-such-binary-on-path").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_find_binary_explicit_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tshark");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();

        assert!(find_binary(path.to_str().unwrap()).is_none());

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(find_binary(path.to_str().unwrap()), Some(path));
    }

    #[tokio::test]
    async fn test_start_without_binary() {
        let mut config = TsharkConfig::new(CaptureTarget::Live {
            interface: "eth0".to_string(),
        });
        config.program = "/nonexistent/tshark".to_string();
        let mut capture = TsharkCapture::new(config);

        let err = capture.start().await.unwrap_err();
        assert!(matches!(err, CaptureError::BinaryNotFound(_)));
        assert!(matches!(
            capture.next_line().await,
            Err(CaptureError::NotStarted)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_stand_in_binary() {
        use std::os::unix::fs::PermissionsExt;

        // A stand-in that prints one record line and its own argument count
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-tshark");
        std::fs::write(
            &path,
            "#!/bin/sh\nprintf '1700000000.0\\t10.0.0.2\\t10.0.0.1\\t1\\t\\t2\\t\\tTCP\\t60\\t\\t1\\n'\necho \"$#\"\necho 'Capturing on fake' >&2\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = TsharkConfig::new(CaptureTarget::Live {
            interface: "eth0".to_string(),
        });
        config.program = path.to_string_lossy().into_owned();
        let mut capture = TsharkCapture::new(config);

        capture.start().await.unwrap();
        assert!(matches!(
            capture.start().await,
            Err(CaptureError::AlreadyStarted)
        ));

        let first = capture.next_line().await.unwrap().unwrap();
        assert_eq!(first.split('\t').count(), FIELD_COUNT);
        let argc = capture.next_line().await.unwrap().unwrap();
        assert_eq!(argc, (10 + 2 * FIELD_COUNT + 2).to_string());
        assert!(capture.next_line().await.unwrap().is_none());
        assert_eq!(capture.lines_read(), 2);

        let exit = capture.stop().await.unwrap();
        assert!(exit.success());
        assert_eq!(exit.stderr_tail, vec!["Capturing on fake"]);
    }
}
