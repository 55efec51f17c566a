use crate::{
    capture::StdStream,
    config::{WorkerConfig, FIGURE_DPI},
    engine::{DiscardSink, EventSink, Interpreter, RuntimeEvent},
    errors::{Result, WorkerError},
    glue,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Request line sent to the driver
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Request<'a> {
    /// User code, run in the user namespace
    Exec { code: &'a str },
    /// Glue code, run in the glue namespace
    Internal { code: &'a str },
    Shutdown,
}

/// Frame line received from the driver
#[derive(Debug, Deserialize)]
#[serde(tag = "ev", rename_all = "lowercase")]
enum Frame {
    Hello { version: String },
    Write { stream: StdStream, text: String },
    Drain,
    Figure { data: String },
    Ok,
    Fail { message: String },
}

enum Workdir {
    Given(PathBuf),
    Temp(tempfile::TempDir),
}

impl Workdir {
    fn path(&self) -> &Path {
        match self {
            Workdir::Given(p) => p,
            Workdir::Temp(dir) => dir.path(),
        }
    }
}

struct ChildProcess {
    child: Child,
    stdin: ChildStdin,
    frames: Lines<BufReader<ChildStdout>>,
    log_task: JoinHandle<()>,
}

/// CPython running as a long-lived child process
pub struct NativeInterpreter {
    requested: Option<PathBuf>,
    python_path: Option<PathBuf>,
    workdir: Workdir,
    process: Option<ChildProcess>,
}

fn resolve_python(requested: Option<&Path>) -> Result<PathBuf> {
    match requested {
        Some(path) if path.exists() => Ok(path.to_path_buf()),
        Some(path) => which::which(path).map_err(|_| WorkerError::PythonNotFound),
        None => which::which("python3")
            .or_else(|_| which::which("python"))
            .map_err(|_| WorkerError::PythonNotFound),
    }
}

impl NativeInterpreter {
    /// Create a new interpreter (finds Python in PATH)
    pub fn new() -> Result<Self> {
        let python_path = resolve_python(None)?;
        Self::with_python_path(python_path)
    }

    /// Create with an explicit Python executable; bare names are looked up in PATH
    pub fn with_python_path(python_path: PathBuf) -> Result<Self> {
        let python_path = resolve_python(Some(&python_path))?;
        let mut interpreter = Self::from_config(&WorkerConfig::default())?;
        interpreter.python_path = Some(python_path);
        Ok(interpreter)
    }

    /// Create from worker settings.
    ///
    /// The executable is resolved on the first `load`, so a missing Python
    /// surfaces as a load failure reported to the host.
    pub fn from_config(config: &WorkerConfig) -> Result<Self> {
        let workdir = match &config.workdir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Workdir::Given(dir.clone())
            }
            None => Workdir::Temp(tempfile::Builder::new().prefix("pyworker-").tempdir()?),
        };
        Ok(Self {
            requested: config.python_path.clone(),
            python_path: None,
            workdir,
            process: None,
        })
    }

    /// Get the Python executable path, once resolved
    pub fn python_path(&self) -> Option<&Path> {
        self.python_path.as_deref()
    }

    fn python(&mut self) -> Result<PathBuf> {
        if let Some(path) = &self.python_path {
            return Ok(path.clone());
        }
        let path = resolve_python(self.requested.as_deref())?;
        self.python_path = Some(path.clone());
        Ok(path)
    }

    fn command(&self, python: &Path) -> Command {
        let mut cmd = Command::new(python);
        cmd.current_dir(self.workdir.path())
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONUNBUFFERED", "1")
            .env("MPLBACKEND", "Agg");
        cmd
    }

    /// Run the interpreter as a one-off tool, e.g. `python -m pip ...`
    async fn run_tool(&mut self, args: &[&str]) -> Result<std::process::Output> {
        let python = self.python()?;
        let output = self
            .command(&python)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Ok(output)
    }

    #[cfg(unix)]
    fn own_process_group(cmd: &mut Command) {
        unsafe {
            cmd.pre_exec(|| {
                // Own process group, so subprocesses started by user code die with us
                if libc::setpgid(0, 0) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    #[cfg(not(unix))]
    fn own_process_group(_cmd: &mut Command) {}

    async fn spawn(&mut self) -> Result<ChildProcess> {
        let python = self.python()?;
        let mut cmd = self.command(&python);
        cmd.arg("-u")
            .arg("-c")
            .arg(glue::DRIVER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Self::own_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| {
            WorkerError::LoadFailed(format!(
                "cannot start {}: {}",
                python.display(),
                e
            ))
        })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(WorkerError::LoadFailed(
                "interpreter pipes unavailable".to_string(),
            ));
        };

        // Anything the interpreter prints outside capture ends up here.
        let log_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "pyworker::python", "{}", line);
            }
        });

        Ok(ChildProcess {
            child,
            stdin,
            frames: BufReader::new(stdout).lines(),
            log_task,
        })
    }

    fn process(&mut self) -> Result<&mut ChildProcess> {
        self.process.as_mut().ok_or(WorkerError::NotLoaded)
    }

    async fn next_frame(process: &mut ChildProcess) -> Result<Frame> {
        loop {
            let Some(line) = process.frames.next_line().await? else {
                return Err(WorkerError::InterpreterExited);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str(line)
                .map_err(|e| WorkerError::Protocol(format!("bad frame {:?}: {}", line, e)));
        }
    }

    /// Send one request and pump frames until the driver answers it.
    ///
    /// Every frame up to the answer is consumed even when the sink rejects
    /// one, so the control stream stays in step; the first sink error is
    /// returned afterwards.
    async fn request(&mut self, request: Request<'_>, sink: &mut dyn EventSink) -> Result<()> {
        let process = self.process()?;

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        if let Err(e) = process.stdin.write_all(line.as_bytes()).await {
            debug!("write to interpreter failed: {}", e);
            return Err(WorkerError::InterpreterExited);
        }
        if process.stdin.flush().await.is_err() {
            return Err(WorkerError::InterpreterExited);
        }

        let mut deferred: Option<WorkerError> = None;
        loop {
            let event = match Self::next_frame(process).await? {
                Frame::Ok => return deferred.map_or(Ok(()), Err),
                Frame::Fail { message } => {
                    return Err(deferred.unwrap_or(WorkerError::Execution(message)))
                }
                Frame::Hello { .. } => {
                    return Err(WorkerError::Protocol("unexpected hello".to_string()))
                }
                Frame::Write { stream, text } => RuntimeEvent::Write { stream, text },
                Frame::Drain => RuntimeEvent::Drain,
                Frame::Figure { data } => RuntimeEvent::Figure { data },
            };
            if deferred.is_none() {
                if let Err(e) = sink.handle(event) {
                    deferred = Some(e);
                }
            }
        }
    }

    async fn internal(&mut self, code: &str) -> Result<()> {
        self.request(Request::Internal { code }, &mut DiscardSink).await
    }

    async fn kill(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };
        #[cfg(unix)]
        {
            if let Some(pid) = process.child.id() {
                use nix::sys::signal::{killpg, Signal};
                use nix::unistd::Pid;
                if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                    debug!("killpg({}) failed: {}", pid, e);
                }
            }
        }
        if let Err(e) = process.child.kill().await {
            debug!("kill failed: {}", e);
        }
        process.log_task.abort();
    }
}

fn tail(bytes: &[u8], max_lines: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[async_trait]
impl Interpreter for NativeInterpreter {
    async fn load(&mut self) -> Result<()> {
        self.kill().await;

        let mut process = self.spawn().await?;
        let frame = match Self::next_frame(&mut process).await {
            Ok(frame) => frame,
            Err(WorkerError::InterpreterExited) => {
                let status = process.child.wait().await?;
                return Err(WorkerError::LoadFailed(format!(
                    "interpreter exited during startup ({})",
                    status
                )));
            }
            Err(e) => return Err(e),
        };
        match frame {
            Frame::Hello { version } => {
                info!("Python {} started ({:?})", version, self.python_path);
            }
            other => {
                return Err(WorkerError::Protocol(format!(
                    "expected hello, got {:?}",
                    other
                )))
            }
        }

        self.process = Some(process);
        Ok(())
    }

    async fn install_package_manager(&mut self) -> Result<()> {
        let probe = self.run_tool(&["-m", "pip", "--version"]).await?;
        if probe.status.success() {
            debug!("pip available: {}", tail(&probe.stdout, 1));
            return Ok(());
        }

        info!("pip missing, bootstrapping with ensurepip");
        let bootstrap = self
            .run_tool(&["-m", "ensurepip", "--default-pip"])
            .await?;
        if !bootstrap.status.success() {
            return Err(WorkerError::PackageManager(tail(&bootstrap.stderr, 5)));
        }
        Ok(())
    }

    async fn install_packages(&mut self, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        info!("installing packages: {:?}", packages);

        let mut args = vec![
            "-m",
            "pip",
            "install",
            "--disable-pip-version-check",
            "--no-input",
        ];
        args.extend(packages.iter().map(String::as_str));
        let output = self.run_tool(&args).await?;
        if !output.status.success() {
            return Err(WorkerError::PackageInstall {
                packages: packages.to_vec(),
                message: tail(&output.stderr, 5),
            });
        }

        self.internal(glue::INVALIDATE_IMPORT_CACHES).await
    }

    async fn install_glue(&mut self) -> Result<()> {
        self.internal(&glue::glue_source(FIGURE_DPI)).await
    }

    async fn install_show_hook(&mut self) -> Result<()> {
        self.internal(glue::INSTALL_SHOW_HOOK).await
    }

    async fn start_capture(&mut self) -> Result<()> {
        self.internal(glue::START_CAPTURE).await
    }

    async fn stop_capture(&mut self) -> Result<()> {
        self.internal(glue::STOP_CAPTURE).await
    }

    async fn execute(&mut self, code: &str, sink: &mut dyn EventSink) -> Result<()> {
        self.request(Request::Exec { code }, sink).await
    }

    async fn capture_figures(&mut self, sink: &mut dyn EventSink) -> Result<()> {
        self.request(
            Request::Internal {
                code: glue::CAPTURE_FIGURES,
            },
            sink,
        )
        .await
    }

    async fn discard_figures(&mut self) -> Result<()> {
        self.internal(glue::DISCARD_FIGURES).await
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.process.is_none() {
            return Ok(());
        }

        let polite = self.request(Request::Shutdown, &mut DiscardSink).await;
        if let Err(e) = &polite {
            debug!("shutdown request failed: {}", e);
        }

        if let Some(process) = self.process.as_mut() {
            match tokio::time::timeout(SHUTDOWN_GRACE, process.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!("interpreter exited ({})", status);
                    if let Some(process) = self.process.take() {
                        process.log_task.abort();
                    }
                    return Ok(());
                }
                Ok(Err(e)) => warn!("waiting for interpreter failed: {}", e),
                Err(_) => warn!("interpreter did not exit, killing it"),
            }
        }
        self.kill().await;
        Ok(())
    }
}
