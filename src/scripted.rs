//! In-memory interpreter for controller tests.
//!
//! Instead of Python it understands a tiny line language:
//!
//! | line | effect |
//! |---|---|
//! | `print <text>` | writes `<text>` then `"\n"` to stdout, as `print` does |
//! | `write <text>` | writes `<text>` to stdout |
//! | `eprint <text>` | writes `<text>` then `"\n"` to stderr |
//! | `import matplotlib.pyplot as plt` | loads the plotting module |
//! | `_pyworker.install_show_hook()` | installs the show hook |
//! | `figure <tag>` | opens a figure rendered as a PNG tagged `<tag>` |
//! | `badfigure` | opens a figure whose payload is not an image |
//! | `show` | drains text and emits figures, if the hook is installed |
//! | `raise <message>` | fails the run with `<message>` |
//! | `exit` | the interpreter dies |

use crate::{
    capture::StdStream,
    engine::{EventSink, Interpreter, RuntimeEvent},
    errors::{Result, WorkerError},
};
use async_trait::async_trait;
use base64::Engine as _;
use std::sync::{Arc, Mutex};

pub fn figure_data(tag: &str) -> String {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(tag.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[derive(Default)]
pub struct ScriptedInterpreter {
    calls: Arc<Mutex<Vec<String>>>,
    failing_loads: usize,
    failing_package: Option<String>,
    failing_stop_capture: bool,
    loaded: bool,
    capturing: bool,
    plotting: bool,
    hooked: bool,
    figures: Vec<String>,
}

impl ScriptedInterpreter {
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }

    pub fn failing_loads(mut self, count: usize) -> Self {
        self.failing_loads = count;
        self
    }

    pub fn failing_package(mut self, name: &str) -> Self {
        self.failing_package = Some(name.to_string());
        self
    }

    pub fn failing_stop_capture(mut self) -> Self {
        self.failing_stop_capture = true;
        self
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn alive(&self) -> Result<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(WorkerError::InterpreterExited)
        }
    }

    fn write(&self, sink: &mut dyn EventSink, stream: StdStream, text: &str) -> Result<()> {
        if !self.capturing {
            return Ok(());
        }
        sink.handle(RuntimeEvent::Write {
            stream,
            text: text.to_string(),
        })
    }

    fn emit_figures(&mut self, sink: &mut dyn EventSink) -> Result<()> {
        if !self.plotting {
            return Ok(());
        }
        let mut first_error = None;
        for data in std::mem::take(&mut self.figures) {
            if let Err(e) = sink.handle(RuntimeEvent::Figure { data }) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn step(&mut self, line: &str, sink: &mut dyn EventSink) -> Result<()> {
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "print" => {
                self.write(sink, StdStream::Stdout, arg)?;
                self.write(sink, StdStream::Stdout, "\n")
            }
            "write" => self.write(sink, StdStream::Stdout, arg),
            "eprint" => {
                self.write(sink, StdStream::Stderr, arg)?;
                self.write(sink, StdStream::Stderr, "\n")
            }
            "import" if arg.starts_with("matplotlib.pyplot") => {
                self.plotting = true;
                Ok(())
            }
            "_pyworker.install_show_hook()" => {
                self.hooked = self.plotting;
                Ok(())
            }
            "figure" => {
                self.figures.push(figure_data(arg));
                Ok(())
            }
            "badfigure" => {
                self.figures.push("%%%".to_string());
                Ok(())
            }
            "show" if self.hooked => {
                sink.handle(RuntimeEvent::Drain)?;
                self.emit_figures(sink)
            }
            "show" => Ok(()),
            "raise" => Err(WorkerError::Execution(format!(
                "Traceback (most recent call last):\n  File \"<exec>\", line 1, in <module>\n{}",
                arg
            ))),
            "exit" => {
                self.loaded = false;
                Err(WorkerError::InterpreterExited)
            }
            "" => Ok(()),
            other => Err(WorkerError::Execution(format!(
                "NameError: name '{}' is not defined",
                other
            ))),
        }
    }
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn load(&mut self) -> Result<()> {
        self.record("load");
        if self.failing_loads > 0 {
            self.failing_loads -= 1;
            return Err(WorkerError::LoadFailed("interpreter exited during startup".into()));
        }
        self.loaded = true;
        Ok(())
    }

    async fn install_package_manager(&mut self) -> Result<()> {
        self.record("install_package_manager");
        self.alive()
    }

    async fn install_packages(&mut self, packages: &[String]) -> Result<()> {
        self.record(format!("install_packages {}", packages.join(" ")));
        self.alive()?;
        match &self.failing_package {
            Some(bad) if packages.contains(bad) => Err(WorkerError::PackageInstall {
                packages: packages.to_vec(),
                message: format!("ERROR: No matching distribution found for {}", bad),
            }),
            _ => Ok(()),
        }
    }

    async fn install_glue(&mut self) -> Result<()> {
        self.record("install_glue");
        self.alive()
    }

    async fn install_show_hook(&mut self) -> Result<()> {
        self.alive()?;
        self.hooked = self.plotting;
        Ok(())
    }

    async fn start_capture(&mut self) -> Result<()> {
        self.alive()?;
        self.capturing = true;
        Ok(())
    }

    async fn stop_capture(&mut self) -> Result<()> {
        self.alive()?;
        if self.failing_stop_capture {
            return Err(WorkerError::Execution("stop_capture failed".into()));
        }
        self.capturing = false;
        Ok(())
    }

    async fn execute(&mut self, code: &str, sink: &mut dyn EventSink) -> Result<()> {
        self.alive()?;
        for line in code.lines() {
            self.step(line, sink)?;
        }
        Ok(())
    }

    async fn capture_figures(&mut self, sink: &mut dyn EventSink) -> Result<()> {
        self.alive()?;
        self.emit_figures(sink)
    }

    async fn discard_figures(&mut self) -> Result<()> {
        self.alive()?;
        self.figures.clear();
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.record("shutdown");
        self.loaded = false;
        Ok(())
    }
}
