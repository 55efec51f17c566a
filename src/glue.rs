//! Python code run inside the interpreter child.

/// Control loop started with `python -u -c`.
///
/// Requests arrive as JSON lines on the original stdin; frames go back as
/// JSON lines on the original stdout. Both descriptors are duplicated before
/// fd 0 is pointed at the null device and fd 1 at stderr, so user code can
/// neither read nor corrupt the control stream. User code runs in a fresh
/// `__main__` module; the driver's own module stays reachable only as
/// `_pyworker_driver`.
pub const DRIVER: &str = r#"
import ast
import asyncio
import builtins
import inspect
import json
import os
import sys
import traceback
import types

_control_in = os.fdopen(os.dup(0), "r", encoding="utf-8")
_control_out = os.fdopen(os.dup(1), "w", encoding="utf-8", errors="replace")
_null = os.open(os.devnull, os.O_RDONLY)
os.dup2(_null, 0)
os.close(_null)
os.dup2(2, 1)


def _send(frame):
    _control_out.write(json.dumps(frame, ensure_ascii=False) + "\n")
    _control_out.flush()


_loop = asyncio.new_event_loop()
_main = types.ModuleType("__main__")
_main.__builtins__ = builtins
sys.modules["_pyworker_driver"] = sys.modules["__main__"]
sys.modules["__main__"] = _main
_user_ns = _main.__dict__
_glue_ns = {"__name__": "_pyworker_glue", "__builtins__": builtins, "_send": _send}


def _describe(exc, filename):
    tb = exc.__traceback__
    while tb is not None and tb.tb_frame.f_code.co_filename != filename:
        tb = tb.tb_next
    return "".join(traceback.format_exception(type(exc), exc, tb)).rstrip("\n")


def _execute(source, namespace, filename):
    code = compile(
        source, filename, "exec", flags=ast.PyCF_ALLOW_TOP_LEVEL_AWAIT, dont_inherit=True
    )
    result = eval(code, namespace)
    if inspect.iscoroutine(result):
        _loop.run_until_complete(result)


def _serve():
    _send({"ev": "hello", "version": sys.version.split()[0]})
    for line in _control_in:
        line = line.strip()
        if not line:
            continue
        try:
            request = json.loads(line)
        except ValueError as exc:
            _send({"ev": "fail", "message": "invalid request: %s" % exc})
            continue
        op = request.get("op")
        if op == "shutdown":
            _send({"ev": "ok"})
            return
        if op == "exec":
            namespace, filename = _user_ns, "<exec>"
        elif op == "internal":
            namespace, filename = _glue_ns, "<pyworker>"
        else:
            _send({"ev": "fail", "message": "unknown op: %r" % (op,)})
            continue
        try:
            _execute(request.get("code", ""), namespace, filename)
        except BaseException as exc:
            _send({"ev": "fail", "message": _describe(exc, filename)})
        else:
            _send({"ev": "ok"})


_serve()
"#;

/// Capture streams, figure capture and the `pyplot.show` replacement.
///
/// Runs in the glue namespace, where `_send` writes a frame to the control
/// stream. The public entry points are exposed as the `_pyworker` module,
/// also bound in builtins so rewritten user code can reach it from any scope.
pub fn glue_source(dpi: u32) -> String {
    format!(
        r#"
import base64
import builtins
import codecs
import io
import sys
import types

_FIGURE_DPI = {dpi}


class _CaptureBuffer(io.RawIOBase):
    def __init__(self, text_stream):
        super().__init__()
        self._text_stream = text_stream
        self._decoder = codecs.getincrementaldecoder("utf-8")("replace")

    def writable(self):
        return True

    def write(self, data):
        data = bytes(data)
        self._text_stream.write(self._decoder.decode(data))
        return len(data)


class _CaptureStream(io.TextIOBase):
    def __init__(self, stream):
        super().__init__()
        self._stream = stream
        self._buffer = _CaptureBuffer(self)

    @property
    def buffer(self):
        return self._buffer

    @property
    def encoding(self):
        return "utf-8"

    @property
    def name(self):
        return "<" + self._stream + ">"

    def writable(self):
        return True

    def isatty(self):
        return False

    def write(self, text):
        if not isinstance(text, str):
            raise TypeError("write() argument must be str, not " + type(text).__name__)
        if text:
            # lone surrogates cannot cross the control stream
            text.encode("utf-8")
            _send(dict(ev="write", stream=self._stream, text=text))
        return len(text)

    def flush(self):
        pass


def start_capture():
    sys.stdout = _CaptureStream("stdout")
    sys.stderr = _CaptureStream("stderr")


def stop_capture():
    sys.stdout = sys.__stdout__
    sys.stderr = sys.__stderr__


def capture_figures():
    plt = sys.modules.get("matplotlib.pyplot")
    if plt is None:
        return
    for number in plt.get_fignums():
        figure = plt.figure(number)
        if not any(axes.has_data() for axes in figure.get_axes()):
            continue
        buffer = io.BytesIO()
        figure.savefig(buffer, format="png", dpi=_FIGURE_DPI, bbox_inches="tight")
        _send(dict(ev="figure", data=base64.b64encode(buffer.getvalue()).decode("ascii")))
    plt.close("all")


def discard_figures():
    plt = sys.modules.get("matplotlib.pyplot")
    if plt is not None:
        plt.close("all")


def _show(*args, **kwargs):
    _send(dict(ev="drain"))
    capture_figures()


_show._pyworker_hook = True


def install_show_hook():
    plt = sys.modules.get("matplotlib.pyplot")
    if plt is None:
        return
    if getattr(plt.show, "_pyworker_hook", False):
        return
    plt.show = _show


_module = types.ModuleType("_pyworker")
_module.start_capture = start_capture
_module.stop_capture = stop_capture
_module.capture_figures = capture_figures
_module.discard_figures = discard_figures
_module.install_show_hook = install_show_hook
sys.modules["_pyworker"] = _module
builtins._pyworker = _module
"#,
        dpi = dpi
    )
}

/// Refresh import caches so packages installed mid-session are importable.
pub const INVALIDATE_IMPORT_CACHES: &str = "import importlib\nimportlib.invalidate_caches()\n";

pub const START_CAPTURE: &str = "_pyworker.start_capture()";
pub const STOP_CAPTURE: &str = "_pyworker.stop_capture()";
pub const INSTALL_SHOW_HOOK: &str = "_pyworker.install_show_hook()";
pub const CAPTURE_FIGURES: &str = "_pyworker.capture_figures()";
pub const DISCARD_FIGURES: &str = "_pyworker.discard_figures()";
