//! Runs one snippet in a child interpreter under a deadline.
//!
//! The snippet sees two bindings: `SAVE_DIR`, the output directory, and
//! `FILES_TO_SEND`, a list of paths to force-deliver. For shell snippets
//! `FILES_TO_SEND` is the path of a manifest file to append lines to; for
//! python snippets a prelude exposes both as globals and writes the list to
//! the manifest when the snippet finishes. The engine reads the manifest after
//! the child exits.

use crate::config::{ExecutionConfig, Language};
use crate::scanner::merge_artifacts;
use crate::storage::{ExecutionFailure, ExecutionOutcome, ExecutionResult};
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Appended to stdout when it is cut at `max_output_length`.
pub const TRUNCATION_MARKER: &str = "\n...(output truncated)";

const SAVE_DIR_ENV: &str = "SAVE_DIR";
const MANIFEST_ENV: &str = "FILES_TO_SEND";
const PLOTS_ENV: &str = "CODERUN_PLOTS";

/// How long output pipes may stay open after the snippet itself has exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

const PYTHON_PRELUDE: &str = r#"import os
import sys
from datetime import datetime

_save_dir = os.environ["SAVE_DIR"]
_manifest = os.environ["FILES_TO_SEND"]
_plots = os.environ.get("CODERUN_PLOTS") == "1"
_files = []
_namespace = {
    "__name__": "__main__",
    "__builtins__": __builtins__,
    "SAVE_DIR": _save_dir,
    "FILES_TO_SEND": _files,
}

if _plots:
    try:
        import matplotlib
        matplotlib.use("Agg")
        import matplotlib.pyplot as plt

        plt.rcParams["font.sans-serif"] = [
            "SimHei", "Noto Sans CJK SC", "WenQuanYi Micro Hei", "DejaVu Sans", "Arial",
        ]
        plt.rcParams["axes.unicode_minus"] = False
        _saved = [0]

        def _save_current(base):
            fig = plt.gcf()
            try:
                if fig.get_axes():
                    _saved[0] += 1
                    stamp = datetime.now().strftime("%Y%m%d_%H%M%S")
                    path = os.path.join(_save_dir, "%s_%s_%d.png" % (base, stamp, _saved[0]))
                    fig.savefig(path, dpi=150, bbox_inches="tight")
                    _files.append(path)
            finally:
                plt.close(fig)

        def _savefig(fname=None, *args, **kwargs):
            base = "plot"
            if isinstance(fname, (str, os.PathLike)):
                base = os.path.splitext(os.path.basename(os.fspath(fname)))[0] or "plot"
            _save_current(base)

        plt.show = lambda *args, **kwargs: _save_current("plot")
        plt.savefig = _savefig
        _namespace["plt"] = plt
        _namespace["matplotlib"] = matplotlib
    except ImportError:
        _plots = False

# Preloaded for snippets that use them without importing; missing ones are skipped
for _module, _alias in [
    ("io", "io"), ("os", "os"), ("re", "re"), ("json", "json"), ("datetime", "datetime"),
    ("shutil", "shutil"), ("zipfile", "zipfile"), ("numpy", "np"), ("pandas", "pd"),
    ("seaborn", "sns"), ("requests", "requests"), ("sympy", "sympy"), ("yaml", "yaml"),
    ("openpyxl", "openpyxl"), ("docx", "docx"), ("fpdf", "fpdf"), ("PIL", "PIL"),
    ("aiohttp", "aiohttp"), ("plotly", "plotly"),
]:
    try:
        _namespace[_alias] = __import__(_module)
    except Exception:
        pass
for _package, _name in [("bs4", "BeautifulSoup"), ("PIL", "Image")]:
    try:
        _namespace[_name] = getattr(__import__(_package, fromlist=[_name]), _name)
    except Exception:
        pass

with open(sys.argv[1], encoding="utf-8") as _fh:
    _source = _fh.read()
sys.argv = sys.argv[1:]

try:
    exec(compile(_source, "<snippet>", "exec"), _namespace)
except SystemExit as _exit:
    if _exit.code not in (None, 0):
        raise

if _plots:
    for _num in list(plt.get_fignums()):
        plt.figure(_num)
        _save_current("plot_auto")

with open(_manifest, "a", encoding="utf-8") as _fh:
    for _path in _files:
        _fh.write(os.path.abspath(os.path.join(_save_dir, str(_path))) + "\n")
"#;

/// Cuts `text` to `max_chars` characters plus [`TRUNCATION_MARKER`].
///
/// Text at or under the cap, and text this function already truncated, is
/// returned unchanged.
pub fn truncate_output(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if let Some(head) = text.strip_suffix(TRUNCATION_MARKER) {
        if head.chars().count() <= max_chars {
            return text.to_string();
        }
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

/// Exception class from the last line of a traceback, or `ExitStatus`.
fn classify_fault(stderr: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][\w.]*(?:Error|Exception|Interrupt|Exit|Warning))(?::|$)")
            .expect("valid fault pattern")
    });

    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| pattern.captures(line))
        .map(|caps| caps[1].to_string())
        .unwrap_or_else(|| "ExitStatus".to_string())
}

/// Private scratch space for one run: the snippet file, the prelude and the manifest.
struct ScriptContext {
    _dir: TempDir,
    args: Vec<PathBuf>,
    manifest: PathBuf,
}

impl ScriptContext {
    fn prepare(language: Language, snippet: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("coderun-").tempdir()?;
        let manifest = dir.path().join("files_to_send");
        fs::write(&manifest, "")?;

        let args = match language {
            Language::Python => {
                let prelude = dir.path().join("prelude.py");
                let script = dir.path().join("snippet.py");
                fs::write(&prelude, PYTHON_PRELUDE)?;
                fs::write(&script, snippet)?;
                vec![prelude, script]
            }
            Language::Shell => {
                let script = dir.path().join("snippet.sh");
                fs::write(&script, snippet)?;
                vec![script]
            }
        };

        Ok(Self {
            _dir: dir,
            args,
            manifest,
        })
    }

    /// Paths the snippet asked to deliver, relative entries resolved against `output_dir`.
    fn read_manifest(&self, output_dir: &Path) -> Vec<PathBuf> {
        let content = match fs::read_to_string(&self.manifest) {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "could not read force-delivery manifest");
                return Vec::new();
            }
        };

        let listed: Vec<PathBuf> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                let path = PathBuf::from(line);
                if path.is_absolute() {
                    path
                } else {
                    output_dir.join(path)
                }
            })
            .collect();
        merge_artifacts(&listed, &[])
    }
}

pub struct ExecutionEngine {
    config: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(config: ExecutionConfig) -> Self {
        Self { config }
    }

    /// Runs `snippet` with `output_dir` as its working and output directory.
    ///
    /// Always returns a result; timeouts, crashes and launch problems are
    /// reported through [`ExecutionOutcome::Failed`].
    pub async fn execute(&self, snippet: &str, output_dir: &Path, deadline: Duration) -> ExecutionResult {
        let start_time = Instant::now();

        let result = match self.run(snippet, output_dir, deadline).await {
            Ok(result) => result,
            Err(failure) => ExecutionResult {
                outcome: ExecutionOutcome::Failed(failure),
                stdout: String::new(),
                stderr: String::new(),
                artifacts: Vec::new(),
                duration: Duration::ZERO,
            },
        };

        let duration = start_time.elapsed();
        let duration_ms = duration.as_millis() as u64;
        match &result.outcome {
            ExecutionOutcome::Completed => {
                if !result.stderr.trim().is_empty() {
                    debug!(stderr = %result.stderr.trim_end(), "snippet wrote to stderr");
                }
                info!(duration_ms, artifacts = result.artifacts.len(), "snippet completed")
            }
            ExecutionOutcome::Failed(failure) if failure.is_timeout() => {
                warn!(duration_ms, "snippet ran out of time and was killed")
            }
            ExecutionOutcome::Failed(ExecutionFailure::Fault { kind, exit_code, .. }) => {
                warn!(duration_ms, kind = %kind, exit_code = ?exit_code, "snippet failed")
            }
            ExecutionOutcome::Failed(failure) => warn!(duration_ms, error = %failure, "snippet failed"),
        }
        ExecutionResult { duration, ..result }
    }

    async fn run(
        &self,
        snippet: &str,
        output_dir: &Path,
        deadline: Duration,
    ) -> Result<ExecutionResult, ExecutionFailure> {
        let launch = |e: io::Error| ExecutionFailure::Launch(e.to_string());

        fs::create_dir_all(output_dir).map_err(launch)?;
        let context = ScriptContext::prepare(self.config.language, snippet).map_err(launch)?;
        let interpreter = self.config.effective_interpreter();

        let mut command = std::process::Command::new(&interpreter);
        command
            .args(&context.args)
            .current_dir(output_dir)
            .env(SAVE_DIR_ENV, output_dir)
            .env(MANIFEST_ENV, &context.manifest)
            .env(PLOTS_ENV, if self.config.enable_plots { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so a timeout can take down everything the snippet spawned
            command.process_group(0);
        }
        let mut command = Command::from(command);
        command.kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| ExecutionFailure::Launch(format!("{}: {}", interpreter, e)))?;
        let pid = child.id();
        debug!(pid = ?pid, interpreter = %interpreter, "snippet started");

        let mut stdout_pipe = PipeReader::spawn(child.stdout.take());
        let mut stderr_pipe = PipeReader::spawn(child.stderr.take());

        let waited = tokio::time::timeout(deadline, child.wait()).await;
        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                terminate(&mut child, pid).await;
                return Err(ExecutionFailure::Launch(e.to_string()));
            }
            Err(_) => {
                terminate(&mut child, pid).await;
                drain(&mut stdout_pipe, &mut stderr_pipe).await;
                return Ok(ExecutionResult {
                    outcome: ExecutionOutcome::Failed(ExecutionFailure::Timeout { budget: deadline }),
                    stdout: truncate_output(
                        &String::from_utf8_lossy(&stdout_pipe.take()),
                        self.config.max_output_length,
                    ),
                    stderr: String::from_utf8_lossy(&stderr_pipe.take()).to_string(),
                    artifacts: Vec::new(),
                    duration: Duration::ZERO,
                });
            }
        };

        // Processes the snippet left in the background may still hold the pipes open
        if !drain(&mut stdout_pipe, &mut stderr_pipe).await {
            debug!(pid = ?pid, "background processes kept the output open");
        }
        kill_group(pid);

        let stdout = String::from_utf8_lossy(&stdout_pipe.take()).to_string();
        let stderr = String::from_utf8_lossy(&stderr_pipe.take()).to_string();
        let stdout = truncate_output(&stdout, self.config.max_output_length);

        if status.success() {
            let artifacts = context.read_manifest(output_dir);
            return Ok(ExecutionResult {
                outcome: ExecutionOutcome::Completed,
                stdout,
                stderr,
                artifacts,
                duration: Duration::ZERO,
            });
        }

        let message = if stderr.trim().is_empty() {
            format!("snippet exited with {}", status)
        } else {
            stderr.trim_end().to_string()
        };
        Ok(ExecutionResult {
            outcome: ExecutionOutcome::Failed(ExecutionFailure::Fault {
                kind: classify_fault(&stderr),
                message,
                exit_code: status.code(),
            }),
            stdout,
            stderr,
            artifacts: Vec::new(),
            duration: Duration::ZERO,
        })
    }
}

/// Collects a child pipe in the background. What arrived so far can be taken at any time.
struct PipeReader {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl PipeReader {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            let Some(mut reader) = pipe else { return };
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        debug!(error = %e, "output pipe closed early");
                        break;
                    }
                }
            }
        });
        Self { buffer, task }
    }

    /// Resolves at end of stream.
    async fn wait(&mut self) {
        let _ = (&mut self.task).await;
    }

    fn take(self) -> Vec<u8> {
        self.task.abort();
        let mut buffer = self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *buffer)
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Waits up to [`PIPE_DRAIN_GRACE`] for both pipes to reach end of stream.
async fn drain(stdout: &mut PipeReader, stderr: &mut PipeReader) -> bool {
    tokio::time::timeout(PIPE_DRAIN_GRACE, async {
        stdout.wait().await;
        stderr.wait().await;
    })
    .await
    .is_ok()
}

/// SIGKILLs every process left in the snippet's group.
fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // SAFETY: kill(2) with a negative pid signals the group created at spawn.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Kills the snippet's process group and reaps the child.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);
    if let Err(e) = child.kill().await {
        debug!(error = %e, "child already gone");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_engine(max_output_length: usize) -> ExecutionEngine {
        ExecutionEngine::new(ExecutionConfig {
            language: Language::Shell,
            max_output_length,
            enable_plots: false,
            ..ExecutionConfig::default()
        })
    }

    #[test]
    fn test_truncate_exact_length_plus_marker() {
        let truncated = truncate_output("abcdefghij", 4);
        assert_eq!(truncated, format!("abcd{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncate_short_text_unchanged_and_idempotent() {
        assert_eq!(truncate_output("abc", 4), "abc");
        assert_eq!(truncate_output("abcd", 4), "abcd");

        let once = truncate_output("héllo wörld", 5);
        assert_eq!(once, format!("héllo{}", TRUNCATION_MARKER));
        assert_eq!(truncate_output(&once, 5), once);
    }

    #[test]
    fn test_classify_fault() {
        let traceback = "Traceback (most recent call last):\n  File \"<snippet>\", line 1, in <module>\nZeroDivisionError: division by zero\n";
        assert_eq!(classify_fault(traceback), "ZeroDivisionError");
        assert_eq!(classify_fault("KeyboardInterrupt\n"), "KeyboardInterrupt");
        assert_eq!(classify_fault("requests.exceptions.ConnectionError: refused"), "requests.exceptions.ConnectionError");
        assert_eq!(classify_fault("sh: 1: nope: not found"), "ExitStatus");
        assert_eq!(classify_fault(""), "ExitStatus");
    }

    #[tokio::test]
    async fn test_success_captures_output_and_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let engine = shell_engine(3000);

        let result = engine
            .execute("printf ok > result.txt\necho done\necho warn >&2\n", dir.path(), Duration::from_secs(10))
            .await;

        assert!(result.success(), "{:?}", result.outcome);
        assert_eq!(result.stdout, "done\n");
        assert_eq!(result.stderr, "warn\n");
        assert_eq!(fs::read_to_string(dir.path().join("result.txt")).unwrap(), "ok");
        assert!(result.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_stdout_truncated_to_cap() {
        let dir = tempfile::tempdir().unwrap();
        let result = shell_engine(4)
            .execute("printf abcdefghij", dir.path(), Duration::from_secs(10))
            .await;
        assert!(result.success());
        assert_eq!(result.stdout, format!("abcd{}", TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_force_delivery_list_is_collected() {
        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let existing = elsewhere.path().join("report.docx");
        fs::write(&existing, "report").unwrap();

        let snippet = format!(
            "echo '{}' >> \"$FILES_TO_SEND\"\nprintf x > made.txt\necho made.txt >> \"$FILES_TO_SEND\"\necho '{}' >> \"$FILES_TO_SEND\"\n",
            existing.display(),
            existing.display()
        );
        let result = shell_engine(3000)
            .execute(&snippet, dir.path(), Duration::from_secs(10))
            .await;

        assert!(result.success(), "{:?}", result.outcome);
        assert_eq!(result.artifacts, vec![existing, dir.path().join("made.txt")]);
    }

    #[tokio::test]
    async fn test_fault_is_captured_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let snippet = "echo partial\necho 'ValueError: bad input' >&2\necho keep >> \"$FILES_TO_SEND\"\nexit 3\n";
        let result = shell_engine(3000)
            .execute(snippet, dir.path(), Duration::from_secs(10))
            .await;

        match result.failure() {
            Some(ExecutionFailure::Fault { kind, message, exit_code }) => {
                assert_eq!(kind, "ValueError");
                assert_eq!(message, "ValueError: bad input");
                assert_eq!(*exit_code, Some(3));
            }
            other => panic!("expected fault, got {:?}", other),
        }
        assert_eq!(result.stdout, "partial\n");
        assert!(result.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_kills_the_snippet() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let result = shell_engine(3000)
            .execute("echo $$ > pid\nsleep 30\necho never\n", dir.path(), Duration::from_secs(1))
            .await;
        let elapsed = started.elapsed();

        assert!(!result.success());
        assert!(result.failure().unwrap().is_timeout());
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);

        #[cfg(unix)]
        {
            let pid: libc::pid_t = fs::read_to_string(dir.path().join("pid"))
                .unwrap()
                .trim()
                .parse()
                .unwrap();
            // The child was killed and reaped, so the pid no longer exists
            let alive = unsafe { libc::kill(pid, 0) } == 0;
            assert!(!alive, "snippet process {} survived the timeout", pid);
        }
    }

    #[tokio::test]
    async fn test_background_child_does_not_turn_exit_into_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let result = shell_engine(3000)
            .execute("echo done\n(sleep 30) &\n", dir.path(), Duration::from_secs(5))
            .await;

        assert!(result.success(), "{:?}", result.outcome);
        assert_eq!(result.stdout, "done\n");
        assert!(started.elapsed() < Duration::from_secs(4), "took {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn test_timeout_keeps_output_printed_before_the_kill() {
        let dir = tempfile::tempdir().unwrap();
        let result = shell_engine(3000)
            .execute("echo started\nsleep 30\n", dir.path(), Duration::from_secs(1))
            .await;
        assert!(result.failure().unwrap().is_timeout());
        assert_eq!(result.stdout, "started\n");
    }

    fn python_can_import(module: &str) -> bool {
        std::process::Command::new("python3")
            .args(["-c", &format!("import {}", module)])
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn python_engine() -> ExecutionEngine {
        ExecutionEngine::new(ExecutionConfig {
            language: Language::Python,
            enable_plots: true,
            ..ExecutionConfig::default()
        })
    }

    #[tokio::test]
    async fn test_python_files_to_send_and_clean_exit() {
        if !python_can_import("os") {
            eprintln!("python3 not available, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let snippet = "\
with open(os.path.join(SAVE_DIR, 'table.csv'), 'w') as fh:
    fh.write('a,b\\n1,2\\n')
FILES_TO_SEND.append('table.csv')
print(json.dumps({'rows': 1}))
import sys
sys.exit(0)
print('unreachable')
";
        let result = python_engine().execute(snippet, dir.path(), Duration::from_secs(30)).await;

        assert!(result.success(), "{:?} {}", result.outcome, result.stderr);
        assert_eq!(result.stdout, "{\"rows\": 1}\n");
        assert_eq!(result.artifacts, vec![dir.path().join("table.csv")]);
    }

    #[tokio::test]
    async fn test_python_traceback_becomes_fault() {
        if !python_can_import("os") {
            eprintln!("python3 not available, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let snippet = "print('before')\nFILES_TO_SEND.append('x.txt')\nresult = 1 / 0\n";
        let result = python_engine().execute(snippet, dir.path(), Duration::from_secs(30)).await;

        match result.failure() {
            Some(ExecutionFailure::Fault { kind, message, exit_code }) => {
                assert_eq!(kind, "ZeroDivisionError");
                assert!(message.contains("Traceback"));
                assert!(message.ends_with("ZeroDivisionError: division by zero"));
                assert_eq!(*exit_code, Some(1));
            }
            other => panic!("expected fault, got {:?}", other),
        }
        assert_eq!(result.stdout, "before\n");
        assert!(result.artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_python_nonzero_exit_is_fault() {
        if !python_can_import("os") {
            eprintln!("python3 not available, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let result = python_engine()
            .execute("import sys\nsys.exit(4)\n", dir.path(), Duration::from_secs(30))
            .await;
        assert!(matches!(
            result.failure(),
            Some(ExecutionFailure::Fault { exit_code: Some(4), .. })
        ));
    }

    #[tokio::test]
    async fn test_python_plots_are_saved_and_listed() {
        if !python_can_import("matplotlib") {
            eprintln!("matplotlib not available, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let snippet = "\
plt.plot([1, 2, 3])
plt.show()
plt.figure()
plt.bar(['a', 'b'], [3, 4])
plt.savefig('/somewhere/else/sales.png')
plt.figure()
plt.plot([3, 2, 1])
";
        let result = python_engine().execute(snippet, dir.path(), Duration::from_secs(60)).await;
        assert!(result.success(), "{:?} {}", result.outcome, result.stderr);

        let names: Vec<String> = result
            .artifacts
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 3, "{:?}", names);
        assert!(names[0].starts_with("plot_") && names[0].ends_with("_1.png"));
        assert!(names[1].starts_with("sales_") && names[1].ends_with("_2.png"));
        assert!(names[2].starts_with("plot_auto_") && names[2].ends_with("_3.png"));
        for artifact in &result.artifacts {
            assert_eq!(artifact.parent(), Some(dir.path()));
            assert!(artifact.is_file());
        }
    }

    #[tokio::test]
    async fn test_python_preloads_available_libraries() {
        if !python_can_import("os") {
            eprintln!("python3 not available, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let snippet = "print(re.sub(r'\\d', '#', 'a1b2'), datetime.date(2024, 1, 2).isoformat())\n";
        let result = python_engine().execute(snippet, dir.path(), Duration::from_secs(30)).await;
        assert!(result.success(), "{:?} {}", result.outcome, result.stderr);
        assert_eq!(result.stdout, "a#b# 2024-01-02\n");

        if python_can_import("numpy") {
            let result = python_engine()
                .execute("print(int(np.arange(4).sum()))\n", dir.path(), Duration::from_secs(30))
                .await;
            assert_eq!(result.stdout, "6\n");
        }
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ExecutionEngine::new(ExecutionConfig {
            language: Language::Shell,
            interpreter: "/definitely/not/an/interpreter".to_string(),
            ..ExecutionConfig::default()
        });
        let result = engine.execute("echo hi", dir.path(), Duration::from_secs(5)).await;
        assert!(matches!(result.failure(), Some(ExecutionFailure::Launch(_))));
    }
}
