//! Process-wide engine runtime with reference-counted lifetime.
//!
//! The native engine is initialized when the first bridge acquires the
//! runtime and torn down when the last one releases it:
//!
//! ```text
//! acquire()  0 -> 1   MediaEngine::initialize(options, plugin paths)
//! acquire()  n -> n+1 (no-op besides the count)
//! release()  n -> n-1 (no-op besides the count)
//! release()  1 -> 0   MediaEngine::shutdown()
//! release()  0        RuntimeUnderflow (logged, nothing torn down)
//! ```
//!
//! # Plugin search path
//!
//! [`PluginPaths::discover`] looks for bundled engine plugins in:
//! 1. `$STREAMBRIDGE_PLUGIN_PATH` (colon-separated)
//! 2. `plugins/` next to the executable
//! 3. `../plugins/` relative to the executable (development layouts)
//!
//! Only non-empty directories are kept. Engines that load plugins from disk
//! prepend them to their own search variable before initializing.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::engine::{MediaEngine, NativeCallbacks, NativeSession};
use crate::error::BridgeError;

/// Environment variable with extra plugin directories.
pub const PLUGIN_PATH_ENV: &str = "STREAMBRIDGE_PLUGIN_PATH";

/// Severity of a native log line.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    /// Returns the integer severity passed across the FFI boundary.
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Parses an integer severity; out-of-range values map to `Trace`.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            i32::MIN..=0 => LogLevel::Error,
            1 => LogLevel::Warning,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Receives native log lines. May be called from any engine thread.
pub type LogSink = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Returns a sink that forwards native log lines into `tracing`.
pub fn tracing_log_sink() -> LogSink {
    Arc::new(|level, message| match level {
        LogLevel::Error => tracing::error!(target: "streambridge::native", "{message}"),
        LogLevel::Warning => tracing::warn!(target: "streambridge::native", "{message}"),
        LogLevel::Info => tracing::info!(target: "streambridge::native", "{message}"),
        LogLevel::Debug => tracing::debug!(target: "streambridge::native", "{message}"),
        LogLevel::Trace => tracing::trace!(target: "streambridge::native", "{message}"),
    })
}

/// Options applied on the 0→1 runtime transition.
#[derive(Clone, Default)]
pub struct RuntimeOptions {
    debug_spec: Option<String>,
    log_sink: Option<LogSink>,
}

impl RuntimeOptions {
    /// Creates options; an empty debug spec disables native debug output.
    pub fn new(debug_spec: Option<&str>, log_sink: Option<LogSink>) -> Self {
        let debug_spec = debug_spec
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        Self {
            debug_spec,
            log_sink,
        }
    }

    /// Returns the `category:level[,...]` debug spec, if any.
    pub fn debug_spec(&self) -> Option<&str> {
        self.debug_spec.as_deref()
    }

    /// Returns the installed log sink, if any.
    pub fn log_sink(&self) -> Option<&LogSink> {
        self.log_sink.as_ref()
    }
}

impl std::fmt::Debug for RuntimeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeOptions")
            .field("debug_spec", &self.debug_spec)
            .field("log_sink", &self.log_sink.is_some())
            .finish()
    }
}

/// Directories searched for bundled engine plugins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginPaths {
    dirs: Vec<PathBuf>,
}

impl PluginPaths {
    /// Uses exactly the given directories (empty ones are skipped).
    pub fn from_dirs(dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            dirs: dirs.into_iter().filter(|d| is_non_empty_dir(d)).collect(),
        }
    }

    /// Searches the environment and the executable's neighborhood.
    pub fn discover() -> Self {
        let mut candidates = Vec::new();

        if let Ok(extra) = env::var(PLUGIN_PATH_ENV) {
            candidates.extend(env::split_paths(&extra));
        }

        match env::current_exe() {
            Ok(exe) => {
                if let Some(dir) = exe.parent() {
                    candidates.push(dir.join("plugins"));
                    candidates.push(dir.join("../plugins"));
                }
            }
            Err(e) => debug!("plugin discovery: no executable path: {e}"),
        }

        let paths = Self::from_dirs(candidates);
        debug!("plugin discovery found {} directories", paths.dirs.len());
        paths
    }

    /// Returns the discovered directories.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Returns true if nothing was found.
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Prepends the directories to a path-list environment variable.
    ///
    /// Must run before the engine reads the variable.
    pub fn prepend_to_env(&self, var: &str) {
        if self.dirs.is_empty() {
            return;
        }
        let current = env::var_os(var);
        let existing = current.as_deref().map(env::split_paths);
        let joined = match existing {
            Some(rest) => env::join_paths(self.dirs.iter().cloned().chain(rest)),
            None => env::join_paths(self.dirs.iter()),
        };
        match joined {
            Ok(value) => {
                debug!("{var}={}", value.to_string_lossy());
                env::set_var(var, value);
            }
            Err(e) => error!("could not extend {var}: {e}"),
        }
    }
}

fn is_non_empty_dir(path: &Path) -> bool {
    path.is_dir()
        && path
            .read_dir()
            .map(|mut d| d.next().is_some())
            .unwrap_or(false)
}

/// Reference-counted handle to the shared native engine runtime.
pub struct EngineRuntime {
    engine: Arc<dyn MediaEngine>,
    plugin_paths: PluginPaths,
    refcount: AtomicUsize,
    /// Serializes the 0→1 and 1→0 transitions with the engine calls they trigger
    transition: Mutex<()>,
}

static GLOBAL_RUNTIME: OnceLock<Arc<EngineRuntime>> = OnceLock::new();

impl EngineRuntime {
    /// Creates a runtime over `engine` with no plugin directories.
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self::with_plugin_paths(engine, PluginPaths::default())
    }

    /// Creates a runtime over `engine` that configures `plugin_paths` on init.
    pub fn with_plugin_paths(engine: Arc<dyn MediaEngine>, plugin_paths: PluginPaths) -> Self {
        Self {
            engine,
            plugin_paths,
            refcount: AtomicUsize::new(0),
            transition: Mutex::new(()),
        }
    }

    /// Returns the process-wide runtime over the default engine.
    ///
    /// Created lazily on first use; the engine itself is only initialized
    /// on the first [`acquire`](Self::acquire).
    pub fn global() -> &'static Arc<EngineRuntime> {
        GLOBAL_RUNTIME.get_or_init(|| {
            Arc::new(EngineRuntime::with_plugin_paths(
                crate::default_engine(),
                PluginPaths::discover(),
            ))
        })
    }

    /// Takes a reference, initializing the engine on the 0→1 transition.
    ///
    /// `options` are only applied by the call that performs the transition.
    pub fn acquire(&self, options: &RuntimeOptions) -> Result<(), BridgeError> {
        let _transition = self.transition.lock();
        if self.refcount.load(Ordering::Acquire) == 0 {
            info!(
                engine = self.engine.name(),
                debug_spec = ?options.debug_spec(),
                "initializing engine runtime"
            );
            // Count stays at zero if init fails
            self.engine.initialize(options, &self.plugin_paths)?;
        }
        let count = self.refcount.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(refcount = count, "engine runtime acquired");
        Ok(())
    }

    /// Drops a reference, shutting the engine down on the 1→0 transition.
    pub fn release(&self) -> Result<(), BridgeError> {
        let _transition = self.transition.lock();
        let previous = self.refcount.load(Ordering::Acquire);
        if previous == 0 {
            error!("engine runtime released with refcount 0 (unbalanced acquire/release)");
            return Err(BridgeError::RuntimeUnderflow);
        }
        self.refcount.fetch_sub(1, Ordering::AcqRel);
        debug!(refcount = previous - 1, "engine runtime released");
        if previous == 1 {
            info!(engine = self.engine.name(), "shutting down engine runtime");
            self.engine.shutdown();
        }
        Ok(())
    }

    /// Returns the current number of references.
    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    /// Returns true while at least one reference is held.
    pub fn is_active(&self) -> bool {
        self.refcount() > 0
    }

    /// Returns the engine this runtime manages.
    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    /// Returns the plugin directories configured on init.
    pub fn plugin_paths(&self) -> &PluginPaths {
        &self.plugin_paths
    }

    /// Opens a native session; the runtime must be active.
    pub(crate) fn create_session(
        &self,
        name: &str,
        callbacks: NativeCallbacks,
    ) -> Result<Box<dyn NativeSession>, BridgeError> {
        if !self.is_active() {
            return Err(BridgeError::RuntimeInactive);
        }
        Ok(self.engine.create_session(name, callbacks)?)
    }
}

impl std::fmt::Debug for EngineRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntime")
            .field("engine", &self.engine.name())
            .field("refcount", &self.refcount())
            .field("plugin_paths", &self.plugin_paths)
            .finish()
    }
}
