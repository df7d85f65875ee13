//! Evaluation runtime and limits

use crate::SandboxError;
use rquickjs::convert::Coerced;
use rquickjs::{Context, Ctx, Runtime};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Resource limits for sandboxed evaluation
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Maximum source length in bytes (default: 64KB)
    pub max_source_len: usize,
    /// Maximum engine heap in bytes (default: 64MB)
    pub max_memory: usize,
    /// Maximum engine stack in bytes (default: 256KB)
    pub max_stack_size: usize,
    /// Maximum wall-clock time per call (default: 5 seconds)
    pub max_execution_time: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_source_len: 64 * 1024, // 64KB
            max_memory: 64 * 1024 * 1024, // 64MB
            max_stack_size: 256 * 1024, // 256KB
            max_execution_time: Duration::from_secs(5),
        }
    }
}

impl SandboxConfig {
    /// Set the heap limit
    pub fn with_max_memory(mut self, max_memory: usize) -> Self {
        self.max_memory = max_memory;
        self
    }

    /// Set the per-call time limit
    pub fn with_max_execution_time(mut self, max_execution_time: Duration) -> Self {
        self.max_execution_time = max_execution_time;
        self
    }
}

/// Deadline polled by the engine's interrupt handler
#[derive(Debug, Default)]
struct Watchdog {
    deadline: Mutex<Option<Instant>>,
    tripped: AtomicBool,
}

impl Watchdog {
    fn arm(&self, budget: Duration) {
        *lock(&self.deadline) = Some(Instant::now() + budget);
        self.tripped.store(false, Ordering::SeqCst);
    }

    /// Clear the deadline; returns whether it fired
    fn disarm(&self) -> bool {
        *lock(&self.deadline) = None;
        self.tripped.swap(false, Ordering::SeqCst)
    }

    fn expired(&self) -> bool {
        let expired = lock(&self.deadline).is_some_and(|deadline| Instant::now() >= deadline);
        if expired {
            self.tripped.store(true, Ordering::SeqCst);
        }
        expired
    }
}

struct Engine {
    _runtime: Runtime,
    context: Context,
}

/// Isolated JavaScript engine.
///
/// Code evaluated here has no access to the host: no I/O, no timers, only
/// the ECMAScript standard library. The global scope persists between
/// calls so a loaded plugin script can leave state behind for later
/// evaluations. Calls are serialized.
pub struct Sandbox {
    /// Limits applied to every call
    config: SandboxConfig,
    /// Runtime and its single context
    engine: Mutex<Engine>,
    /// Per-call time budget
    watchdog: Arc<Watchdog>,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// Create a sandbox with default limits
    pub fn new() -> Result<Self, SandboxError> {
        Self::with_config(SandboxConfig::default())
    }

    /// Create a sandbox with custom limits
    pub fn with_config(config: SandboxConfig) -> Result<Self, SandboxError> {
        let runtime = Runtime::new()?;
        runtime.set_memory_limit(config.max_memory);
        runtime.set_max_stack_size(config.max_stack_size);

        let watchdog = Arc::new(Watchdog::default());
        let interrupt = Arc::clone(&watchdog);
        runtime.set_interrupt_handler(Some(Box::new(move || interrupt.expired())));

        let context = Context::full(&runtime)?;
        Ok(Self {
            config,
            engine: Mutex::new(Engine { _runtime: runtime, context }),
            watchdog,
        })
    }

    /// Active limits
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Evaluate code as a global script and return its completion value as
    /// JSON.
    ///
    /// Conversion follows `JSON.stringify`: non-finite numbers become
    /// `null`, and `undefined` or a function yields `None`.
    pub fn evaluate(&self, code: &str) -> Result<Option<Value>, SandboxError> {
        if code.len() > self.config.max_source_len {
            return Err(SandboxError::ResourceExhausted(format!(
                "source is {} bytes (max: {})",
                code.len(),
                self.config.max_source_len
            )));
        }

        let engine = lock(&self.engine);
        self.watchdog.arm(self.config.max_execution_time);
        let outcome = engine.context.with(|ctx| {
            let value = ctx
                .eval::<rquickjs::Value, _>(code)
                .map_err(|e| script_error(&ctx, e))?;
            to_json(&ctx, value)
        });
        let timed_out = self.watchdog.disarm();

        match outcome {
            Err(_) if timed_out => Err(SandboxError::ResourceExhausted(format!(
                "execution exceeded {:?}",
                self.config.max_execution_time
            ))),
            other => other,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pending exception rendered as a string
fn exception_message(ctx: &Ctx<'_>) -> String {
    ctx.catch()
        .get::<Coerced<String>>()
        .map(|message| message.0)
        .unwrap_or_else(|e| e.to_string())
}

fn script_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> SandboxError {
    match err {
        rquickjs::Error::Exception => {
            let message = exception_message(ctx);
            if ["out of memory", "stack overflow", "call stack"].iter().any(|cause| message.contains(cause)) {
                SandboxError::ResourceExhausted(message)
            } else {
                SandboxError::Thrown(message)
            }
        }
        other => other.into(),
    }
}

fn to_json<'js>(ctx: &Ctx<'js>, value: rquickjs::Value<'js>) -> Result<Option<Value>, SandboxError> {
    let text = match ctx.json_stringify(value) {
        Ok(Some(text)) => text.to_string()?,
        Ok(None) => return Ok(None),
        Err(rquickjs::Error::Exception) => {
            return Err(SandboxError::Unserializable(exception_message(ctx)));
        }
        Err(e) => return Err(SandboxError::Unserializable(e.to_string())),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| SandboxError::Unserializable(e.to_string()))
}
