//! Atomic scripts and their invocation.
//!
//! A [`Script`] is one algorithm body in two forms: a Lua source evaluated by
//! Redis-compatible stores, and a native Rust function over [`StoreOps`]
//! evaluated by stores that hold their state in process. Both forms take the
//! same ordered keys and arguments and reply with the same integers.
//!
//! The store guarantees that no other command or script touching the same
//! keys interleaves with a running script. Nothing here retries: a store
//! error is returned to the caller exactly as reported.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::decision::Decision;
use crate::error::{ConnectionError, Result, StorageError};
use crate::storage::{Storage, StoreOps};

/// Native script body.
pub type NativeFn = fn(&mut dyn StoreOps, &ScriptInput<'_>) -> Result<Vec<i64>>;

/// An algorithm body that a store executes as one indivisible unit.
pub struct Script {
    name: &'static str,
    lua: &'static str,
    native: NativeFn,
}

impl Script {
    /// Create a script from its Lua source and native body.
    pub const fn new(name: &'static str, lua: &'static str, native: NativeFn) -> Self {
        Self { name, lua, native }
    }

    /// Script name (for logging and error reports).
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Lua source for stores with server-side scripting.
    pub fn lua(&self) -> &'static str {
        self.lua
    }

    /// Run the native body against a store's primitives.
    ///
    /// The caller is responsible for holding whatever lock makes this atomic.
    pub fn run_native(&self, store: &mut dyn StoreOps, input: &ScriptInput<'_>) -> Result<Vec<i64>> {
        (self.native)(store, input)
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script").field("name", &self.name).finish()
    }
}

/// A single script argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptArg {
    /// Integer argument.
    Int(i64),
    /// Floating point argument.
    Float(f64),
    /// String argument.
    Str(String),
}

impl fmt::Display for ScriptArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

impl From<i64> for ScriptArg {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for ScriptArg {
    fn from(v: u64) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for ScriptArg {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for ScriptArg {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for ScriptArg {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

/// Keys and arguments as seen by a native script body.
#[derive(Debug, Clone, Copy)]
pub struct ScriptInput<'a> {
    script: &'static str,
    keys: &'a [String],
    args: &'a [ScriptArg],
}

impl<'a> ScriptInput<'a> {
    /// Wrap keys and arguments for `script`.
    pub fn new(script: &'static str, keys: &'a [String], args: &'a [ScriptArg]) -> Self {
        Self { script, keys, args }
    }

    /// The key at `index` (0-based).
    pub fn key(&self, index: usize) -> Result<&'a str> {
        self.keys
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| StorageError::script(self.script, format!("missing KEYS[{}]", index + 1)).into())
    }

    /// The argument at `index` read as an integer.
    pub fn int(&self, index: usize) -> Result<i64> {
        match self.arg(index)? {
            ScriptArg::Int(v) => Ok(*v),
            ScriptArg::Float(v) if v.fract() == 0.0 => Ok(*v as i64),
            ScriptArg::Str(s) => s.parse().map_err(|_| self.bad_arg(index, "an integer")),
            ScriptArg::Float(_) => Err(self.bad_arg(index, "an integer")),
        }
    }

    /// The argument at `index` read as a number.
    pub fn float(&self, index: usize) -> Result<f64> {
        match self.arg(index)? {
            ScriptArg::Int(v) => Ok(*v as f64),
            ScriptArg::Float(v) => Ok(*v),
            ScriptArg::Str(s) => s.parse().map_err(|_| self.bad_arg(index, "a number")),
        }
    }

    /// The argument at `index` as text.
    pub fn text(&self, index: usize) -> Result<String> {
        Ok(self.arg(index)?.to_string())
    }

    fn arg(&self, index: usize) -> Result<&'a ScriptArg> {
        self.args
            .get(index)
            .ok_or_else(|| StorageError::script(self.script, format!("missing ARGV[{}]", index + 1)).into())
    }

    fn bad_arg(&self, index: usize, expected: &str) -> crate::error::RateLimitError {
        StorageError::script(self.script, format!("ARGV[{}] is not {expected}", index + 1)).into()
    }
}

/// One ready-to-run script call: the script, its keys and its arguments.
#[derive(Debug, Clone)]
pub struct Invocation {
    script: &'static Script,
    keys: Vec<String>,
    args: Vec<ScriptArg>,
}

impl Invocation {
    /// Create an invocation of `script`.
    pub fn new(script: &'static Script) -> Self {
        Self {
            script,
            keys: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Append a key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<ScriptArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The script to run.
    pub fn script(&self) -> &'static Script {
        self.script
    }

    /// Keys, in order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Arguments, in order.
    pub fn args(&self) -> &[ScriptArg] {
        &self.args
    }

    /// Run the invocation in one round trip and decode the reply.
    ///
    /// With a deadline, an elapsed timer drops the in-flight call and yields
    /// [`ConnectionError::Timeout`]; the store may or may not have applied it.
    pub async fn execute<S: Storage>(
        &self,
        storage: &S,
        deadline: Option<Duration>,
    ) -> Result<Decision> {
        let call = storage.eval(self.script, &self.keys, &self.args);
        let reply = match deadline {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ConnectionError::Timeout(limit))??,
            None => call.await?,
        };
        Decision::from_reply(&reply)
    }
}

static EVENT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A sorted-set member for an event at `now` that stays distinct from any
/// other event recorded by this process at the same nanosecond.
pub(crate) fn event_member(now: i64) -> String {
    let seq = EVENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{now}-{seq}")
}
