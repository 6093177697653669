//! A V8 isolate hosting one evaluated server bundle.
//!
//! `JsRuntime` is `!Send` and V8 requires isolates to be dropped on the
//! thread that created them, so each bundle gets its own OS thread. Callers
//! on any thread talk to it over channels:
//!
//! ```text
//! Rust (any thread)                 bundle thread
//! ─────────────────                 ─────────────
//! Isolate::spawn(filename, source)  → JsRuntime::new, glue, run bundle
//!   ← slot of the bundle's export   ← __hotserve.adopt()
//! Isolate::eval(code)               → execute_script(code)
//!   ← string result                 ←
//! Isolate::render(slot, request)    → __hotserve.render(slot, req)
//!                                     run event loop until idle
//!   ← RenderReply                   ← __hotserve.collect()
//! ```
//!
//! The thread exits once the last handle to the isolate is dropped.

use deno_core::{extension, op2, v8, JsRuntime, RuntimeOptions};
use serde::Deserialize;
use std::sync::mpsc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Host glue installed before the bundle runs.
const GLUE_JS: &str = include_str!("glue.js");

const BUNDLE_SCRIPT_NAME: &str = "<hotserve:bundle>";

extension!(hotserve_bundle, ops = [op_hotserve_log]);

/// Route bundle `console` output into tracing.
#[op2(fast)]
fn op_hotserve_log(level: u32, #[string] message: &str) {
    match level {
        0 => debug!(target: "hotserve::bundle", "{message}"),
        1 => info!(target: "hotserve::bundle", "{message}"),
        2 => warn!(target: "hotserve::bundle", "{message}"),
        _ => error!(target: "hotserve::bundle", "{message}"),
    }
}

/// Runtime error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// JavaScript threw.
    #[error("{message}")]
    JavaScript {
        message: String,
        stack: Option<String>,
    },

    #[error("Runtime initialization failed: {0}")]
    Init(String),

    #[error("bundle isolate terminated")]
    Terminated,

    #[error("unexpected reply from bundle isolate: {0}")]
    Protocol(String),
}

impl RuntimeError {
    fn from_js(err: &deno_core::error::AnyError) -> Self {
        if let Some(js) = err.downcast_ref::<deno_core::error::JsError>() {
            return Self::JavaScript {
                message: js.exception_message.clone(),
                stack: js.stack.clone(),
            };
        }
        Self::JavaScript {
            message: err.to_string(),
            stack: None,
        }
    }
}

/// What a render call left behind in the response object.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub finished: bool,
    pub next: Option<NextReply>,
}

/// The argument `next` was called with.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NextReply {
    Pass { pass: bool },
    Error { error: JsErrorReply },
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsErrorReply {
    pub message: String,
    pub stack: Option<String>,
}

enum Command {
    Eval {
        code: String,
        reply: mpsc::Sender<Result<String, RuntimeError>>,
    },
    Render {
        slot: u32,
        request: String,
        reply: mpsc::Sender<Result<RenderReply, RuntimeError>>,
    },
}

/// Handle to a bundle isolate thread.
pub struct Isolate {
    sender: mpsc::Sender<Command>,
}

impl Isolate {
    /// Start a fresh isolate, evaluate `source` as a classic script named
    /// `filename`, and return the slot holding its export.
    pub fn spawn(filename: &str, source: String) -> Result<(Self, u32), RuntimeError> {
        let (tx, rx) = mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, RuntimeError>>();

        // Script names must be 'static; V8 takes the per-build name from sourceURL.
        let source = format!("{source}\n//# sourceURL={filename}\n");
        let script = filename.to_string();

        thread::Builder::new()
            .name("hotserve-bundle".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(RuntimeError::Init(format!(
                            "failed to create tokio runtime: {e}"
                        ))));
                        return;
                    }
                };

                let mut js = JsRuntime::new(RuntimeOptions {
                    extensions: vec![hotserve_bundle::init_ops()],
                    ..Default::default()
                });

                let slot = match bootstrap(&mut js, source) {
                    Ok(slot) => slot,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(slot)).is_err() {
                    return;
                }

                debug!(%script, "bundle isolate ready");
                isolate_loop(&mut js, &rt, &rx);
                debug!(%script, "bundle isolate stopped");
            })
            .map_err(|e| RuntimeError::Init(format!("failed to spawn bundle thread: {e}")))?;

        let slot = ready_rx.recv().map_err(|_| RuntimeError::Terminated)??;
        Ok((Self { sender: tx }, slot))
    }

    /// Evaluate glue code and return its result as a string.
    pub fn eval(&self, code: String) -> Result<String, RuntimeError> {
        let (reply, rx) = mpsc::channel();
        self.sender
            .send(Command::Eval { code, reply })
            .map_err(|_| RuntimeError::Terminated)?;
        rx.recv().map_err(|_| RuntimeError::Terminated)?
    }

    /// Call the handler in `slot` with a request object (JSON text) and wait
    /// for it, and anything it scheduled, to settle.
    pub fn render(&self, slot: u32, request: String) -> Result<RenderReply, RuntimeError> {
        let (reply, rx) = mpsc::channel();
        self.sender
            .send(Command::Render {
                slot,
                request,
                reply,
            })
            .map_err(|_| RuntimeError::Terminated)?;
        rx.recv().map_err(|_| RuntimeError::Terminated)?
    }
}

fn bootstrap(js: &mut JsRuntime, source: String) -> Result<u32, RuntimeError> {
    js.execute_script("<hotserve:glue>", GLUE_JS.to_string())
        .map_err(|e| RuntimeError::Init(format!("glue failed: {e}")))?;

    let completion = js
        .execute_script(BUNDLE_SCRIPT_NAME, source)
        .map_err(|e| RuntimeError::from_js(&e))?;

    {
        let scope = &mut js.handle_scope();
        let value = v8::Local::new(scope, completion);
        let global = scope.get_current_context().global(scope);
        let key = v8::String::new(scope, "__hotserveCompletion")
            .ok_or_else(|| RuntimeError::Init("failed to allocate key".to_string()))?;
        global.set(scope, key.into(), value);
    }

    let slot = eval_to_string(js, "globalThis.__hotserve.adopt()".to_string())?;
    slot.parse()
        .map_err(|_| RuntimeError::Protocol(format!("bad slot `{slot}`")))
}

fn isolate_loop(js: &mut JsRuntime, rt: &tokio::runtime::Runtime, rx: &mpsc::Receiver<Command>) {
    while let Ok(command) = rx.recv() {
        match command {
            Command::Eval { code, reply } => {
                let _ = reply.send(eval_to_string(js, code));
            }
            Command::Render {
                slot,
                request,
                reply,
            } => {
                let _ = reply.send(render(js, rt, slot, &request));
            }
        }
    }
}

fn render(
    js: &mut JsRuntime,
    rt: &tokio::runtime::Runtime,
    slot: u32,
    request: &str,
) -> Result<RenderReply, RuntimeError> {
    eval_to_string(js, format!("globalThis.__hotserve.render({slot}, {request})"))?;

    rt.block_on(js.run_event_loop(Default::default()))
        .map_err(|e| RuntimeError::from_js(&e))?;

    let collected = eval_to_string(js, "globalThis.__hotserve.collect()".to_string())?;
    serde_json::from_str(&collected).map_err(|e| RuntimeError::Protocol(e.to_string()))
}

fn eval_to_string(js: &mut JsRuntime, code: String) -> Result<String, RuntimeError> {
    let value = js
        .execute_script("<hotserve>", code)
        .map_err(|e| RuntimeError::from_js(&e))?;
    let scope = &mut js.handle_scope();
    let local = v8::Local::new(scope, value);
    Ok(local.to_rust_string_lossy(scope))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_value_is_adopted() {
        let (isolate, slot) = Isolate::spawn("/out/a.js", "40 + 2".to_string()).unwrap();
        let value = isolate
            .eval(format!("String(globalThis.__hotserve.isCallable({slot}))"))
            .unwrap();
        assert_eq!(value, "false");
    }

    #[test]
    fn test_module_exports_is_the_fallback() {
        let source = "(() => { module.exports = function factory() {}; })();";
        let (isolate, slot) = Isolate::spawn("/out/a.js", source.to_string()).unwrap();
        let value = isolate
            .eval(format!("String(globalThis.__hotserve.isCallable({slot}))"))
            .unwrap();
        assert_eq!(value, "true");
    }

    #[test]
    fn test_top_level_throw_fails_spawn() {
        let err = Isolate::spawn("/out/a.js", "throw new Error('boom at load')".to_string())
            .err()
            .unwrap();
        match err {
            RuntimeError::JavaScript { message, .. } => assert!(message.contains("boom at load")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stack_frames_name_the_bundle_file() {
        let source = "function render() { throw new Error('boom'); }\nrender()";
        let err = Isolate::spawn("/out/pages/main.js", source.to_string())
            .err()
            .unwrap();
        match err {
            RuntimeError::JavaScript { stack, .. } => {
                let stack = stack.unwrap();
                assert!(stack.contains("/out/pages/main.js:1:"), "{stack}");
                assert!(!stack.contains(BUNDLE_SCRIPT_NAME), "{stack}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_isolates_do_not_share_globals() {
        let source = "globalThis.counter = (globalThis.counter || 0) + 1; counter";
        let (first, a) = Isolate::spawn("/out/a.js", source.to_string()).unwrap();
        let (second, b) = Isolate::spawn("/out/a.js", source.to_string()).unwrap();
        assert_eq!(first.eval("String(globalThis.counter)".to_string()).unwrap(), "1");
        assert_eq!(second.eval("String(globalThis.counter)".to_string()).unwrap(), "1");
        assert_eq!((a, b), (0, 0));
    }

    #[test]
    fn test_host_module_system_is_absent() {
        let (isolate, _) = Isolate::spawn("/out/a.js", "0".to_string()).unwrap();
        assert_eq!(isolate.eval("typeof require".to_string()).unwrap(), "undefined");
        assert_eq!(isolate.eval("typeof process".to_string()).unwrap(), "undefined");
    }

    #[test]
    fn test_console_is_routed_to_the_host() {
        let (isolate, _) =
            Isolate::spawn("/out/a.js", "console.log('hello', { a: 1 }); 0".to_string()).unwrap();
        assert_eq!(isolate.eval("typeof console.warn".to_string()).unwrap(), "function");
    }
}
