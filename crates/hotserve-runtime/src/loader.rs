//! [`ModuleLoader`] implementation backed by V8.

use crate::isolate::{Isolate, JsErrorReply, NextReply, RuntimeError};
use hotserve_core::source_map::translate_stack;
use hotserve_core::{
    ExportedValue, LoadError, ModuleLoader, Next, NextError, RenderError, RenderFunction,
    RenderRequest, RenderResponse,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Evaluates each server bundle in a fresh V8 isolate.
#[derive(Debug, Clone, Copy, Default)]
pub struct V8ModuleLoader;

impl V8ModuleLoader {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLoader for V8ModuleLoader {
    type Value = JsExport;

    fn evaluate(&self, filename: &Path, source: &str) -> Result<JsExport, LoadError> {
        let name = filename.display().to_string();
        let (isolate, slot) = Isolate::spawn(&name, source.to_string()).map_err(load_error)?;
        Ok(JsExport {
            isolate: Arc::new(isolate),
            slot,
        })
    }
}

/// A value living in a bundle isolate.
#[derive(Clone)]
pub struct JsExport {
    isolate: Arc<Isolate>,
    slot: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CallReply {
    Slot { slot: u32 },
    Error { error: JsErrorReply },
}

impl JsExport {
    fn sibling(&self, slot: u32) -> Self {
        Self {
            isolate: Arc::clone(&self.isolate),
            slot,
        }
    }
}

impl ExportedValue for JsExport {
    fn es_module_default(&self) -> Option<Self> {
        let reply = self
            .isolate
            .eval(format!(
                "String(globalThis.__hotserve.esModuleDefault({}))",
                self.slot
            ))
            .map_err(|e| debug!(error = %e, "esModule probe failed"))
            .ok()?;
        let slot: i64 = reply.parse().ok()?;
        u32::try_from(slot).ok().map(|slot| self.sibling(slot))
    }

    fn is_callable(&self) -> bool {
        self.isolate
            .eval(format!(
                "String(globalThis.__hotserve.isCallable({}))",
                self.slot
            ))
            .is_ok_and(|reply| reply == "true")
    }

    fn call(&self, argument: &serde_json::Value) -> Result<Self, LoadError> {
        let reply = self
            .isolate
            .eval(format!(
                "globalThis.__hotserve.call({}, {})",
                self.slot, argument
            ))
            .map_err(load_error)?;

        match serde_json::from_str(&reply) {
            Ok(CallReply::Slot { slot }) => Ok(self.sibling(slot)),
            Ok(CallReply::Error { error }) => Err(LoadError::Evaluate {
                message: error.message,
                stack: error.stack.as_deref().map(translate_stack),
            }),
            Err(e) => Err(load_error(RuntimeError::Protocol(e.to_string()))),
        }
    }

    fn into_render_function(self) -> Arc<dyn RenderFunction> {
        Arc::new(JsRenderFunction {
            isolate: self.isolate,
            slot: self.slot,
        })
    }
}

/// A `(req, res, next)` handler living in a bundle isolate.
pub struct JsRenderFunction {
    isolate: Arc<Isolate>,
    slot: u32,
}

impl RenderFunction for JsRenderFunction {
    fn render(&self, req: &RenderRequest, res: &mut RenderResponse) -> Result<Next, RenderError> {
        let reply = self
            .isolate
            .render(self.slot, request_object(req).to_string())
            .map_err(|e| match e {
                RuntimeError::JavaScript { message, stack } => RenderError::Threw {
                    message,
                    stack: stack.as_deref().map(translate_stack),
                },
                other => RenderError::Worker(other.to_string()),
            })?;

        res.set_status(reply.status);
        for (name, value) in reply.headers {
            res.set_header(name, value);
        }
        res.write(reply.body);
        res.finished = reply.finished;

        match reply.next {
            Some(NextReply::Error { error }) => Ok(Next::Error(NextError::Renderer {
                message: error.message,
                stack: error.stack.as_deref().map(translate_stack),
            })),
            Some(NextReply::Pass { .. }) => Ok(Next::Pass),
            None if reply.finished => Ok(Next::Handled),
            None => Err(RenderError::Unfinished {
                url: req.url.clone(),
            }),
        }
    }
}

/// The Node-style `req` object handed to bundle handlers.
fn request_object(req: &RenderRequest) -> serde_json::Value {
    let mut headers = serde_json::Map::new();
    for (name, value) in &req.headers {
        let name = name.to_ascii_lowercase();
        let merged = match headers.get(&name).and_then(serde_json::Value::as_str) {
            Some(existing) => format!("{existing}, {value}"),
            None => value.clone(),
        };
        headers.insert(name, serde_json::Value::String(merged));
    }

    serde_json::json!({
        "method": req.method,
        "url": req.url,
        "headers": headers,
        "body": req.body,
    })
}

fn load_error(err: RuntimeError) -> LoadError {
    match err {
        RuntimeError::JavaScript { message, stack } => LoadError::Evaluate {
            message,
            stack: stack.as_deref().map(translate_stack),
        },
        other => LoadError::Evaluate {
            message: other.to_string(),
            stack: None,
        },
    }
}
