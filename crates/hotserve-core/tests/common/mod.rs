//! A scripted module loader for bridge tests.
//!
//! Bundle "source" is a tiny prefix language instead of JavaScript:
//!
//! | source            | evaluates to                                        |
//! |-------------------|-----------------------------------------------------|
//! | `number`          | a non-callable value                                |
//! | `esm:<rest>`      | a module namespace whose default is `<rest>`        |
//! | `factory:<rest>`  | a function returning `<rest>` when called           |
//! | `factory-throws:<msg>` | a function that throws `<msg>` when called     |
//! | `end:<body>`      | a renderer ending the response with `<body>`        |
//! | `options`         | a renderer echoing the factory's options as JSON    |
//! | `url`             | a renderer echoing the request URL                  |
//! | `pass`            | a renderer calling `next()`                         |
//! | `next-error:<msg>`| a renderer calling `next(err)`                      |
//! | `throw:<msg>`     | a renderer that throws                              |

#![allow(dead_code)]

use hotserve_core::{
    ExportedValue, LoadError, MemoryFileSystem, ModuleLoader, Next, NextError, OutputFileSystem,
    RenderError, RenderFunction, RenderRequest, RenderResponse,
};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Scripted {
    Number,
    Module(Box<Scripted>),
    Factory(Box<Scripted>),
    FactoryThrows(String),
    End(String),
    Options,
    Url,
    Pass,
    NextError(String),
    Throw(String),
}

impl Scripted {
    pub fn parse(source: &str) -> Self {
        let source = source.trim();
        if let Some(rest) = source.strip_prefix("esm:") {
            Self::Module(Box::new(Self::parse(rest)))
        } else if let Some(rest) = source.strip_prefix("factory-throws:") {
            Self::FactoryThrows(rest.to_string())
        } else if let Some(rest) = source.strip_prefix("factory:") {
            Self::Factory(Box::new(Self::parse(rest)))
        } else if let Some(rest) = source.strip_prefix("end:") {
            Self::End(rest.to_string())
        } else if let Some(rest) = source.strip_prefix("next-error:") {
            Self::NextError(rest.to_string())
        } else if let Some(rest) = source.strip_prefix("throw:") {
            Self::Throw(rest.to_string())
        } else {
            match source {
                "options" => Self::Options,
                "url" => Self::Url,
                "pass" => Self::Pass,
                _ => Self::Number,
            }
        }
    }
}

struct ScriptedRenderer {
    kind: Scripted,
    options: serde_json::Value,
}

impl RenderFunction for ScriptedRenderer {
    fn render(&self, req: &RenderRequest, res: &mut RenderResponse) -> Result<Next, RenderError> {
        match &self.kind {
            Scripted::End(body) => {
                res.end(body);
                Ok(Next::Handled)
            }
            Scripted::Options => {
                res.end(self.options.to_string());
                Ok(Next::Handled)
            }
            Scripted::Url => {
                res.end(&req.url);
                Ok(Next::Handled)
            }
            Scripted::Pass => Ok(Next::Pass),
            Scripted::NextError(message) => Ok(Next::Error(NextError::Renderer {
                message: message.clone(),
                stack: None,
            })),
            Scripted::Throw(message) => Err(RenderError::Threw {
                message: message.clone(),
                stack: None,
            }),
            other => panic!("{other:?} is not a renderer"),
        }
    }
}

/// A value paired with the options its factory was invoked with.
#[derive(Debug, Clone)]
pub struct ScriptedValue {
    kind: Scripted,
    options: serde_json::Value,
}

impl ExportedValue for ScriptedValue {
    fn es_module_default(&self) -> Option<Self> {
        match &self.kind {
            Scripted::Module(inner) => Some(Self {
                kind: (**inner).clone(),
                options: self.options.clone(),
            }),
            _ => None,
        }
    }

    fn is_callable(&self) -> bool {
        !matches!(self.kind, Scripted::Number | Scripted::Module(_))
    }

    fn call(&self, argument: &serde_json::Value) -> Result<Self, LoadError> {
        match &self.kind {
            Scripted::Factory(inner) => Ok(Self {
                kind: (**inner).clone(),
                options: argument.clone(),
            }),
            Scripted::FactoryThrows(message) => Err(LoadError::Evaluate {
                message: message.clone(),
                stack: None,
            }),
            _ => Ok(Self {
                kind: Scripted::Number,
                options: argument.clone(),
            }),
        }
    }

    fn into_render_function(self) -> Arc<dyn RenderFunction> {
        Arc::new(ScriptedRenderer {
            kind: self.kind,
            options: self.options,
        })
    }
}

/// Loader that parses bundle text with [`Scripted::parse`] and counts evaluations.
#[derive(Clone, Default)]
pub struct ScriptedLoader {
    evaluations: Arc<AtomicUsize>,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

impl ModuleLoader for ScriptedLoader {
    type Value = ScriptedValue;

    fn evaluate(&self, _filename: &Path, source: &str) -> Result<ScriptedValue, LoadError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedValue {
            kind: Scripted::parse(source),
            options: serde_json::Value::Null,
        })
    }
}

/// Output filesystem over a [`MemoryFileSystem`] that counts reads.
#[derive(Clone, Default)]
pub struct CountingFileSystem {
    inner: Arc<MemoryFileSystem>,
    reads: Arc<AtomicUsize>,
}

impl CountingFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> &MemoryFileSystem {
        &self.inner
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl OutputFileSystem for CountingFileSystem {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(path)
    }
}
