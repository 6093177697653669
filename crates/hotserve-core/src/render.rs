//! The request/response shape render functions operate on.

use crate::error::{NextError, RenderError};
use serde::{Deserialize, Serialize};

/// An incoming HTTP request, as seen by a render function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub method: String,
    /// Path and query, e.g. `/posts?page=2`.
    pub url: String,
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
}

impl RenderRequest {
    /// A bodiless `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// First header value matching `name`, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// The response a render function writes into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Set once the render function ends the response.
    pub finished: bool,
}

impl Default for RenderResponse {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
            finished: false,
        }
    }
}

impl RenderResponse {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    /// Set a header, replacing any existing value with the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn write(&mut self, chunk: impl AsRef<[u8]>) -> &mut Self {
        self.body.extend_from_slice(chunk.as_ref());
        self
    }

    /// Write a final chunk and mark the response finished.
    pub fn end(&mut self, chunk: impl AsRef<[u8]>) {
        self.write(chunk);
        self.finished = true;
    }

    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// How a render function left the request.
#[derive(Debug, Clone)]
pub enum Next {
    /// The response was written.
    Handled,
    /// The continuation was called with no argument: pass to the next handler.
    Pass,
    /// The continuation was called with an error: hand it to error handling.
    Error(NextError),
}

impl Next {
    #[must_use]
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled)
    }
}

/// A page renderer sourced from the server bundle.
///
/// An `Err` return models an exception thrown out of the renderer. Callers
/// such as [`RenderBridge`](crate::RenderBridge) pass it through untouched.
pub trait RenderFunction: Send + Sync {
    fn render(&self, req: &RenderRequest, res: &mut RenderResponse) -> Result<Next, RenderError>;
}

impl<F> RenderFunction for F
where
    F: Fn(&RenderRequest, &mut RenderResponse) -> Result<Next, RenderError> + Send + Sync,
{
    fn render(&self, req: &RenderRequest, res: &mut RenderResponse) -> Result<Next, RenderError> {
        self(req, res)
    }
}
