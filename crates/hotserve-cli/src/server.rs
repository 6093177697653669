//! HTTP host for the render bridge.
//!
//! Every request first goes through the bridge; requests the render function
//! passes on fall through to the rest of the router.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next as Continue},
    response::{IntoResponse, Response},
    Router,
};
use hotserve_core::{Next, NextError, RenderBridge, RenderRequest, RenderResponse};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Largest request body forwarded to the render function.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Build the router serving `bridge`.
pub fn router(bridge: Arc<RenderBridge>) -> Router {
    Router::new()
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(bridge, render_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

async fn render_middleware(
    State(bridge): State<Arc<RenderBridge>>,
    request: Request,
    next: Continue,
) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "rejecting request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let render_request = RenderRequest {
        method: parts.method.to_string(),
        url: parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_string(), ToString::to_string),
        headers: parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect(),
        body: String::from_utf8_lossy(&bytes).into_owned(),
    };

    // Render functions run synchronously inside their isolate.
    let dispatched = tokio::task::spawn_blocking(move || {
        let mut response = RenderResponse::new();
        let next = bridge.dispatch(&render_request, &mut response);
        (next, response)
    })
    .await;

    match dispatched {
        Ok((Ok(Next::Handled), response)) => into_http_response(response),
        Ok((Ok(Next::Pass), _)) => next.run(Request::from_parts(parts, Body::from(bytes))).await,
        Ok((Ok(Next::Error(err)), _)) => error_response(&err),
        Ok((Err(err), _)) => {
            error!(error = %err, "render function failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
        Err(join) => {
            error!(error = %join, "render task aborted");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn into_http_response(rendered: RenderResponse) -> Response {
    let status = StatusCode::from_u16(rendered.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(rendered.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in rendered.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %name, "dropping invalid response header"),
        }
    }
    response
}

/// Render an error handed to the continuation the way a development error
/// page would: message first, then the (source-mapped) stack. Build errors
/// report their details as the stack.
fn error_response(err: &NextError) -> Response {
    let mut body = err.to_string();
    if let Some(stack) = err.stack() {
        body.push_str("\n\n");
        body.push_str(stack);
    }

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotserve_core::{
        BridgeConfig, BuildStats, CompilationError, ExportedValue, LoadError, MemoryFileSystem,
        ModuleLoader, RenderError, RenderFunction,
    };
    use std::path::Path;
    use tower::ServiceExt;

    /// Bundles are one word naming the behaviour of their render function.
    struct WordLoader;

    #[derive(Clone)]
    struct Word(String);

    impl ExportedValue for Word {
        fn es_module_default(&self) -> Option<Self> {
            None
        }

        fn is_callable(&self) -> bool {
            true
        }

        fn call(&self, _argument: &serde_json::Value) -> Result<Self, LoadError> {
            Ok(self.clone())
        }

        fn into_render_function(self) -> Arc<dyn RenderFunction> {
            let word = self.0;
            Arc::new(
                move |req: &RenderRequest, res: &mut RenderResponse| match word.as_str() {
                    "pass" => Ok(Next::Pass),
                    "fail" => Ok(Next::Error(NextError::Renderer {
                        message: "boom".into(),
                        stack: Some("at render (src/page.js:1:1)".into()),
                    })),
                    "throw" => Err(RenderError::Threw {
                        message: "thrown".into(),
                        stack: None,
                    }),
                    _ => {
                        res.set_status(201)
                            .set_header("content-type", "text/html")
                            .set_header("x-method", req.method.clone());
                        res.end(format!("{word} {}", req.url));
                        Ok(Next::Handled)
                    }
                },
            )
        }
    }

    impl ModuleLoader for WordLoader {
        type Value = Word;

        fn evaluate(&self, _filename: &Path, source: &str) -> Result<Word, LoadError> {
            Ok(Word(source.trim().to_string()))
        }
    }

    fn bridge_with(source: Option<&str>) -> Arc<RenderBridge> {
        let fs = Arc::new(MemoryFileSystem::new());
        if let Some(source) = source {
            fs.write("/out/main.js", source);
        }
        let bridge = Arc::new(RenderBridge::new(
            "/out",
            fs,
            WordLoader,
            BridgeConfig::default(),
        ));
        if source.is_some() {
            bridge.handle_done(&BuildStats::default().with_chunk("main", "main.js"));
        }
        bridge
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_rendered_response_is_served() {
        let app = router(bridge_with(Some("hello")));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/page?x=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["content-type"], "text/html");
        assert_eq!(response.headers()["x-method"], "POST");
        assert_eq!(body_text(response).await, "hello /page?x=1");
    }

    #[tokio::test]
    async fn test_pass_falls_through_to_router() {
        let app = router(bridge_with(Some("pass")));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_no_build_yet_is_server_error() {
        let app = router(bridge_with(None));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, LoadError::NotReady.to_string());
    }

    #[tokio::test]
    async fn test_build_error_page_shows_message() {
        let bridge = bridge_with(Some("hello"));
        bridge.handle_done(&BuildStats::default().with_error("Module not found: ./missing"));

        let response = router(bridge)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers()["content-type"],
            "text/plain; charset=utf-8"
        );
        assert!(body_text(response).await.contains("Module not found: ./missing"));
    }

    #[tokio::test]
    async fn test_build_error_details_shown_once() {
        let bridge = bridge_with(Some("hello"));
        let mut stats = BuildStats::default();
        stats.errors.push(CompilationError::Detailed {
            message: "Module not found".to_string(),
            module_name: Some("./src/page.js".to_string()),
            details: Some("resolve './missing' in /src".to_string()),
        });
        bridge.handle_done(&stats);

        let response = router(bridge)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_text(response).await;
        assert_eq!(body, "Module not found\n\nresolve './missing' in /src");
        assert_eq!(body.matches("resolve './missing'").count(), 1);
    }

    #[tokio::test]
    async fn test_next_error_includes_stack() {
        let response = router(bridge_with(Some("fail")))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_text(response).await;
        assert!(body.starts_with("boom"));
        assert!(body.contains("src/page.js:1:1"));
    }

    #[tokio::test]
    async fn test_thrown_render_error_is_server_error() {
        let response = router(bridge_with(Some("throw")))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("thrown"));
    }
}
