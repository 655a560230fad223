//! Request logging middleware.
//!
//! Only method, path, status and latency are logged. Headers and bodies may
//! carry device codes or tokens and never reach the log.

use std::time::Instant;

use async_trait::async_trait;
use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result};

/// Middleware that traces every outgoing provider request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogMiddleware;

#[async_trait]
impl Middleware for RequestLogMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let method = req.method().clone();
        let path = req.url().path().to_string();
        let started = Instant::now();

        let result = next.run(req, extensions).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &result {
            Ok(response) => tracing::debug!(
                %method,
                path = %path,
                status = response.status().as_u16(),
                elapsed_ms,
                "provider request"
            ),
            Err(err) => tracing::warn!(
                %method,
                path = %path,
                elapsed_ms,
                error = %err,
                "provider request failed"
            ),
        }

        result
    }
}
