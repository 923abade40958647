//! Ctx - ストア呼び出しのスコープ
//!
//! すべての `TaskStore` / `ExecutionStore` 呼び出しは呼び出し側が用意した
//! `Ctx` を受け取ります。永続化の実装はここからトランザクションや
//! リクエスト単位の情報を取り出します。

use tracing::Span;

/// Caller-supplied scope for store operations.
#[derive(Debug, Clone)]
pub struct Ctx {
    request_id: Option<String>,
    span: Span,
}

impl Ctx {
    /// Scope for work that is not tied to an inbound request.
    pub fn background() -> Self {
        Self {
            request_id: None,
            span: Span::current(),
        }
    }

    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        let span = tracing::debug_span!("request", request_id = %request_id);
        Self {
            request_id: Some(request_id),
            span,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Span store implementations enter while serving this call.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for Ctx {
    fn default() -> Self {
        Self::background()
    }
}
