//! Per-session logging scope.

use std::future::Future;

use tracing::instrument::{Instrument, Instrumented, WithDispatch, WithSubscriber};
use tracing::{dispatcher, Dispatch, Span};

/// Subscriber and span that a session's tasks run under.
///
/// With an injected [`Dispatch`] the session logs only there; otherwise it
/// inherits whatever subscriber is current when a task is bound.
#[derive(Debug, Clone)]
pub struct LogScope {
    dispatch: Option<Dispatch>,
    span: Span,
}

impl LogScope {
    /// Build the scope. `make_span` runs under the injected dispatch so the
    /// span is recorded by the right subscriber.
    pub fn new(dispatch: Option<Dispatch>, make_span: impl FnOnce() -> Span) -> Self {
        let span = match &dispatch {
            Some(dispatch) => dispatcher::with_default(dispatch, make_span),
            None => make_span(),
        };
        Self { dispatch, span }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Run `future` inside the session span under the session subscriber.
    pub fn bind<F: Future>(&self, future: F) -> WithDispatch<Instrumented<F>> {
        let dispatch = self
            .dispatch
            .clone()
            .unwrap_or_else(|| dispatcher::get_default(Dispatch::clone));
        future.instrument(self.span.clone()).with_subscriber(dispatch)
    }
}
