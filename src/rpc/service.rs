//! Command registry and dispatch.
//!
//! `Service<S>` owns the state handlers read from (for the intelligence
//! service, its projections) and a set of named handlers. Lookups arrive
//! here synchronously through the call gateway; state changes do not, they
//! arrive as events.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::Context;
use super::error::HandlerError;
use super::session::Session;

type Guard<S> = Box<dyn Fn(&Context<S>) -> bool + Send + Sync>;
type Handle<S> = Box<dyn Fn(&Context<S>) -> Result<Value, HandlerError> + Send + Sync>;

struct CommandHandler<S> {
    guard: Option<Guard<S>>,
    handle: Handle<S>,
}

/// Routes commands to handler functions.
///
/// ```ignore
/// let service = Service::new(scores)
///     .command_guarded(
///         "risk.score",
///         |ctx| ctx.has_fields(&["account"]),
///         |ctx| {
///             let input = ctx.input::<ScoreInput>()?;
///             let score = ctx.state().score(&input.account)?;
///             Ok(json!({ "score": score }))
///         },
///     );
/// ```
pub struct Service<S> {
    state: S,
    handlers: HashMap<String, CommandHandler<S>>,
}

impl<S: Send + Sync + 'static> Service<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            handlers: HashMap::new(),
        }
    }

    pub fn command<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&Context<S>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.handlers.insert(
            name.to_string(),
            CommandHandler {
                guard: None,
                handle: Box::new(handler),
            },
        );
        self
    }

    /// Register a handler behind a guard. A guard returning `false` rejects
    /// the command with [`HandlerError::GuardRejected`] before the handler runs.
    pub fn command_guarded<G, F>(mut self, name: &str, guard: G, handler: F) -> Self
    where
        G: Fn(&Context<S>) -> bool + Send + Sync + 'static,
        F: Fn(&Context<S>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.handlers.insert(
            name.to_string(),
            CommandHandler {
                guard: Some(Box::new(guard)),
                handle: Box::new(handler),
            },
        );
        self
    }

    pub fn dispatch(
        &self,
        command: &str,
        input: Value,
        session: Session,
    ) -> Result<Value, HandlerError> {
        let handler = self
            .handlers
            .get(command)
            .ok_or_else(|| HandlerError::UnknownCommand(command.to_string()))?;

        let ctx = Context::new(command.to_string(), input, session, &self.state);

        if let Some(guard) = &handler.guard {
            if !guard(&ctx) {
                return Err(HandlerError::GuardRejected(command.to_string()));
            }
        }

        tracing::debug!(command, caller = ctx.session().caller(), "dispatching command");
        (handler.handle)(&ctx)
    }

    /// Dispatch and fold the result into a status and JSON body. Failures
    /// carry `{ "error": "..." }`.
    pub fn dispatch_request(&self, request: &CommandRequest) -> CommandResponse {
        let session = Session::from_map(request.session_variables.clone());
        match self.dispatch(&request.command, request.input.clone(), session) {
            Ok(value) => CommandResponse {
                status: 200,
                body: value,
            },
            Err(e) => {
                let status = e.status_code();
                if status >= 500 {
                    tracing::warn!(command = %request.command, error = %e, "command failed");
                }
                CommandResponse {
                    status,
                    body: serde_json::json!({ "error": e.to_string() }),
                }
            }
        }
    }

    pub fn commands(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    pub fn state(&self) -> &S {
        &self.state
    }
}

/// An inbound command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    pub input: Value,
    #[serde(default)]
    pub session_variables: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// HTTP-style status code.
    pub status: u16,
    pub body: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::session::CALLER;
    use crate::store::StoreError;
    use serde_json::json;
    use std::collections::HashMap as Map;

    struct Scores(Map<&'static str, f64>);

    fn service() -> Service<Scores> {
        let mut scores = Map::new();
        scores.insert("acct-1", 0.12);
        Service::new(Scores(scores)).command_guarded(
            "risk.score",
            |ctx| ctx.has_fields(&["account"]),
            |ctx| {
                let account = ctx.raw_input()["account"].as_str().unwrap_or_default();
                match ctx.state().0.get(account) {
                    Some(score) => Ok(json!({ "account": account, "score": score })),
                    None => Err(HandlerError::NotFound(account.to_string())),
                }
            },
        )
    }

    fn request(command: &str, input: Value) -> CommandRequest {
        CommandRequest {
            command: command.to_string(),
            input,
            session_variables: HashMap::new(),
        }
    }

    #[test]
    fn dispatch_reads_state() {
        let result = service()
            .dispatch("risk.score", json!({ "account": "acct-1" }), Session::new())
            .unwrap();
        assert_eq!(result, json!({ "account": "acct-1", "score": 0.12 }));
    }

    #[test]
    fn unknown_command() {
        let result = service().dispatch("risk.explain", json!({}), Session::new());
        assert!(matches!(result, Err(HandlerError::UnknownCommand(ref s)) if s == "risk.explain"));
    }

    #[test]
    fn guard_rejects_before_handler() {
        let service = Service::new(()).command_guarded(
            "risk.score",
            |ctx| ctx.has_fields(&["account"]),
            |_ctx| panic!("handler should not run"),
        );
        let result = service.dispatch("risk.score", json!({ "wrong": 1 }), Session::new());
        assert!(matches!(result, Err(HandlerError::GuardRejected(ref s)) if s == "risk.score"));
    }

    #[test]
    fn typed_input_decode_failure() {
        #[derive(serde::Deserialize)]
        struct Input {
            _account: String,
        }

        let service = Service::new(()).command("typed", |ctx| {
            let _input = ctx.input::<Input>()?;
            Ok(json!({}))
        });
        let result = service.dispatch("typed", json!({ "account": 1 }), Session::new());
        assert!(matches!(result, Err(HandlerError::DecodeFailed(_))));
    }

    #[test]
    fn dispatch_request_status_codes() {
        let service = service()
            .command("busy", |_| Err(HandlerError::Unavailable("rebuilding".into())))
            .command("broken", |_| Err(StoreError::LockPoisoned("scores").into()));

        let ok = service.dispatch_request(&request("risk.score", json!({ "account": "acct-1" })));
        assert_eq!(ok.status, 200);

        let cases = [
            ("risk.score", json!({ "account": "acct-9" }), 404),
            ("risk.score", json!({}), 400),
            ("nope", json!({}), 404),
            ("busy", json!({}), 503),
            ("broken", json!({}), 500),
        ];
        for (command, input, status) in cases {
            let response = service.dispatch_request(&request(command, input));
            assert_eq!(response.status, status, "{}", command);
            assert!(response.body["error"].is_string());
        }
    }

    #[test]
    fn session_reaches_handler() {
        let service = Service::new(()).command("whoami", |ctx| {
            Ok(json!({ "caller": ctx.session().caller() }))
        });
        let mut req = request("whoami", json!({}));
        req.session_variables
            .insert(CALLER.to_string(), "ledger-service".to_string());
        assert_eq!(
            service.dispatch_request(&req).body,
            json!({ "caller": "ledger-service" })
        );
    }

    #[test]
    fn commands_are_sorted() {
        let service = Service::new(())
            .command("b", |_| Ok(json!({})))
            .command("a", |_| Ok(json!({})));
        assert_eq!(service.commands(), vec!["a", "b"]);
    }
}
