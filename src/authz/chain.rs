//! Ordered policy-chain construction and short-circuit execution.
//!
//! `call(name, args)` appends a command, `or()` / `and()` retroactively set
//! the combinator of the most recently appended command, and the chain is
//! directly awaitable:
//!
//! ```ignore
//! PolicyChain::new(&registry, &ctx)
//!     .call("hasId", vec![json!("params.userId")])?
//!     .or()
//!     .call("hasAuthority", vec![json!("ADMIN")])?
//!     .await
//! ```

use std::future::{Future, IntoFuture};
use std::pin::Pin;

use serde_json::Value;

use crate::authz::context::RequestContext;
use crate::authz::errors::AuthzError;
use crate::authz::handlers::HandlerRegistry;

/// Whether a command participates in an OR-run. A property of the command
/// itself, not of the link between two commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combinator {
    #[default]
    None,
    Or,
}

#[derive(Debug, Clone)]
pub struct PolicyCommand {
    pub handler_name: String,
    pub args: Vec<Value>,
    pub combinator: Combinator,
}

pub struct PolicyChain<'a> {
    registry: &'a HandlerRegistry,
    ctx: &'a RequestContext,
    commands: Vec<PolicyCommand>,
}

impl std::fmt::Debug for PolicyChain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyChain")
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

impl<'a> PolicyChain<'a> {
    pub fn new(registry: &'a HandlerRegistry, ctx: &'a RequestContext) -> Self {
        Self {
            registry,
            ctx,
            commands: Vec::new(),
        }
    }

    /// Append a command naming a registered handler. An unknown name is a
    /// configuration mistake and fails immediately, not at execution time.
    pub fn call(mut self, handler_name: &str, args: Vec<Value>) -> Result<Self, AuthzError> {
        if !self.registry.contains(handler_name) {
            return Err(AuthzError::UnknownHandler(handler_name.to_string()));
        }
        self.commands.push(PolicyCommand {
            handler_name: handler_name.to_string(),
            args,
            combinator: Combinator::None,
        });
        Ok(self)
    }

    /// Mark the most recently appended command as a plain AND step.
    pub fn and(mut self) -> Self {
        if let Some(last) = self.commands.last_mut() {
            last.combinator = Combinator::None;
        }
        self
    }

    /// Mark the most recently appended command as part of an OR-run.
    pub fn or(mut self) -> Self {
        if let Some(last) = self.commands.last_mut() {
            last.combinator = Combinator::Or;
        }
        self
    }

    pub fn commands(&self) -> &[PolicyCommand] {
        &self.commands
    }

    pub async fn execute(self) -> Result<(), AuthzError> {
        execute_commands(self.registry, self.ctx, &self.commands).await
    }
}

impl<'a> IntoFuture for PolicyChain<'a> {
    type Output = Result<(), AuthzError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send + 'a>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.execute())
    }
}

/// Run the commands in order with short-circuit AND/OR semantics.
///
/// `pass` records that the current OR-run already succeeded: while set,
/// commands are skipped without being invoked, and the first non-OR command
/// encountered closes the run. That closing command is itself skipped; the
/// combinator is a per-command flag, so a non-OR command seen while the flag
/// is set only resets it. While unset, an OR command that fails with
/// Forbidden is swallowed so the next branch can try; any other failure, or
/// any failure of a non-OR command, aborts the whole chain.
pub async fn execute_commands(
    registry: &HandlerRegistry,
    ctx: &RequestContext,
    commands: &[PolicyCommand],
) -> Result<(), AuthzError> {
    let mut pass = false;

    for cmd in commands {
        if pass {
            if cmd.combinator != Combinator::Or {
                pass = false;
            }
            continue;
        }

        let handler = registry
            .get(&cmd.handler_name)
            .ok_or_else(|| AuthzError::UnknownHandler(cmd.handler_name.clone()))?;

        if cmd.combinator == Combinator::Or {
            match handler.check(ctx, &cmd.args).await {
                Ok(()) => pass = true,
                Err(AuthzError::Forbidden) => {}
                Err(e) => return Err(e),
            }
        } else {
            handler.check(ctx, &cmd.args).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::acl::{AclEntryLoader, AclEntryRow, AclResolver};
    use crate::authz::handlers::PolicyHandler;
    use crate::authz::models::ModelRegistry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct EmptyLoader;

    #[async_trait]
    impl AclEntryLoader for EmptyLoader {
        async fn load_entries(
            &self,
            _mask: i32,
            _type_name: &str,
            _object_id: Option<i64>,
        ) -> Result<Vec<AclEntryRow>, AuthzError> {
            Ok(vec![])
        }
    }

    async fn context() -> RequestContext {
        let db = sea_orm::Database::connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory db");
        RequestContext::new(
            db,
            Arc::new(AclResolver::new(Arc::new(EmptyLoader))),
            Arc::new(ModelRegistry::new()),
        )
    }

    /// Records invocations and produces a fixed outcome.
    struct Probe {
        calls: Arc<AtomicUsize>,
        outcome: Option<AuthzError>,
    }

    impl Probe {
        fn passing(calls: &Arc<AtomicUsize>) -> Arc<Self> {
            Arc::new(Self {
                calls: calls.clone(),
                outcome: None,
            })
        }

        fn denying(calls: &Arc<AtomicUsize>) -> Arc<Self> {
            Arc::new(Self {
                calls: calls.clone(),
                outcome: Some(AuthzError::Forbidden),
            })
        }

        fn failing(calls: &Arc<AtomicUsize>) -> Arc<Self> {
            Arc::new(Self {
                calls: calls.clone(),
                outcome: Some(AuthzError::InvalidExpression("boom".into())),
            })
        }
    }

    #[async_trait]
    impl PolicyHandler for Probe {
        async fn check(&self, _ctx: &RequestContext, _args: &[Value]) -> Result<(), AuthzError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                None => Ok(()),
                Some(AuthzError::Forbidden) => Err(AuthzError::Forbidden),
                Some(_) => Err(AuthzError::InvalidExpression("boom".into())),
            }
        }
    }

    fn registry_with(probes: &[(&str, Arc<Probe>)]) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        for (name, probe) in probes {
            registry.register(name, probe.clone());
        }
        registry
    }

    #[tokio::test]
    async fn test_and_chain_all_pass() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(&[
            ("a", Probe::passing(&calls)),
            ("b", Probe::passing(&calls)),
        ]);
        let ctx = context().await;

        let outcome = PolicyChain::new(&registry, &ctx)
            .call("a", vec![])
            .unwrap()
            .and()
            .call("b", vec![])
            .unwrap()
            .await;

        assert!(outcome.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_and_chain_stops_at_first_denial() {
        let calls = Arc::new(AtomicUsize::new(0));
        let later = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(&[
            ("a", Probe::denying(&calls)),
            ("b", Probe::passing(&later)),
        ]);
        let ctx = context().await;

        let err = PolicyChain::new(&registry, &ctx)
            .call("a", vec![])
            .unwrap()
            .call("b", vec![])
            .unwrap()
            .await
            .unwrap_err();

        assert!(matches!(err, AuthzError::Forbidden));
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_or_first_branch_denied_second_passes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(&[
            ("a", Probe::denying(&calls)),
            ("b", Probe::passing(&calls)),
        ]);
        let ctx = context().await;

        // a.or.b: `or` retroactively marks `a`; `b` stays a plain command.
        let outcome = PolicyChain::new(&registry, &ctx)
            .call("a", vec![])
            .unwrap()
            .or()
            .call("b", vec![])
            .unwrap()
            .await;

        assert!(outcome.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_or_both_branches_denied() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(&[
            ("a", Probe::denying(&calls)),
            ("b", Probe::denying(&calls)),
        ]);
        let ctx = context().await;

        // The trailing non-OR command denies and nothing remains to rescue it.
        let err = PolicyChain::new(&registry, &ctx)
            .call("a", vec![])
            .unwrap()
            .or()
            .call("b", vec![])
            .unwrap()
            .await
            .unwrap_err();

        assert!(matches!(err, AuthzError::Forbidden));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_or_skips_rest_of_run_after_success() {
        let first = Arc::new(AtomicUsize::new(0));
        let rest = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(&[
            ("a", Probe::passing(&first)),
            ("b", Probe::passing(&rest)),
            ("c", Probe::denying(&rest)),
        ]);
        let ctx = context().await;

        let outcome = PolicyChain::new(&registry, &ctx)
            .call("a", vec![])
            .unwrap()
            .or()
            .call("b", vec![])
            .unwrap()
            .or()
            .call("c", vec![])
            .unwrap()
            .or()
            .await;

        assert!(outcome.is_ok());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(rest.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_internal_failure_in_or_branch_aborts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let later = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(&[
            ("a", Probe::failing(&calls)),
            ("b", Probe::passing(&later)),
        ]);
        let ctx = context().await;

        let err = PolicyChain::new(&registry, &ctx)
            .call("a", vec![])
            .unwrap()
            .or()
            .call("b", vec![])
            .unwrap()
            .await
            .unwrap_err();

        assert!(matches!(err, AuthzError::InvalidExpression(_)));
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_passed_or_run_skips_following_non_or_command() {
        // Once an OR-run has passed, the very next non-OR command is skipped
        // entirely rather than executed, and the flag resets for the
        // remainder of the chain.
        let or_calls = Arc::new(AtomicUsize::new(0));
        let boundary = Arc::new(AtomicUsize::new(0));
        let tail = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(&[
            ("a", Probe::passing(&or_calls)),
            ("boundary", Probe::denying(&boundary)),
            ("tail", Probe::passing(&tail)),
        ]);
        let ctx = context().await;

        let outcome = PolicyChain::new(&registry, &ctx)
            .call("a", vec![])
            .unwrap()
            .or()
            .call("boundary", vec![])
            .unwrap()
            .call("tail", vec![])
            .unwrap()
            .await;

        // The denying boundary command never ran; the tail ran normally.
        assert!(outcome.is_ok());
        assert_eq!(boundary.load(Ordering::SeqCst), 0);
        assert_eq!(tail.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_handler_fails_fast() {
        let registry = HandlerRegistry::new();
        let ctx = context().await;

        let err = PolicyChain::new(&registry, &ctx)
            .call("noSuchHandler", vec![json!(1)])
            .unwrap_err();
        assert!(matches!(err, AuthzError::UnknownHandler(_)));
    }

    #[tokio::test]
    async fn test_builder_records_combinators() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(&[
            ("a", Probe::passing(&calls)),
            ("b", Probe::passing(&calls)),
        ]);
        let ctx = context().await;

        let chain = PolicyChain::new(&registry, &ctx)
            .call("a", vec![])
            .unwrap()
            .or()
            .call("b", vec![])
            .unwrap();

        let commands = chain.commands();
        assert_eq!(commands[0].combinator, Combinator::Or);
        assert_eq!(commands[1].combinator, Combinator::None);
    }
}
