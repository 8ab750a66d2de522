use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::ChunkedError;

/// Cancellation attached to one façade call.
///
/// Every suspending operation of the call goes through [`CancelScope::run`],
/// which races it against the token. The token's waiter is registered only
/// while that race is being polled and is dropped with it, whichever way the
/// race ends.
pub(crate) struct CancelScope<'a> {
    token: Option<&'a CancellationToken>,
}

impl<'a> CancelScope<'a> {
    /// Fails right away if the token has already fired.
    pub(crate) fn enter(token: Option<&'a CancellationToken>) -> Result<Self, ChunkedError> {
        match token {
            Some(token) if token.is_cancelled() => Err(ChunkedError::canceled(None)),
            token => Ok(Self { token }),
        }
    }

    pub(crate) async fn run<T, E, F>(&self, fut: F) -> Result<T, ChunkedError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<ChunkedError>,
    {
        let Some(token) = self.token else {
            return fut.await.map_err(Into::into);
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ChunkedError::canceled(None)),
            res = fut => res.map_err(Into::into),
        }
    }

    /// Reports any failure seen while the token is signaled as a cancellation.
    pub(crate) fn wrap(&self, err: ChunkedError) -> ChunkedError {
        match self.token {
            Some(token) if token.is_cancelled() && !err.is_canceled() => {
                ChunkedError::canceled(Some(err))
            }
            _ => err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_token_runs_to_completion() {
        let scope = CancelScope::enter(None).unwrap();
        let res = scope.run(async { Ok::<_, ChunkedError>(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }

    #[tokio::test]
    async fn already_cancelled_token_fails_on_enter() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            CancelScope::enter(Some(&token)),
            Err(ChunkedError::Canceled { source: None })
        ));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pending_operation() {
        let token = CancellationToken::new();
        let scope = CancelScope::enter(Some(&token)).unwrap();
        let canceller = token.clone();
        let res = scope
            .run(async move {
                canceller.cancel();
                std::future::pending::<Result<(), ChunkedError>>().await
            })
            .await;
        assert!(matches!(res, Err(ChunkedError::Canceled { source: None })));
    }

    #[test]
    fn wrap_replaces_errors_seen_after_cancellation() {
        let token = CancellationToken::new();
        let scope = CancelScope::enter(Some(&token)).unwrap();
        assert!(matches!(
            scope.wrap(ChunkedError::UnexpectedEof),
            ChunkedError::UnexpectedEof
        ));

        token.cancel();
        match scope.wrap(ChunkedError::UnexpectedEof) {
            ChunkedError::Canceled { source: Some(inner) } => {
                assert!(matches!(*inner, ChunkedError::UnexpectedEof))
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
