//! Readiness gate
//!
//! Every operation on an identity or session first needs the handle's remote
//! object. The gate registers that object lazily, at most one request at a
//! time, and parks the operations that arrive meanwhile. When the daemon
//! answers, every parked continuation is invoked with the same outcome, in
//! the order the operations were issued.
//!
//! The outcome is sticky. A later operation reuses the bound object, or gets
//! the same registration error, until the remote side tears the object down
//! and the owner calls [`ReadinessGate::reset`].

use crate::errors::{Result, SignonError};
use crate::runtime::{Cancellable, TaskSpawner};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Deferred operation waiting for the registration outcome
pub type Continuation<B> = Box<dyn FnOnce(Result<B>) + Send + 'static>;

/// A live binding to a remote object
pub trait RemoteBinding: Clone + Send + Sync + 'static {
    /// Disconnect the observers this binding installed
    fn detach(&self);
}

enum GateState<B> {
    Unregistered,
    Pending {
        generation: u64,
        waiters: VecDeque<Continuation<B>>,
    },
    Ready(Result<B>),
}

struct GateInner<B> {
    state: GateState<B>,
    /// Bumped for every registration attempt and every reset, so an answer
    /// to a superseded attempt can be recognised.
    generation: u64,
    retries_left: u32,
}

/// Outcome of feeding a registration answer into the gate
pub enum Completion<B> {
    /// The outcome was installed and every waiter notified
    Delivered,
    /// A transient failure was absorbed; register again with this generation
    Retry(u64),
    /// The answer belongs to a superseded attempt and was not installed
    Stale(Result<B>),
}

/// Per-handle registration state machine
pub struct ReadinessGate<B> {
    inner: Mutex<GateInner<B>>,
}

impl<B: Clone> ReadinessGate<B> {
    /// Create an unregistered gate allowing `transient_retries` automatic
    /// retries over its lifetime
    pub fn new(transient_retries: u32) -> Self {
        Self {
            inner: Mutex::new(GateInner {
                state: GateState::Unregistered,
                generation: 0,
                retries_left: transient_retries,
            }),
        }
    }

    /// Hand `continuation` to the gate.
    ///
    /// Runs it immediately when the outcome is known, parks it otherwise.
    /// Returns the generation of a registration the caller must now start.
    pub fn request(&self, continuation: Continuation<B>) -> Option<u64> {
        let mut inner = self.inner.lock();

        if let GateState::Ready(outcome) = &inner.state {
            let outcome = outcome.clone();
            drop(inner);
            continuation(outcome);
            return None;
        }

        if let GateState::Pending { waiters, .. } = &mut inner.state {
            waiters.push_back(continuation);
            return None;
        }

        inner.generation += 1;
        let generation = inner.generation;
        inner.state = GateState::Pending {
            generation,
            waiters: VecDeque::from([continuation]),
        };
        Some(generation)
    }

    /// Feed the answer of registration attempt `generation` into the gate
    pub fn complete(&self, generation: u64, outcome: Result<B>) -> Completion<B> {
        let mut inner = self.inner.lock();

        let current = matches!(
            inner.state,
            GateState::Pending { generation: pending, .. } if pending == generation
        );
        if !current {
            return Completion::Stale(outcome);
        }

        if let Err(err) = &outcome {
            if err.is_transient() && inner.retries_left > 0 {
                inner.retries_left -= 1;
                inner.generation += 1;
                let next = inner.generation;
                if let GateState::Pending { generation, .. } = &mut inner.state {
                    *generation = next;
                }
                return Completion::Retry(next);
            }
        }

        let previous = std::mem::replace(&mut inner.state, GateState::Ready(outcome.clone()));
        drop(inner);

        if let GateState::Pending { waiters, .. } = previous {
            for waiter in waiters {
                waiter(outcome.clone());
            }
        }
        Completion::Delivered
    }

    /// Return to `Unregistered`.
    ///
    /// Continuations parked on an in-flight attempt fail with
    /// [`SignonError::Runtime`]; that attempt's answer will be stale. The
    /// previous binding, if any, is handed back for detaching.
    pub fn reset(&self) -> Option<B> {
        self.reset_with(SignonError::runtime(
            "registration superseded by remote teardown",
        ))
    }

    /// Like [`ReadinessGate::reset`], failing parked continuations with `err`
    pub fn reset_with(&self, err: SignonError) -> Option<B> {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        let previous = std::mem::replace(&mut inner.state, GateState::Unregistered);
        drop(inner);

        match previous {
            GateState::Ready(Ok(binding)) => Some(binding),
            GateState::Ready(Err(_)) | GateState::Unregistered => None,
            GateState::Pending { waiters, .. } => {
                for waiter in waiters {
                    waiter(Err(err.clone()));
                }
                None
            }
        }
    }

    /// The bound remote object, if registration succeeded
    pub fn binding(&self) -> Option<B> {
        match &self.inner.lock().state {
            GateState::Ready(Ok(binding)) => Some(binding.clone()),
            _ => None,
        }
    }

    /// The sticky registration error, if registration failed
    pub fn last_error(&self) -> Option<SignonError> {
        match &self.inner.lock().state {
            GateState::Ready(Err(err)) => Some(err.clone()),
            _ => None,
        }
    }

    #[cfg(test)]
    fn is_pending(&self) -> bool {
        matches!(self.inner.lock().state, GateState::Pending { .. })
    }

    /// Whether `generation` is still the attempt in flight
    pub fn is_current(&self, generation: u64) -> bool {
        matches!(
            self.inner.lock().state,
            GateState::Pending { generation: pending, .. } if pending == generation
        )
    }
}

/// A handle whose remote counterpart is registered through a gate
pub trait Registrar: Send + Sync + Sized + 'static {
    type Binding: RemoteBinding;

    fn gate(&self) -> &ReadinessGate<Self::Binding>;

    fn spawner(&self) -> &Arc<dyn TaskSpawner>;

    /// Token cancelled when the handle goes away
    fn cancellable(&self) -> &Cancellable;

    /// Short description for log events
    fn describe(&self) -> String;

    /// Build the registration request for attempt `generation`.
    ///
    /// The future must not keep the handle alive.
    fn register(self: &Arc<Self>, generation: u64) -> BoxFuture<'static, Result<Self::Binding>>;
}

/// Run `continuation` once `owner`'s remote object is known
pub fn call_when_ready<R: Registrar>(owner: &Arc<R>, continuation: Continuation<R::Binding>) {
    if let Some(generation) = owner.gate().request(continuation) {
        debug!(handle = %owner.describe(), generation, "Registration requested");
        spawn_registration(owner, generation);
    }
}

/// Await `owner`'s registration outcome
pub async fn when_ready<R: Registrar>(owner: &Arc<R>) -> Result<R::Binding> {
    let (tx, rx) = oneshot::channel();
    call_when_ready(
        owner,
        Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }),
    );
    rx.await.map_err(|_| SignonError::Cancelled)?
}

fn spawn_registration<R: Registrar>(owner: &Arc<R>, generation: u64) {
    let weak = Arc::downgrade(owner);
    let request = owner.register(generation);
    let token = owner.cancellable().clone();

    owner.spawner().spawn(Box::pin(async move {
        let outcome = token.run(request).await;

        let Some(owner) = weak.upgrade() else {
            if let Ok(binding) = outcome {
                binding.detach();
            }
            return;
        };

        match owner.gate().complete(generation, outcome) {
            Completion::Delivered => {
                debug!(handle = %owner.describe(), generation, "Registration completed");
            }
            Completion::Retry(next) => {
                debug!(
                    handle = %owner.describe(),
                    generation = next,
                    "Service not yet available, retrying registration"
                );
                spawn_registration(&owner, next);
            }
            Completion::Stale(outcome) => {
                warn!(handle = %owner.describe(), generation, "Discarding stale registration");
                if let Ok(binding) = outcome {
                    binding.detach();
                }
            }
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TokioSpawner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Token(u32);

    impl RemoteBinding for Token {
        fn detach(&self) {}
    }

    fn recorder(log: &Arc<Mutex<Vec<(usize, Result<Token>)>>>, n: usize) -> Continuation<Token> {
        let log = log.clone();
        Box::new(move |outcome| log.lock().push((n, outcome)))
    }

    #[test]
    fn test_waiters_drain_in_order_once() {
        let gate = ReadinessGate::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));

        let generation = gate.request(recorder(&log, 0)).unwrap();
        for n in 1..5 {
            assert_eq!(gate.request(recorder(&log, n)), None);
        }
        assert!(log.lock().is_empty());

        assert!(matches!(
            gate.complete(generation, Ok(Token(1))),
            Completion::Delivered
        ));

        let log = log.lock();
        let order: Vec<usize> = log.iter().map(|(n, _)| *n).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(log.iter().all(|(_, outcome)| outcome == &Ok(Token(1))));
    }

    #[test]
    fn test_ready_runs_immediately() {
        let gate = ReadinessGate::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let generation = gate.request(recorder(&log, 0)).unwrap();
        gate.complete(generation, Ok(Token(3)));

        assert_eq!(gate.request(recorder(&log, 1)), None);
        assert_eq!(log.lock().len(), 2);
        assert_eq!(gate.binding(), Some(Token(3)));
    }

    #[test]
    fn test_error_is_sticky() {
        let gate = ReadinessGate::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let generation = gate.request(recorder(&log, 0)).unwrap();
        gate.complete(generation, Err(SignonError::permission_denied("acl")));

        // no new registration is requested
        assert_eq!(gate.request(recorder(&log, 1)), None);
        let log = log.lock();
        assert_eq!(log[1].1, Err(SignonError::permission_denied("acl")));
        assert_eq!(
            gate.last_error(),
            Some(SignonError::permission_denied("acl"))
        );
    }

    #[test]
    fn test_transient_error_retried_once() {
        let gate = ReadinessGate::new(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = gate.request(recorder(&log, 0)).unwrap();

        let Completion::Retry(second) =
            gate.complete(first, Err(SignonError::service_unavailable("not yet")))
        else {
            panic!("expected a retry");
        };
        assert!(log.lock().is_empty());
        assert!(gate.is_pending());
        assert!(!gate.is_current(first));

        // retry budget is spent
        assert!(matches!(
            gate.complete(second, Err(SignonError::service_unavailable("still not"))),
            Completion::Delivered
        ));
        assert!(log.lock()[0].1.as_ref().unwrap_err().is_transient());
    }

    #[test]
    fn test_non_transient_error_not_retried() {
        let gate = ReadinessGate::<Token>::new(1);
        let generation = gate.request(Box::new(|_| {})).unwrap();
        assert!(matches!(
            gate.complete(generation, Err(SignonError::not_found("gone"))),
            Completion::Delivered
        ));
    }

    #[test]
    fn test_reset_fails_waiters_and_discards_late_answer() {
        let gate = ReadinessGate::new(0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let stale = gate.request(recorder(&log, 0)).unwrap();

        assert_eq!(gate.reset(), None);
        assert!(matches!(log.lock()[0].1, Err(SignonError::Runtime { .. })));

        let fresh = gate.request(recorder(&log, 1)).unwrap();
        assert_ne!(fresh, stale);
        assert!(matches!(
            gate.complete(stale, Ok(Token(9))),
            Completion::Stale(Ok(Token(9)))
        ));
        assert!(gate.is_pending());

        gate.complete(fresh, Ok(Token(10)));
        assert_eq!(log.lock()[1].1, Ok(Token(10)));
    }

    #[test]
    fn test_reset_returns_binding() {
        let gate = ReadinessGate::new(0);
        let generation = gate.request(Box::new(|_| {})).unwrap();
        gate.complete(generation, Ok(Token(4)));

        assert_eq!(gate.reset(), Some(Token(4)));
        assert_eq!(gate.binding(), None);
        assert!(gate.request(Box::new(|_| {})).is_some());
    }

    struct Stub {
        gate: ReadinessGate<Token>,
        spawner: Arc<dyn TaskSpawner>,
        token: Cancellable,
        attempts: AtomicUsize,
        transient_failures: usize,
    }

    impl Registrar for Stub {
        type Binding = Token;

        fn gate(&self) -> &ReadinessGate<Token> {
            &self.gate
        }

        fn spawner(&self) -> &Arc<dyn TaskSpawner> {
            &self.spawner
        }

        fn cancellable(&self) -> &Cancellable {
            &self.token
        }

        fn describe(&self) -> String {
            "stub".to_string()
        }

        fn register(self: &Arc<Self>, _generation: u64) -> BoxFuture<'static, Result<Token>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            let fail = attempt < self.transient_failures;
            Box::pin(async move {
                tokio::task::yield_now().await;
                if fail {
                    Err(SignonError::service_unavailable("starting"))
                } else {
                    Ok(Token(attempt as u32))
                }
            })
        }
    }

    fn stub(transient_failures: usize) -> Arc<Stub> {
        Arc::new(Stub {
            gate: ReadinessGate::new(1),
            spawner: Arc::new(TokioSpawner::try_current().unwrap()),
            token: Cancellable::new(),
            attempts: AtomicUsize::new(0),
            transient_failures,
        })
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_one_registration() {
        let owner = stub(0);
        let (a, b, c) = tokio::join!(when_ready(&owner), when_ready(&owner), when_ready(&owner));
        assert_eq!(a, Ok(Token(0)));
        assert_eq!(b, Ok(Token(0)));
        assert_eq!(c, Ok(Token(0)));
        assert_eq!(owner.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registration_retried_transparently() {
        let owner = stub(1);
        assert_eq!(when_ready(&owner).await, Ok(Token(1)));
        assert_eq!(owner.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_transient_failure_surfaces() {
        let owner = stub(2);
        let err = when_ready(&owner).await.unwrap_err();
        assert!(err.is_transient());

        // sticky, and the retry budget is not refilled
        assert!(when_ready(&owner).await.unwrap_err().is_transient());
        assert_eq!(owner.attempts.load(Ordering::SeqCst), 2);
    }
}
