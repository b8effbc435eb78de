//! # Reconnector
//!
//! Keeps one subscriber connection alive: connect, deliver every inbound message
//! to the handler, and on an unplanned close retry with linear backoff until the
//! retry budget runs out.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::factory::ConnectionFactory;
use super::state::{Decision, ReconnectEvent, ReconnectPolicy, ReconnectState};
use crate::error::ReconnectError;

/// # Reconnector
///
/// Generic over the `ConnectionFactory`, so the same state machine serves every
/// consumer and tests can script connection outcomes.
pub struct Reconnector<F: ConnectionFactory> {
    factory: F,
    policy: ReconnectPolicy,
    observer: Option<mpsc::UnboundedSender<ReconnectEvent>>,
}

impl<F: ConnectionFactory> Reconnector<F> {
    pub fn new(factory: F, policy: ReconnectPolicy) -> Self {
        Self {
            factory,
            policy,
            observer: None,
        }
    }

    /// Reports every transition on `observer`.
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<ReconnectEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn emit(&self, event: ReconnectEvent) {
        if let Some(observer) = &self.observer {
            let _ = observer.send(event);
        }
    }

    fn planned_close(&self) -> Result<(), ReconnectError> {
        self.emit(ReconnectEvent::Closed { planned: true });
        tracing::info!("Subscriber connection closed on request");
        Ok(())
    }

    /// # Run
    ///
    /// Drives the connection until `cancel` fires (planned close, `Ok(())`) or the
    /// retry budget is exhausted (`Err(RetriesExhausted)`).
    ///
    /// ## Workflow:
    /// 1.  **Connect**: A failed handshake counts as an unplanned close.
    /// 2.  **Open**: The attempt counter resets; each inbound message goes to
    ///     `handler` unmodified.
    /// 3.  **Unplanned Close**: The state machine either schedules a retry after
    ///     `(attempt + 1) * base_delay` or goes terminal.
    /// 4.  **Cancellation**: Honoured while connecting, while open and while a
    ///     retry is pending; a pending retry timer is dropped.
    pub async fn run<H>(&self, mut handler: H, cancel: CancellationToken) -> Result<(), ReconnectError>
    where
        H: FnMut(String) + Send,
    {
        let mut state = ReconnectState::new(self.policy);

        loop {
            // --- Phase 1: Connect ---
            self.emit(ReconnectEvent::Connecting {
                attempt: state.attempt(),
            });
            let opened = tokio::select! {
                _ = cancel.cancelled() => return self.planned_close(),
                res = self.factory.open() => res,
            };

            // --- Phase 2: Deliver ---
            match opened {
                Ok(mut inbound) => {
                    state.on_open();
                    self.emit(ReconnectEvent::Open);
                    tracing::info!("Subscriber connection open");

                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return self.planned_close(),
                            msg = inbound.next() => match msg {
                                Some(Ok(text)) => handler(text),
                                Some(Err(e)) => {
                                    tracing::warn!(error = %e, "Subscriber connection error");
                                    break;
                                }
                                None => {
                                    tracing::warn!("Subscriber connection closed by remote host");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Subscriber connection failed");
                }
            }

            // --- Phase 3: Unplanned Close ---
            self.emit(ReconnectEvent::Closed { planned: false });
            match state.on_unplanned_close() {
                Decision::Retry { attempt, delay } => {
                    self.emit(ReconnectEvent::RetryScheduled { attempt, delay });
                    tracing::info!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay = ?delay,
                        "Reconnecting"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return self.planned_close(),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Decision::Terminal { attempts } => {
                    self.emit(ReconnectEvent::Terminal { attempts });
                    tracing::error!(attempts, "Retry budget exhausted, giving up");
                    return Err(ReconnectError::RetriesExhausted { attempts });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::reconnect::factory::InboundStream;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    enum Script {
        Fail,
        /// Opens, yields these messages, then the remote closes.
        Deliver(Vec<&'static str>),
        /// Opens and stays open.
        Hold,
    }

    #[derive(Default)]
    struct ScriptedFactory {
        script: Mutex<VecDeque<Script>>,
        opens: AtomicU32,
    }

    impl ScriptedFactory {
        fn new(script: Vec<Script>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                opens: AtomicU32::new(0),
            }
        }
    }

    impl ConnectionFactory for Arc<ScriptedFactory> {
        async fn open(&self) -> Result<InboundStream, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Script::Fail);
            match next {
                Script::Fail => Err(TransportError::Connect("connection refused".into())),
                Script::Deliver(msgs) => Ok(futures_util::stream::iter(
                    msgs.into_iter().map(|m| Ok(m.to_string())),
                )
                .boxed()),
                Script::Hold => Ok(futures_util::stream::pending().boxed()),
            }
        }
    }

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::new(5, Duration::from_secs(2))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ReconnectEvent>) -> Vec<ReconnectEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    fn retries(events: &[ReconnectEvent]) -> Vec<(u32, u64)> {
        events
            .iter()
            .filter_map(|e| match e {
                ReconnectEvent::RetryScheduled { attempt, delay } => Some((*attempt, delay.as_secs())),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn five_failures_then_terminal() {
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reconnector = Reconnector::new(Arc::clone(&factory), policy()).with_observer(tx);

        let started = tokio::time::Instant::now();
        let res = reconnector.run(|_| {}, CancellationToken::new()).await;

        assert_eq!(res, Err(ReconnectError::RetriesExhausted { attempts: 5 }));
        assert_eq!(factory.opens.load(Ordering::SeqCst), 6);
        assert_eq!(started.elapsed(), Duration::from_secs(2 + 4 + 6 + 8 + 10));

        let events = drain(&mut rx);
        assert_eq!(retries(&events), vec![(1, 2), (2, 4), (3, 6), (4, 8), (5, 10)]);
        assert_eq!(events.last(), Some(&ReconnectEvent::Terminal { attempts: 5 }));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_open_restarts_backoff() {
        let factory = Arc::new(ScriptedFactory::new(vec![
            Script::Fail,
            Script::Fail,
            Script::Deliver(vec!["hello", "world"]),
        ]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reconnector = Reconnector::new(Arc::clone(&factory), policy()).with_observer(tx);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let res = reconnector
            .run(move |m| sink.lock().unwrap().push(m), CancellationToken::new())
            .await;

        assert!(res.is_err());
        assert_eq!(*received.lock().unwrap(), vec!["hello", "world"]);
        assert_eq!(
            retries(&drain(&mut rx)),
            vec![(1, 2), (2, 4), (1, 2), (2, 4), (3, 6), (4, 8), (5, 10)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_pending_retry_is_a_planned_close() {
        let factory = Arc::new(ScriptedFactory::new(vec![Script::Fail]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reconnector = Reconnector::new(Arc::clone(&factory), policy()).with_observer(tx);

        let cancel = CancellationToken::new();
        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { reconnector.run(|_| {}, cancel).await })
        };

        loop {
            match rx.recv().await {
                Some(ReconnectEvent::RetryScheduled { .. }) => break,
                Some(_) => continue,
                None => panic!("reconnector stopped early"),
            }
        }
        cancel.cancel();

        assert_eq!(run.await.unwrap(), Ok(()));
        assert_eq!(factory.opens.load(Ordering::SeqCst), 1);
        assert_eq!(drain(&mut rx), vec![ReconnectEvent::Closed { planned: true }]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_open_does_not_reconnect() {
        let factory = Arc::new(ScriptedFactory::new(vec![Script::Hold]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reconnector = Reconnector::new(Arc::clone(&factory), policy()).with_observer(tx);

        let cancel = CancellationToken::new();
        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { reconnector.run(|_| {}, cancel).await })
        };

        while let Some(event) = rx.recv().await {
            if event == ReconnectEvent::Open {
                break;
            }
        }
        cancel.cancel();

        assert_eq!(run.await.unwrap(), Ok(()));
        let rest = drain(&mut rx);
        assert_eq!(rest, vec![ReconnectEvent::Closed { planned: true }]);
        assert_eq!(factory.opens.load(Ordering::SeqCst), 1);
    }
}
