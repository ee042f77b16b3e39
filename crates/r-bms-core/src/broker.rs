//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Status broker serialising publishes and queries."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Status broker.
//!
//! The broker task is the only owner of the live [`StatusSnapshot`]. Producers
//! and consumers talk to it through a single bounded mailbox; every request
//! carries its own one-shot reply slot, so concurrent queries never see each
//! other's answers and the broker never waits on a slow requester.

use r_bms_codec::StatusSnapshot;
use r_bms_metrics::MonitorMetrics;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Requests waiting in the mailbox. At most one publish is in flight.
const MAILBOX_CAPACITY: usize = 1;

/// Errors returned to broker clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The broker task has stopped.
    #[error("status broker is not running")]
    Closed,
}

#[derive(Debug)]
enum BrokerRequest {
    Publish {
        snapshot: StatusSnapshot,
        ack: oneshot::Sender<()>,
    },
    Query {
        source: &'static str,
        reply: oneshot::Sender<StatusSnapshot>,
    },
}

/// Cloneable client for the broker task.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    mailbox: mpsc::Sender<BrokerRequest>,
}

impl BrokerHandle {
    /// Replace the held snapshot. Resolves once the broker applied it.
    pub async fn publish(&self, snapshot: StatusSnapshot) -> Result<(), BrokerError> {
        let (ack, applied) = oneshot::channel();
        self.mailbox
            .send(BrokerRequest::Publish { snapshot, ack })
            .await
            .map_err(|_| BrokerError::Closed)?;
        applied.await.map_err(|_| BrokerError::Closed)
    }

    /// Copy of the most recently applied snapshot.
    ///
    /// `source` names the requesting component in metrics and logs.
    pub async fn query(&self, source: &'static str) -> Result<StatusSnapshot, BrokerError> {
        let (reply, answer) = oneshot::channel();
        self.mailbox
            .send(BrokerRequest::Query { source, reply })
            .await
            .map_err(|_| BrokerError::Closed)?;
        answer.await.map_err(|_| BrokerError::Closed)
    }

    /// Whether the broker task has stopped.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

/// Broker task state.
#[derive(Debug)]
pub struct StatusBroker {
    current: StatusSnapshot,
    mailbox: mpsc::Receiver<BrokerRequest>,
    metrics: Option<MonitorMetrics>,
}

impl StatusBroker {
    /// Spawn the broker loop. It runs until `shutdown` fires or every handle is dropped.
    pub fn spawn(
        metrics: Option<MonitorMetrics>,
        shutdown: broadcast::Receiver<()>,
    ) -> (BrokerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let broker = Self {
            current: StatusSnapshot::default(),
            mailbox: rx,
            metrics,
        };
        let task = tokio::spawn(broker.run(shutdown));
        (BrokerHandle { mailbox: tx }, task)
    }

    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    debug!("status broker shutdown signal received");
                    break;
                }
                request = self.mailbox.recv() => match request {
                    Some(request) => self.handle(request),
                    None => {
                        debug!("all broker handles dropped");
                        break;
                    }
                },
            }
        }
    }

    fn handle(&mut self, request: BrokerRequest) {
        match request {
            BrokerRequest::Publish { snapshot, ack } => {
                debug!(
                    soc = snapshot.soc,
                    soh = snapshot.soh,
                    voltage = snapshot.voltage,
                    current = snapshot.current,
                    temp = snapshot.temp,
                    warnings = snapshot.warnings.len(),
                    alarms = snapshot.alarms.len(),
                    "status snapshot updated"
                );
                self.current = snapshot;
                let _ = ack.send(());
            }
            BrokerRequest::Query { source, reply } => {
                debug!(source, "status snapshot queried");
                if let Some(metrics) = &self.metrics {
                    metrics.record_query(source);
                }
                // The requester may have gone away.
                let _ = reply.send(self.current.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(soc: u16) -> StatusSnapshot {
        StatusSnapshot {
            soc,
            warnings: vec!["CELL_IMBALANCE".into()],
            ..StatusSnapshot::default()
        }
    }

    #[tokio::test]
    async fn query_before_publish_returns_zero_snapshot() {
        let (_tx, rx) = broadcast::channel(1);
        let (broker, _task) = StatusBroker::spawn(None, rx);
        assert_eq!(broker.query("test").await.unwrap(), StatusSnapshot::default());
    }

    #[tokio::test]
    async fn query_returns_last_applied_publish() {
        let (_tx, rx) = broadcast::channel(1);
        let (broker, _task) = StatusBroker::spawn(None, rx);
        broker.publish(snapshot(10)).await.unwrap();
        broker.publish(snapshot(42)).await.unwrap();
        assert_eq!(broker.query("test").await.unwrap(), snapshot(42));
    }

    #[tokio::test]
    async fn concurrent_queries_are_answered_independently() {
        let (_tx, rx) = broadcast::channel(1);
        let (broker, _task) = StatusBroker::spawn(None, rx);
        broker.publish(snapshot(77)).await.unwrap();

        let mut queries = Vec::new();
        for _ in 0..16 {
            let broker = broker.clone();
            queries.push(tokio::spawn(async move { broker.query("http").await }));
        }
        for query in queries {
            assert_eq!(query.await.unwrap().unwrap(), snapshot(77));
        }
    }

    #[tokio::test]
    async fn abandoned_query_does_not_stall_the_broker() {
        let (_tx, rx) = broadcast::channel(1);
        let (broker, _task) = StatusBroker::spawn(None, rx);
        let abandoned = tokio::spawn({
            let broker = broker.clone();
            async move { broker.query("http").await }
        });
        abandoned.abort();
        broker.publish(snapshot(5)).await.unwrap();
        assert_eq!(broker.query("http").await.unwrap().soc, 5);
    }

    #[tokio::test]
    async fn shutdown_closes_the_mailbox() {
        let (tx, rx) = broadcast::channel(1);
        let (broker, task) = StatusBroker::spawn(None, rx);
        tx.send(()).unwrap();
        task.await.unwrap();
        assert!(broker.is_closed());
        assert_eq!(broker.query("http").await, Err(BrokerError::Closed));
        assert_eq!(broker.publish(snapshot(1)).await, Err(BrokerError::Closed));
    }

    #[tokio::test]
    async fn queries_are_counted_by_source() {
        let registry = r_bms_metrics::new_registry();
        let metrics = MonitorMetrics::new(registry.clone()).unwrap();
        let (_tx, rx) = broadcast::channel(1);
        let (broker, _task) = StatusBroker::spawn(Some(metrics), rx);
        broker.query("recorder").await.unwrap();
        broker.query("http").await.unwrap();
        broker.query("http").await.unwrap();
        let text = r_bms_metrics::encode_text(&registry).unwrap();
        assert!(text.contains(r#"r_bms_broker_queries_total{source="http"} 2"#));
        assert!(text.contains(r#"r_bms_broker_queries_total{source="recorder"} 1"#));
    }
}
