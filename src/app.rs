use std::collections::BTreeSet;
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::{config, detect, msg, node, poll, report, round};

// Slack on top of the per-node timeout before a round gives up on stragglers.
pub const ROUND_GRACE: Duration = Duration::from_millis(500);

pub type Latest = Arc<Mutex<Option<msg::Record>>>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to bind status endpoint on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error
    },
    #[error("status endpoint failed: {0}")]
    Serve(String)
}

mod handlers {
    use super::*;

    use axum::{extract, http::StatusCode, Json};

    pub async fn root(extract::State(latest): extract::State<Latest>) -> String {
        match &*latest.lock().await {
            Some(record) => record.summary(),
            None => String::from("No round has completed yet.\n")
        }
    }

    pub async fn latest(
        extract::State(latest): extract::State<Latest>
    ) -> Result<Json<msg::Record>, StatusCode> {
        latest.lock().await.clone().map(Json).ok_or(StatusCode::NOT_FOUND)
    }
}

pub fn router(latest: Latest) -> Router {
    Router::new()
        .route("/", routing::get(handlers::root))
        .route("/latest", routing::get(handlers::latest))
        .with_state(latest)
}

// Binds the status endpoint and serves it in the background.
pub fn serve_status(addr: &str, latest: Latest) -> Result<SocketAddr, Error> {
    let listener = TcpListener::bind(addr).map_err(|source| Error::Bind {
        addr: String::from(addr),
        source
    })?;
    let local = listener.local_addr().map_err(|source| Error::Bind {
        addr: String::from(addr),
        source
    })?;
    let server = axum::Server::from_tcp(listener)
        .map_err(|e| Error::Serve(e.to_string()))?
        .serve(router(latest).into_make_service());
    tokio::spawn(async move {
        if let Err(e) = server.await {
            warn!("Status endpoint stopped: {}", e);
        }
    });
    info!("Status endpoint listening on {}", local);
    Ok(local)
}

// Poll tasks of one round. Dropping it aborts the ones still running, also
// when the round itself is dropped mid-flight.
struct PollTasks(Vec<JoinHandle<()>>);

impl Drop for PollTasks {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

// Owns the aggregator and drives one round per tick.
pub struct Monitor {
    config: config::Config,
    poller: poll::Poller,
    aggregator: round::Aggregator,
    cycle: u64,
    latest: Latest
}

impl Monitor {
    pub fn new(config: config::Config) -> Self {
        let poller = poll::Poller::new(config.monitor.port, &config.monitor.command);
        let aggregator = round::Aggregator::with_max_lag(config.monitor.max_lag);
        Self {
            config,
            poller,
            aggregator,
            cycle: 0,
            latest: Latest::default()
        }
    }

    pub fn latest(&self) -> Latest {
        self.latest.clone()
    }

    pub fn aggregator(&self) -> &round::Aggregator {
        &self.aggregator
    }

    // Polls every node at once. Results come back over one channel so only
    // this task ever touches the aggregator.
    pub async fn cycle(&mut self) -> msg::Record {
        self.cycle += 1;
        let timeout = self.config.monitor.timeout();
        let (tx, mut rx) = mpsc::channel(self.config.nodes.len().max(1));
        let mut tasks = PollTasks(Vec::with_capacity(self.config.nodes.len()));
        for node in &self.config.nodes {
            let tx = tx.clone();
            let poller = self.poller.clone();
            let node = node.clone();
            tasks.0.push(tokio::spawn(async move {
                let res = poller.poll(&node, timeout).await;
                let _ = tx.send((node.id, res)).await;
            }));
        }
        drop(tx);

        let mut absent = Vec::default();
        let mut warnings = Vec::default();
        let mut answered = BTreeSet::default();
        let deadline = time::Instant::now() + timeout + ROUND_GRACE;
        while let Ok(Some((id, res))) = time::timeout_at(deadline, rx.recv()).await {
            answered.insert(id);
            let node = self.node(id).clone();
            let reason = match res {
                Ok(payload) => {
                    debug!("{} said {:?}", node, payload);
                    match report::parse(&payload) {
                        Ok(parsed) => {
                            for warning in parsed.warnings {
                                warn!("Incomplete report from {}: {}", node, warning);
                                warnings.push(msg::Warning { node: id, warning });
                            }
                            debug!("{} is at {}", node, parsed.report.height);
                            self.aggregator.observe(id, parsed.report);
                            continue;
                        },
                        Err(e) => msg::Reason::Parse(e)
                    }
                },
                Err(e) => msg::Reason::Poll(e)
            };
            warn!("No report from {}: {:?}", node, reason);
            absent.push(msg::Absence { node: id, label: node.label.clone(), reason });
        }
        drop(tasks);
        for node in &self.config.nodes {
            if !answered.contains(&node.id) {
                warn!("No report from {}: round deadline passed", node);
                absent.push(msg::Absence {
                    node: node.id,
                    label: node.label.clone(),
                    reason: msg::Reason::Poll(poll::Error::Timeout)
                });
            }
        }
        absent.sort_by_key(|a| a.node);

        let window = self.aggregator.finalize();
        let verdicts: Vec<msg::HeightVerdict> = window.rounds
            .iter()
            .filter_map(|round| detect::detect(round).map(|verdict| msg::HeightVerdict {
                height: round.height,
                verdict
            }))
            .collect();
        let record = msg::Record {
            cycle: self.cycle,
            at: chrono::Utc::now(),
            fleet_min_height: window.min_height,
            verdicts,
            absent,
            lagging: window.lagging
                .iter()
                .map(|(node, height)| msg::Lagging { node: *node, height: *height })
                .collect(),
            warnings
        };
        self.emit(&record);
        *self.latest.lock().await = Some(record.clone());
        record
    }

    fn node(&self, id: node::Id) -> &node::Identity {
        self.config.nodes
            .iter()
            .find(|n| n.id == id)
            .expect("poll results only come from roster nodes")
    }

    fn emit(&self, record: &msg::Record) {
        for v in &record.verdicts {
            if v.verdict.is_finding() {
                warn!("Height {}: {}", v.height, v.verdict);
            } else {
                info!("Height {}: {}", v.height, v.verdict);
            }
        }
        for l in &record.lagging {
            info!("Node {} is lagging at {}", l.node, l.height);
        }
        info!(
            "Round {} {} (fleet minimum {:?}, {} absent)",
            record.cycle,
            if record.is_ok() { "OK" } else { "NOT OK" },
            record.fleet_min_height,
            record.absent.len()
        );
        match serde_json::to_string(record) {
            Ok(json) => info!(target: "fleetwatch::record", "{}", json),
            Err(e) => warn!("Can't serialize round {}: {}", record.cycle, e)
        }
    }

    // Runs rounds on a fixed interval until `shutdown` resolves. A round in
    // flight at shutdown is dropped.
    pub async fn run_until<F: Future<Output = ()>>(mut self, shutdown: F) -> Result<(), Error> {
        if let Some(addr) = self.config.monitor.status_addr.clone() {
            serve_status(&addr, self.latest())?;
        }
        let mut interval = time::interval(self.config.monitor.interval());
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = async {
                    interval.tick().await;
                    self.cycle().await;
                } => {}
            }
        }
        info!("Stopped after {} rounds", self.cycle);
        Ok(())
    }

    pub async fn run(self) -> Result<(), Error> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Can't listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        }).await
    }
}
