/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Fan-out of decoded messages to HTTP backends. A fixed pool of
//! workers consumes a shared channel; each message spawns one delivery
//! task which posts the message to every target whose IMEI pattern
//! matches and reports the aggregate result back to the caller.

use std::sync::Arc;

use anyhow::anyhow;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use slog::{debug, error, info, o, Logger};
use tokio::sync::{broadcast, oneshot};

use crate::protocol::InformationBucket;
use crate::serve::Handler;

mod target;
pub use target::{DeliveryError, TargetConfig};
use target::Target;

const MESSAGE_QUEUE_DEPTH: usize = 1024;

struct SbdMessage {
    bucket: InformationBucket,
    rsp_sender: oneshot::Sender<Result<(), DeliveryError>>,
}

/// The distributor owns the installed target table and the worker
/// pool. The table is a single atomic snapshot: `with_targets`
/// replaces it wholesale, dispatches load it per message, and
/// in-flight deliveries keep using the table they started with.
pub struct Distributor {
    targets: Arc<ArcSwap<Vec<Target>>>,
    msg_sender: flume::Sender<SbdMessage>,
    quit_sender: broadcast::Sender<()>,
    log: Logger,
}

impl Distributor {
    /// Spawn `workers` worker tasks on the current runtime.
    pub fn new(workers: usize, log: &Logger) -> Self {
        let targets = Arc::new(ArcSwap::from_pointee(Vec::new()));
        let (msg_sender, msg_receiver) = flume::bounded::<SbdMessage>(MESSAGE_QUEUE_DEPTH);
        let (quit_sender, _) = broadcast::channel(1);

        for id in 0..workers {
            tokio::spawn(run_worker(
                msg_receiver.clone(),
                Arc::clone(&targets),
                quit_sender.subscribe(),
                log.new(o!("worker" => id)),
            ));
        }

        Distributor {
            targets,
            msg_sender,
            quit_sender,
            log: log.clone(),
        }
    }

    /// Replace the target table. Every entry is validated and built
    /// first; on any failure the current table stays untouched.
    pub fn with_targets(&self, configs: Vec<TargetConfig>) -> anyhow::Result<()> {
        let mut table = Vec::with_capacity(configs.len());
        for config in configs {
            table.push(Target::build(config)?);
        }
        info!(self.log, "set config"; "targets" => table.len());
        self.targets.store(Arc::new(table));
        Ok(())
    }

    /// A snapshot of the currently installed target list.
    pub fn targets(&self) -> Vec<TargetConfig> {
        self.targets.load().iter().map(|t| t.config.clone()).collect()
    }

    /// Stop the workers. Deliveries already in flight run to
    /// completion, queued and future messages fail over to the caller.
    pub fn close(&self) {
        info!(self.log, "close distributor");
        let _ = self.quit_sender.send(());
    }

    async fn dispatch(&self, bucket: &InformationBucket) -> anyhow::Result<()> {
        let (rsp_sender, rsp_receiver) = oneshot::channel();
        let msg = SbdMessage {
            bucket: bucket.clone(),
            rsp_sender,
        };
        self.msg_sender
            .send_async(msg)
            .await
            .map_err(|_| anyhow!("distributor is closed"))?;
        match rsp_receiver.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(anyhow!("distributor dropped the message")),
        }
    }
}

#[async_trait]
impl Handler for Distributor {
    async fn handle(&self, bucket: &InformationBucket) -> anyhow::Result<()> {
        self.dispatch(bucket).await
    }
}

async fn run_worker(
    msg_receiver: flume::Receiver<SbdMessage>,
    targets: Arc<ArcSwap<Vec<Target>>>,
    mut quit_receiver: broadcast::Receiver<()>,
    log: Logger,
) {
    info!(log, "start distributor worker");
    loop {
        tokio::select! {
            biased;

            _ = quit_receiver.recv() => break,
            r = msg_receiver.recv_async() => {
                let Ok(msg) = r else {
                    break;
                };
                let table = targets.load_full();
                tokio::spawn(deliver_message(msg, table, log.clone()));
            }
        }
    }
    info!(log, "distributor worker stopped");
}

async fn deliver_message(msg: SbdMessage, table: Arc<Vec<Target>>, log: Logger) {
    let result = deliver_bucket(&msg.bucket, &table, &log).await;
    let _ = msg.rsp_sender.send(result);
}

/// POST the bucket to every matching target, stopping at the first
/// failure.
async fn deliver_bucket(
    bucket: &InformationBucket,
    table: &[Target],
    log: &Logger,
) -> Result<(), DeliveryError> {
    let imei = bucket.header.imei();
    let body = serde_json::to_vec(bucket)?;

    for target in table.iter().filter(|t| t.matches(&imei)) {
        match target.deliver(&body).await {
            Ok(()) => {
                debug!(log, "data transmitted"; "target" => &target.config.backend, "imei" => &imei);
            }
            Err(e) => {
                error!(log, "data not transmitted"; "target" => &target.config.backend, "error" => %e);
                return Err(e);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mobile_originated::parse_bucket;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn test_log() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn sample_bucket() -> InformationBucket {
        // MO header only, IMEI 300230000000000
        parse_bucket(
            b"\x01\x00\x1c\x9d\x4c\xce\x7b300230000000000\x00\x15\x9d\x00\x00\x58\x1b\x19\xe0",
        )
        .unwrap()
    }

    fn target(pattern: &str, addr: SocketAddr) -> TargetConfig {
        TargetConfig {
            imei_pattern: pattern.to_string(),
            backend: format!("http://{addr}/ingest"),
            ..Default::default()
        }
    }

    /// A tiny HTTP responder answering every POST with the given
    /// status and handing received bodies to the test.
    async fn spawn_backend(status: u16) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (body_sender, body_receiver) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let body_sender = body_sender.clone();
                tokio::spawn(async move {
                    let mut data = Vec::new();
                    let mut chunk = [0u8; 4096];
                    let body_start = loop {
                        let n = stream.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        data.extend_from_slice(&chunk[..n]);
                        if let Some(p) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                            break p + 4;
                        }
                    };
                    let head = String::from_utf8_lossy(&data[..body_start]).to_lowercase();
                    let content_length = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    while data.len() < body_start + content_length {
                        let n = stream.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        data.extend_from_slice(&chunk[..n]);
                    }
                    let _ = body_sender.send(data[body_start..].to_vec());
                    let rsp = format!(
                        "HTTP/1.1 {status} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    );
                    let _ = stream.write_all(rsp.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        (addr, body_receiver)
    }

    #[tokio::test]
    async fn dispatches_to_matching_target_only() {
        let (addr_a, mut bodies_a) = spawn_backend(200).await;
        let (addr_b, mut bodies_b) = spawn_backend(200).await;

        let distributor = Distributor::new(2, &test_log());
        distributor
            .with_targets(vec![target("^300230", addr_a), target("^300234", addr_b)])
            .unwrap();

        distributor.dispatch(&sample_bucket()).await.unwrap();

        let body = bodies_a.recv().await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["header"]["imei"], "300230000000000");
        assert_eq!(v["header"]["momsn"], 5533);
        assert!(v["payload"].is_null());
        assert!(v["location"].is_null());

        assert!(bodies_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejecting_backend_fails_the_dispatch() {
        let (addr, _bodies) = spawn_backend(500).await;

        let distributor = Distributor::new(1, &test_log());
        distributor
            .with_targets(vec![target("^300230", addr)])
            .unwrap();

        let err = distributor.dispatch(&sample_bucket()).await.unwrap_err();
        let delivery = err.downcast::<DeliveryError>().unwrap();
        assert!(matches!(delivery, DeliveryError::Rejected { status: 500, .. }));
    }

    #[tokio::test]
    async fn unreachable_backend_fails_the_dispatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let distributor = Distributor::new(1, &test_log());
        distributor
            .with_targets(vec![target("^300230", addr)])
            .unwrap();

        let err = distributor.dispatch(&sample_bucket()).await.unwrap_err();
        let delivery = err.downcast::<DeliveryError>().unwrap();
        assert!(matches!(delivery, DeliveryError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn no_matching_target_is_a_success() {
        let distributor = Distributor::new(1, &test_log());
        distributor
            .with_targets(vec![TargetConfig {
                imei_pattern: "^999".to_string(),
                backend: "http://127.0.0.1:9/ingest".to_string(),
                ..Default::default()
            }])
            .unwrap();
        distributor.dispatch(&sample_bucket()).await.unwrap();
    }

    #[tokio::test]
    async fn bad_config_leaves_table_untouched(){
        let distributor = Distributor::new(1, &test_log());
        distributor
            .with_targets(vec![TargetConfig {
                imei_pattern: "^300230".to_string(),
                backend: "http://127.0.0.1:9/ingest".to_string(),
                ..Default::default()
            }])
            .unwrap();

        let err = distributor.with_targets(vec![TargetConfig {
            imei_pattern: "300234[".to_string(),
            backend: "http://127.0.0.1:9/ingest".to_string(),
            ..Default::default()
        }]);
        assert!(err.is_err());

        let targets = distributor.targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].imei_pattern, "^300230");
    }

    #[tokio::test]
    async fn close_stops_accepting_work() {
        let distributor = Distributor::new(2, &test_log());
        distributor.close();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(distributor.dispatch(&sample_bucket()).await.is_err());
    }
}
