/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use async_trait::async_trait;
use slog::{info, Logger};

use crate::protocol::InformationBucket;

/// Receives every decoded mobile originated message. A non-error
/// return acknowledges the message towards the terminal, an error
/// turns into a rejecting confirmation.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, bucket: &InformationBucket) -> anyhow::Result<()>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(&self, bucket: &InformationBucket) -> anyhow::Result<()> {
        self.as_ref().handle(bucket).await
    }
}

/// Adapter to use a plain function as a [`Handler`].
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: Fn(&InformationBucket) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, bucket: &InformationBucket) -> anyhow::Result<()> {
        (self.0)(bucket)
    }
}

/// Middleware that logs every bucket as one JSON line before passing
/// it on to the wrapped handler.
pub struct LogHandler<H> {
    log: Logger,
    next: H,
}

impl<H> LogHandler<H> {
    pub fn new(log: Logger, next: H) -> Self {
        LogHandler { log, next }
    }
}

#[async_trait]
impl<H: Handler> Handler for LogHandler<H> {
    async fn handle(&self, bucket: &InformationBucket) -> anyhow::Result<()> {
        let elements = serde_json::to_string(bucket)?;
        info!(self.log, "new data"; "elements" => elements);
        self.next.handle(bucket).await
    }
}
