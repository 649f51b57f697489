//! `chainpulse run` — poll, fan out, print.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chainpulse_bootstrap::Readiness;
use chainpulse_core::Topic;
use chainpulse_hub::{ChannelSubscriber, DistributionHub, PollingEngine};
use tokio::time::MissedTickBehavior;

use crate::Stack;

pub async fn run(stack: Stack, topics: HashSet<Topic>) -> Result<()> {
    let hub = Arc::new(DistributionHub::new());
    let engine = PollingEngine::new(
        stack.config.polling.clone(),
        stack.node.clone(),
        Some(stack.node_info()),
        hub.clone(),
        stack.cache.clone(),
        stack.breakers.clone(),
    );

    let (stdout_sub, mut rx) = ChannelSubscriber::channel(stack.config.hub.subscriber_buffer);
    let subscriber = hub.join_with_topics(stdout_sub, topics);

    engine.start();
    stack.monitor.start();

    let mut readiness_timer = tokio::time::interval(stack.config.health.interval());
    readiness_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first health probe runs concurrently; report readiness one interval in.
    readiness_timer.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
            message = rx.recv() => match message {
                Some(message) => println!("{message}"),
                None => break,
            },
            _ = readiness_timer.tick() => {
                let response = stack.bootstrap.respond().await;
                match response.readiness() {
                    Readiness::Ready => tracing::info!(readiness = %Readiness::Ready, "readiness"),
                    state => tracing::warn!(
                        readiness = %state,
                        error = response.error.as_deref().unwrap_or(""),
                        "readiness"
                    ),
                }
                for circuit in stack.breakers.snapshot_all() {
                    tracing::debug!(
                        service = %circuit.service,
                        state = %circuit.state,
                        failures = circuit.failure_count,
                        "circuit"
                    );
                }
            }
        }
    }

    engine.stop();
    stack.monitor.stop();
    hub.leave(subscriber);
    Ok(())
}
