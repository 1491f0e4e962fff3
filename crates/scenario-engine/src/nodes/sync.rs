//! Named events shared between branches

use futures_util::future::{join_all, select_all};
use serde::Deserialize;

use super::{seconds, NodeContext};
use crate::error::Result;
use crate::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOp {
    Create,
    Reset,
    Set,
    /// Any of the named events
    Wait,
    /// All of the named events
    WaitAll,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EventArgs {
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub event_names: Vec<String>,
    /// Seconds; 0 checks the current state without waiting
    #[serde(default)]
    pub timeout: Option<f64>,
}

impl EventArgs {
    pub fn names(&self) -> Vec<&str> {
        match &self.event_name {
            Some(name) => vec![name.as_str()],
            None => self.event_names.iter().map(String::as_str).collect(),
        }
    }
}

pub(super) async fn execute(ctx: &NodeContext<'_>, op: EventOp, args: &EventArgs) -> Result<i32> {
    let scenario = ctx.scenario;
    match op {
        EventOp::Create => {
            for name in args.names() {
                scenario.create_event(name);
            }
            Ok(0)
        }
        EventOp::Reset => {
            for name in args.names() {
                if !scenario.reset_event(name) {
                    log::debug!("event_reset '{}': unknown event", name);
                }
            }
            Ok(0)
        }
        EventOp::Set => {
            for name in args.names() {
                if !scenario.set_event(name) {
                    log::debug!("event_set '{}': unknown or already set", name);
                }
            }
            Ok(0)
        }
        EventOp::Wait => wait(ctx, args, false).await,
        EventOp::WaitAll => wait(ctx, args, true).await,
    }
}

/// 0 when the events resolved, 1 on timeout
async fn wait(ctx: &NodeContext<'_>, args: &EventArgs, all: bool) -> Result<i32> {
    let signals: Vec<Signal> = args
        .names()
        .into_iter()
        .filter_map(|name| {
            let signal = ctx.scenario.event(name);
            if signal.is_none() {
                log::warn!("'{}' waits on unknown event '{}'", ctx.node_id, name);
            }
            signal
        })
        .collect();
    let timeout = args.timeout.filter(|t| t.is_finite() && *t >= 0.0);

    // A zero timeout only inspects the current state, for both variants
    if timeout == Some(0.0) {
        let resolved = signals.iter().all(Signal::is_resolved);
        return Ok(if resolved { 0 } else { 1 });
    }

    if signals.is_empty() {
        if all {
            return Ok(0);
        }
        // Nothing can resolve, only the timeout remains
        if let Some(timeout) = timeout {
            ctx.sleep_secs(timeout).await?;
        }
        return Ok(1);
    }

    let waits: Vec<_> = signals.iter().map(|signal| Box::pin(signal.wait())).collect();
    let resolved = async move {
        if all {
            join_all(waits).await;
            0
        } else {
            select_all(waits).await.0
        }
    };

    match timeout {
        Some(timeout) => {
            let outcome = ctx
                .suspend(tokio::time::timeout(seconds(timeout), resolved))
                .await?;
            Ok(outcome.unwrap_or(1))
        }
        None => ctx.suspend(resolved).await,
    }
}
