//! Flow control and user interaction primitives

use serde::Deserialize;

use super::NodeContext;
use crate::engine;
use crate::error::{Result, ScenarioError};
use crate::events::ScenarioEvent;
use crate::metadata::AbortInfo;
use crate::types::ExecutionPoint;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ForkArgs {
    pub branch_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JoinArgs {
    #[serde(default)]
    pub subbranch: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
}

impl JoinArgs {
    pub fn target(&self) -> Option<&str> {
        self.subbranch.as_deref().or(self.branch_name.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AbortArgs {
    pub reason: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DelayArgs {
    /// Seconds
    #[serde(default)]
    pub delay: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WaitOptionArgs {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScreenSleepArgs {
    #[serde(default)]
    pub enable: bool,
}

/// Start `branch_name` at `next_nodes[1]`, continue at `next_nodes[0]`
pub(super) fn fork(ctx: &NodeContext<'_>, args: &ForkArgs) -> Result<i32> {
    let Some(entry) = ctx.def.next_node(1) else {
        return Err(ScenarioError::definition(format!(
            "fork '{}' has no branch entry in next_nodes[1]",
            ctx.node_id
        )));
    };
    engine::spawn_branch(
        ctx.scenario,
        &args.branch_name,
        ExecutionPoint::entry(entry),
        ctx.token.clone(),
    );
    Ok(0)
}

/// Wait for a forked branch to terminate
///
/// Unknown branches are treated as already finished.
pub(super) async fn join(ctx: &NodeContext<'_>, args: &JoinArgs) -> Result<i32> {
    let Some(target) = args.target() else {
        log::warn!("join '{}' names no branch", ctx.node_id);
        return Ok(0);
    };
    if target == ctx.branch {
        return Ok(0);
    }
    match ctx.scenario.branch(target) {
        Some(done) => {
            ctx.suspend(done.wait()).await?;
        }
        None => log::debug!("join '{}': branch '{}' was never forked", ctx.node_id, target),
    }
    Ok(0)
}

pub(super) async fn abort(ctx: &NodeContext<'_>, args: &AbortArgs) -> Result<i32> {
    log::info!("Scenario aborted at '{}': {}", ctx.node_id, args.reason);
    let info = AbortInfo {
        reason: args.reason.clone(),
        message: args.message.clone(),
    };
    ctx.scenario.update_metadata(|metadata| metadata.abort = Some(info));
    ctx.scenario
        .stop(Some(ScenarioError::Aborted {
            reason: args.reason.clone(),
            message: args.message.clone(),
        }))
        .await;
    Ok(1)
}

pub(super) async fn wait_delay(ctx: &NodeContext<'_>, args: &DelayArgs) -> Result<i32> {
    ctx.sleep_secs(args.delay).await?;
    Ok(0)
}

pub(super) async fn wait_next(ctx: &NodeContext<'_>) -> Result<i32> {
    ctx.prompt(|prompt_id| ScenarioEvent::WaitNext { prompt_id }).await?;
    Ok(0)
}

/// Result code is the index of the chosen option
pub(super) async fn wait_option(ctx: &NodeContext<'_>, args: &WaitOptionArgs) -> Result<i32> {
    let title = ctx.format(args.title.as_deref());
    let msg = ctx.format(args.msg.as_deref());
    let options = args
        .options
        .iter()
        .map(|option| ctx.scenario.formatted_text(option))
        .collect();

    ctx.prompt(move |prompt_id| ScenarioEvent::WaitOption {
        prompt_id,
        title,
        msg,
        options,
    })
    .await
}

pub(super) async fn screen_sleep(ctx: &NodeContext<'_>, args: &ScreenSleepArgs) -> Result<i32> {
    let enable = args.enable;
    ctx.prompt(move |prompt_id| ScenarioEvent::ScreenSleep { prompt_id, enable })
        .await?;
    Ok(0)
}
