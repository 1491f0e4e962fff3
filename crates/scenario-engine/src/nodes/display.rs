//! Display primitives

use serde::Deserialize;

use super::NodeContext;
use crate::error::Result;
use crate::events::ScenarioEvent;
use crate::types::PrimitiveName;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DisplayArgs {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    /// Seconds shown by the UI before it answers the countdown prompt
    #[serde(default)]
    pub countdown: Option<f64>,
    /// Seconds to wait before the countdown
    #[serde(default)]
    pub pause: Option<f64>,
    /// Seconds to wait after the countdown
    #[serde(default)]
    pub delay: Option<f64>,
    #[serde(default)]
    pub wait_next: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProgressArgs {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub count: f64,
}

/// Show a message, then run the optional pause, countdown, delay and
/// "next" steps in that order
pub(super) async fn display(
    ctx: &NodeContext<'_>,
    primitive: PrimitiveName,
    args: &DisplayArgs,
) -> Result<i32> {
    ctx.scenario.emit(ScenarioEvent::DisplayMessage {
        primitive_name: primitive,
        title: ctx.format(args.title.as_deref()),
        msg: ctx.format(args.msg.as_deref()),
        text: ctx.format(args.text.as_deref()),
        section: args.section.clone(),
        step: ctx.def.step.clone(),
    });

    if let Some(pause) = args.pause {
        ctx.sleep_secs(pause).await?;
    }
    if let Some(countdown) = args.countdown.filter(|c| *c > 0.0) {
        ctx.prompt(|prompt_id| ScenarioEvent::WaitCountdown {
            prompt_id,
            countdown,
        })
        .await?;
    }
    if let Some(delay) = args.delay {
        ctx.sleep_secs(delay).await?;
    }
    if args.wait_next || primitive == PrimitiveName::DisplayPage {
        ctx.prompt(|prompt_id| ScenarioEvent::WaitNext { prompt_id }).await?;
    }
    Ok(0)
}

pub(super) fn progress(ctx: &NodeContext<'_>, args: &ProgressArgs) -> Result<i32> {
    ctx.scenario.emit(ScenarioEvent::DisplayProgress {
        text: ctx.format(args.text.as_deref()),
        value: args.value,
        count: args.count,
        step: ctx.def.step.clone(),
    });
    Ok(0)
}
