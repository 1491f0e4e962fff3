//! Named integer counters

use std::cmp::Ordering;

use serde::Deserialize;

use super::NodeContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOp {
    Set,
    Inc,
    Dec,
    /// 0 when equal to `value`, 1 otherwise
    Equ,
    /// 0 when equal, 1 when lower, 2 when greater than `value`
    Cmp,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CounterArgs {
    pub name: String,
    #[serde(default)]
    pub value: Option<i64>,
}

pub(super) fn execute(ctx: &NodeContext<'_>, op: CounterOp, args: &CounterArgs) -> i32 {
    let scenario = ctx.scenario;
    let expected = args.value.unwrap_or(0);

    match op {
        CounterOp::Set => {
            scenario.set_counter(&args.name, expected);
            0
        }
        CounterOp::Inc => {
            scenario.add_to_counter(&args.name, 1);
            0
        }
        CounterOp::Dec => {
            scenario.add_to_counter(&args.name, -1);
            0
        }
        CounterOp::Equ => match scenario.counter(&args.name) {
            Some(current) if current == expected => 0,
            _ => 1,
        },
        CounterOp::Cmp => match scenario.counter(&args.name).map(|c| c.cmp(&expected)) {
            Some(Ordering::Equal) => 0,
            Some(Ordering::Less) | None => 1,
            Some(Ordering::Greater) => 2,
        },
    }
}
