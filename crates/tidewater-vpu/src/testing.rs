//! A tiny program used by the unit tests of this crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ChannelId, Choice, Context, Program};

pub struct Counter;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "kebab-case")]
pub enum CounterProcess {
  Start { channel: ChannelId },
  Spin,
  Arm { channel: ChannelId, seconds: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "kebab-case")]
pub enum CounterHandler {
  Count { remaining: u32 },
  Named { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "kebab-case")]
pub enum Tick {
  Tick,
  Boom,
  Done { name: String },
}

#[derive(Debug, Error)]
pub enum CounterError {
  #[error("boom on {0}")]
  Boom(ChannelId),
}

impl Program for Counter {
  type Global = u64;
  type Process = CounterProcess;
  type Handler = CounterHandler;
  type Message = Tick;
  type Error = CounterError;

  fn run(&self, process: CounterProcess, cx: &mut Context<'_, Self>) -> Result<(), CounterError> {
    match process {
      CounterProcess::Start { channel } => {
        cx.object(Choice::new().or(channel, CounterHandler::Count { remaining: 2 }));
      }
      CounterProcess::Spin => cx.instance(CounterProcess::Spin),
      CounterProcess::Arm { channel, seconds } => {
        let deadline = cx.now() + chrono::Duration::seconds(seconds);
        cx.register_timer(channel, deadline);
        cx.object(Choice::new().or(channel, CounterHandler::Count { remaining: 1 }));
      }
    }
    Ok(())
  }

  fn receive(
    &self,
    handler: CounterHandler,
    channel: ChannelId,
    message: Tick,
    cx: &mut Context<'_, Self>,
  ) -> Result<(), CounterError> {
    if message == Tick::Boom {
      return Err(CounterError::Boom(channel));
    }

    match handler {
      CounterHandler::Count { remaining } => {
        *cx.global_mut() += 1;
        if remaining > 1 {
          cx.object(Choice::new().or(
            channel,
            CounterHandler::Count {
              remaining: remaining - 1,
            },
          ));
        }
      }
      CounterHandler::Named { name } => {
        let reply = ChannelId(1000);
        cx.send(reply, Tick::Done { name });
      }
    }
    Ok(())
  }
}
