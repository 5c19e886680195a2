use serde::{Deserialize, Serialize};
use tidewater_config::{ActivityKind, ActivityRef, Deadline};
use tidewater_vpu::{ChannelId, Choice, Context};
use tracing::{debug, warn};

use crate::compensation::CompensationSet;
use crate::error::RuntimeError;
use crate::fault::FaultData;
use crate::message::Message;
use crate::program::{Handler, InstanceProgram, Process, unexpected};
use crate::scope::ScopeState;

/// A running activity and the channels linking it to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityInfo {
  /// Monotonic id, unique within the instance.
  pub id: u64,
  pub activity: ActivityRef,
  /// The parent sends [`Message::Terminate`] here.
  pub termination: ChannelId,
  /// The activity reports back here.
  pub parent: ChannelId,
}

impl ActivityInfo {
  /// Allocate the identity and channels of a new child.
  pub fn spawn(activity: ActivityRef, cx: &mut Context<'_, InstanceProgram>) -> Self {
    Self {
      id: cx.gen_monotonic(),
      activity,
      termination: cx.new_channel(),
      parent: cx.new_channel(),
    }
  }
}

/// Progress of a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceState {
  pub info: ActivityInfo,
  /// Index of the child to run next.
  pub position: usize,
  #[serde(default)]
  pub compensations: CompensationSet,
  #[serde(default)]
  pub terminated: bool,
}

impl InstanceProgram {
  pub(crate) fn start_activity(
    &self,
    info: ActivityInfo,
    cx: &mut Context<'_, InstanceProgram>,
  ) -> Result<(), RuntimeError> {
    let def = self.activity(info.activity)?;
    debug!(activity = %def.label(), id = info.id, "starting activity");

    match &def.kind {
      ActivityKind::Empty => {
        cx.send(info.parent, Message::completed(None, CompensationSet::new()));
      }
      ActivityKind::Throw { fault } => {
        cx.send(
          info.parent,
          Message::completed(Some(FaultData::new(fault.clone())), CompensationSet::new()),
        );
      }
      ActivityKind::Wait { deadline } => {
        let now = cx.now();
        let evaluated = match deadline {
          Deadline::For(expr) => self.deadline_after(expr, info.activity, now)?,
          Deadline::Until(expr) => self.deadline_at(expr, info.activity, now)?,
        };
        match evaluated {
          Err(fault) => {
            warn!(activity = %def.label(), fault = %fault.name, "wait deadline raised a fault");
            cx.send(info.parent, Message::completed(Some(fault), CompensationSet::new()));
          }
          Ok(deadline) if deadline <= now => {
            cx.send(info.parent, Message::completed(None, CompensationSet::new()));
          }
          Ok(deadline) => {
            let timer = cx.new_channel();
            cx.register_timer(timer, deadline);
            cx.object(
              Choice::new()
                .or(timer, Handler::WaitActivity { info, timer })
                .or(info.termination, Handler::WaitActivity { info, timer }),
            );
          }
        }
      }
      ActivityKind::Sequence { .. } => {
        cx.instance(Process::SequenceStep {
          sequence: SequenceState {
            info,
            position: 0,
            compensations: CompensationSet::new(),
            terminated: false,
          },
        });
      }
      ActivityKind::Scope { .. } => {
        let scope = ScopeState::start(self, info, cx)?;
        cx.instance(Process::ScopeActive { scope });
      }
    }
    Ok(())
  }

  pub(crate) fn wait_receive(
    &self,
    info: ActivityInfo,
    timer: ChannelId,
    channel: ChannelId,
    message: Message,
    cx: &mut Context<'_, InstanceProgram>,
  ) -> Result<(), RuntimeError> {
    match message {
      Message::Timeout | Message::TimerCancelled | Message::Terminate => {
        cx.cancel_timer(timer);
        cx.close(timer);
        cx.send(info.parent, Message::completed(None, CompensationSet::new()));
        Ok(())
      }
      other => Err(unexpected("wait", channel, &other)),
    }
  }

  pub(crate) fn sequence_step(
    &self,
    sequence: SequenceState,
    cx: &mut Context<'_, InstanceProgram>,
  ) -> Result<(), RuntimeError> {
    let children = match &self.activity(sequence.info.activity)?.kind {
      ActivityKind::Sequence { children } => children,
      _ => {
        return Err(RuntimeError::UnknownActivity {
          process_id: self.definition().process_id.clone(),
          activity: sequence.info.activity,
        });
      }
    };

    match children.get(sequence.position) {
      Some(&next) if !sequence.terminated => {
        let child = ActivityInfo::spawn(next, cx);
        cx.instance(Process::Activity { info: child });
        self.sequence_listen(sequence, child, cx);
      }
      _ => {
        cx.send(
          sequence.info.parent,
          Message::completed(None, sequence.compensations),
        );
      }
    }
    Ok(())
  }

  fn sequence_listen(
    &self,
    sequence: SequenceState,
    child: ActivityInfo,
    cx: &mut Context<'_, InstanceProgram>,
  ) {
    let termination = sequence.info.termination;
    cx.object(
      Choice::new()
        .or(
          child.parent,
          Handler::SequenceWaiting {
            sequence: sequence.clone(),
            child,
          },
        )
        .or(termination, Handler::SequenceWaiting { sequence, child }),
    );
  }

  pub(crate) fn sequence_receive(
    &self,
    mut sequence: SequenceState,
    child: ActivityInfo,
    channel: ChannelId,
    message: Message,
    cx: &mut Context<'_, InstanceProgram>,
  ) -> Result<(), RuntimeError> {
    match message {
      Message::Completed {
        fault,
        compensations,
      } => {
        sequence.compensations.merge(compensations);
        if fault.is_some() {
          cx.send(
            sequence.info.parent,
            Message::completed(fault, sequence.compensations),
          );
          return Ok(());
        }
        sequence.position += 1;
        cx.instance(Process::SequenceStep { sequence });
      }
      Message::Cancelled | Message::Failure { .. } => {
        sequence.position += 1;
        cx.instance(Process::SequenceStep { sequence });
      }
      Message::Terminate => {
        sequence.terminated = true;
        cx.send(child.termination, Message::Terminate);
        self.sequence_listen(sequence, child, cx);
      }
      Message::Compensate { scope, reply } => {
        cx.send(sequence.info.parent, Message::Compensate { scope, reply });
        self.sequence_listen(sequence, child, cx);
      }
      other => return Err(unexpected("sequence", channel, &other)),
    }
    Ok(())
  }
}
