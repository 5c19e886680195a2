//! The `onAlarm` event handler.
//!
//! ```text
//!            ┌──────────────── repeat ───────────────┐
//!            ▼                                       │
//! START ──▶ WAIT ── deadline passed ──▶ FIRE ──▶ ACTIVE
//!            │                                       │
//!            └── stop / terminate ──▶ done ◀── fault, or stopped
//! ```
//!
//! START computes the first deadline. WAIT arms a timer and listens for the
//! timer, a stop and a terminate. FIRE runs the handler's activity and ACTIVE
//! waits for it; on completion the handler re-arms with `now + repeat`, or
//! goes back to waiting without a deadline until it is stopped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tidewater_config::ActivityRef;
use tidewater_vpu::{ChannelId, Choice, Context};
use tracing::{debug, error};

use crate::activity::ActivityInfo;
use crate::compensation::CompensationSet;
use crate::error::RuntimeError;
use crate::fault::FaultData;
use crate::message::Message;
use crate::program::{Handler, InstanceProgram, Process, unexpected};

/// Which alarm of which scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRef {
  pub scope: ActivityRef,
  pub index: u32,
}

/// State carried through every phase of an alarm handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmHandler {
  pub alarm: AlarmRef,
  /// Id of the enclosing scope instance.
  pub scope_instance: u64,
  /// Where the handler reports completion to its scope.
  pub parent: ChannelId,
  pub termination: ChannelId,
  /// Where the scope sends [`Message::Stop`].
  pub control: ChannelId,
  /// Handlers accumulated from completed firings.
  #[serde(default)]
  pub compensations: CompensationSet,
}

impl InstanceProgram {
  pub(crate) fn alarm_start(
    &self,
    alarm: AlarmHandler,
    cx: &mut Context<'_, InstanceProgram>,
  ) -> Result<(), RuntimeError> {
    let def = self.alarm(alarm.alarm.scope, alarm.alarm.index)?;
    let now = cx.now();
    let scope = alarm.alarm.scope;

    let deadline = if let Some(expr) = &def.for_expr {
      Some(self.deadline_after(expr, scope, now)?)
    } else if let Some(expr) = &def.until_expr {
      Some(self.deadline_at(expr, scope, now)?)
    } else if let Some(expr) = &def.repeat_expr {
      Some(self.deadline_after(expr, scope, now)?)
    } else {
      None
    };

    match deadline.transpose() {
      Ok(deadline) => cx.instance(Process::AlarmWait { alarm, deadline }),
      Err(fault) => alarm_fault(alarm, fault, cx),
    }
    Ok(())
  }

  pub(crate) fn alarm_wait(
    &self,
    alarm: AlarmHandler,
    deadline: Option<DateTime<Utc>>,
    cx: &mut Context<'_, InstanceProgram>,
  ) -> Result<(), RuntimeError> {
    match deadline {
      Some(deadline) if deadline <= cx.now() => {
        debug!(alarm = ?alarm.alarm, %deadline, "alarm deadline already passed");
        cx.instance(Process::AlarmFire { alarm });
      }
      Some(deadline) => {
        let timer = cx.new_channel();
        cx.register_timer(timer, deadline);
        let handler = Handler::AlarmWaiting {
          alarm: alarm.clone(),
          timer: Some(timer),
        };
        cx.object(
          Choice::new()
            .or(timer, handler.clone())
            .or(alarm.control, handler.clone())
            .or(alarm.termination, handler),
        );
      }
      None => {
        let handler = Handler::AlarmWaiting {
          alarm: alarm.clone(),
          timer: None,
        };
        cx.object(
          Choice::new()
            .or(alarm.control, handler.clone())
            .or(alarm.termination, handler),
        );
      }
    }
    Ok(())
  }

  pub(crate) fn alarm_waiting_receive(
    &self,
    alarm: AlarmHandler,
    timer: Option<ChannelId>,
    channel: ChannelId,
    message: Message,
    cx: &mut Context<'_, InstanceProgram>,
  ) -> Result<(), RuntimeError> {
    match message {
      Message::Timeout => {
        if let Some(timer) = timer {
          cx.close(timer);
        }
        cx.instance(Process::AlarmFire { alarm });
      }
      Message::Stop | Message::Terminate | Message::TimerCancelled => {
        if let Some(timer) = timer {
          cx.cancel_timer(timer);
          cx.close(timer);
        }
        cx.send(alarm.parent, Message::completed(None, alarm.compensations));
      }
      other => return Err(unexpected("alarm-wait", channel, &other)),
    }
    Ok(())
  }

  pub(crate) fn alarm_fire(
    &self,
    alarm: AlarmHandler,
    cx: &mut Context<'_, InstanceProgram>,
  ) -> Result<(), RuntimeError> {
    let def = self.alarm(alarm.alarm.scope, alarm.alarm.index)?;
    let child = ActivityInfo::spawn(def.activity, cx);
    debug!(alarm = ?alarm.alarm, child = child.id, "alarm fired");
    cx.instance(Process::Activity { info: child });
    cx.instance(Process::AlarmActive {
      alarm,
      child,
      stopped: false,
    });
    Ok(())
  }

  pub(crate) fn alarm_active(
    &self,
    alarm: AlarmHandler,
    child: ActivityInfo,
    stopped: bool,
    cx: &mut Context<'_, InstanceProgram>,
  ) {
    let handler = Handler::AlarmActive {
      alarm: alarm.clone(),
      child,
      stopped,
    };
    cx.object(
      Choice::new()
        .or(child.parent, handler.clone())
        .or(alarm.control, handler.clone())
        .or(alarm.termination, handler),
    );
  }

  pub(crate) fn alarm_active_receive(
    &self,
    mut alarm: AlarmHandler,
    child: ActivityInfo,
    stopped: bool,
    channel: ChannelId,
    message: Message,
    cx: &mut Context<'_, InstanceProgram>,
  ) -> Result<(), RuntimeError> {
    match message {
      Message::Completed {
        fault,
        compensations,
      } => {
        alarm.compensations.merge(compensations);
        self.alarm_child_done(alarm, fault, stopped, cx)?;
      }
      Message::Cancelled | Message::Failure { .. } => {
        self.alarm_child_done(alarm, None, stopped, cx)?;
      }
      Message::Compensate { scope, reply } => {
        cx.send(alarm.parent, Message::Compensate { scope, reply });
        cx.instance(Process::AlarmActive {
          alarm,
          child,
          stopped,
        });
      }
      Message::Stop => {
        cx.instance(Process::AlarmActive {
          alarm,
          child,
          stopped: true,
        });
      }
      Message::Terminate => {
        cx.send(child.termination, Message::Terminate);
        cx.instance(Process::AlarmActive {
          alarm,
          child,
          stopped: true,
        });
      }
      other => return Err(unexpected("alarm-active", channel, &other)),
    }
    Ok(())
  }

  /// The firing's activity finished: report a fault, finish when stopped,
  /// otherwise re-arm.
  fn alarm_child_done(
    &self,
    alarm: AlarmHandler,
    fault: Option<FaultData>,
    stopped: bool,
    cx: &mut Context<'_, InstanceProgram>,
  ) -> Result<(), RuntimeError> {
    if let Some(fault) = fault {
      alarm_fault(alarm, fault, cx);
      return Ok(());
    }
    if stopped {
      cx.send(alarm.parent, Message::completed(None, alarm.compensations));
      return Ok(());
    }

    let def = self.alarm(alarm.alarm.scope, alarm.alarm.index)?;
    match &def.repeat_expr {
      Some(expr) => {
        let now = cx.now();
        match self.deadline_after(expr, alarm.alarm.scope, now)? {
          Ok(deadline) => cx.instance(Process::AlarmWait {
            alarm,
            deadline: Some(deadline),
          }),
          Err(fault) => alarm_fault(alarm, fault, cx),
        }
      }
      None => cx.instance(Process::AlarmWait {
        alarm,
        deadline: None,
      }),
    }
    Ok(())
  }
}

fn alarm_fault(alarm: AlarmHandler, fault: FaultData, cx: &mut Context<'_, InstanceProgram>) {
  error!(alarm = ?alarm.alarm, fault = %fault.name, "alarm handler faulted");
  cx.send(alarm.parent, Message::completed(Some(fault), alarm.compensations));
}
