//! Scopes: a body plus its alarm event handlers.
//!
//! When the body completes normally the handlers are stopped softly, so a
//! firing in progress may finish. A fault from the body or any handler, or a
//! terminate from the parent, terminates everything still running. The
//! first fault wins. A scope that completes without a fault registers its
//! compensation activity, if any, with the set it reports upward.

use serde::{Deserialize, Serialize};
use tidewater_config::ActivityKind;
use tidewater_vpu::{ChannelId, Choice, Context};
use tracing::debug;

use crate::activity::ActivityInfo;
use crate::alarm::{AlarmHandler, AlarmRef};
use crate::compensation::{CompensationHandler, CompensationSet};
use crate::error::RuntimeError;
use crate::fault::FaultData;
use crate::message::Message;
use crate::program::{Handler, InstanceProgram, Process, unexpected};

/// The channels of one alarm handler, as seen from its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerLink {
  pub parent: ChannelId,
  pub termination: ChannelId,
  pub control: ChannelId,
  #[serde(default)]
  pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeState {
  pub info: ActivityInfo,
  /// `None` once the body completed.
  pub body: Option<ActivityInfo>,
  pub handlers: Vec<HandlerLink>,
  #[serde(default)]
  pub compensations: CompensationSet,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fault: Option<FaultData>,
  /// Everything still running was told to terminate.
  #[serde(default)]
  pub terminating: bool,
}

impl ScopeState {
  /// Spawn the body and every alarm handler of the scope `info` refers to.
  pub(crate) fn start(
    program: &InstanceProgram,
    info: ActivityInfo,
    cx: &mut Context<'_, InstanceProgram>,
  ) -> Result<Self, RuntimeError> {
    let ActivityKind::Scope { body, alarms, .. } = &program.activity(info.activity)?.kind else {
      return Err(RuntimeError::UnknownActivity {
        process_id: program.definition().process_id.clone(),
        activity: info.activity,
      });
    };

    let body = ActivityInfo::spawn(*body, cx);
    cx.instance(Process::Activity { info: body });

    let mut handlers = Vec::with_capacity(alarms.len());
    for index in 0..alarms.len() as u32 {
      let link = HandlerLink {
        parent: cx.new_channel(),
        termination: cx.new_channel(),
        control: cx.new_channel(),
        done: false,
      };
      cx.instance(Process::AlarmStart {
        alarm: AlarmHandler {
          alarm: AlarmRef {
            scope: info.activity,
            index,
          },
          scope_instance: info.id,
          parent: link.parent,
          termination: link.termination,
          control: link.control,
          compensations: CompensationSet::new(),
        },
      });
      handlers.push(link);
    }

    Ok(Self {
      info,
      body: Some(body),
      handlers,
      compensations: CompensationSet::new(),
      fault: None,
      terminating: false,
    })
  }

  fn is_finished(&self) -> bool {
    self.body.is_none() && self.handlers.iter().all(|h| h.done)
  }

  fn record_fault(&mut self, fault: Option<FaultData>) {
    if self.fault.is_none() {
      self.fault = fault;
    }
  }

  /// Hard stop of everything still running.
  fn terminate_all(&mut self, cx: &mut Context<'_, InstanceProgram>) {
    if self.terminating {
      return;
    }
    self.terminating = true;
    if let Some(body) = &self.body {
      cx.send(body.termination, Message::Terminate);
    }
    for handler in self.handlers.iter().filter(|h| !h.done) {
      cx.send(handler.termination, Message::Terminate);
    }
  }

  fn stop_handlers(&self, cx: &mut Context<'_, InstanceProgram>) {
    for handler in self.handlers.iter().filter(|h| !h.done) {
      cx.send(handler.control, Message::Stop);
    }
  }

  /// Something finished on `channel`: the body or one of the handlers.
  fn child_done(
    &mut self,
    channel: ChannelId,
    fault: Option<FaultData>,
    compensations: CompensationSet,
    cx: &mut Context<'_, InstanceProgram>,
  ) -> bool {
    let faulted = fault.is_some();
    self.compensations.merge(compensations);
    self.record_fault(fault);

    if let Some(body) = self.body
      && body.parent == channel
    {
      self.body = None;
      cx.close(body.termination);
      if faulted {
        self.terminate_all(cx);
      } else if !self.terminating {
        self.stop_handlers(cx);
      }
      return true;
    }

    let Some(handler) = self.handlers.iter_mut().find(|h| h.parent == channel) else {
      return false;
    };
    handler.done = true;
    cx.close(handler.termination);
    cx.close(handler.control);
    if faulted {
      self.terminate_all(cx);
    }
    true
  }
}

impl InstanceProgram {
  pub(crate) fn scope_active(
    &self,
    scope: ScopeState,
    cx: &mut Context<'_, InstanceProgram>,
  ) -> Result<(), RuntimeError> {
    if scope.is_finished() {
      return self.scope_complete(scope, cx);
    }

    let mut choice = Choice::new();
    if let Some(body) = &scope.body {
      choice = choice.or(
        body.parent,
        Handler::ScopeWaiting {
          scope: scope.clone(),
        },
      );
    }
    for handler in scope.handlers.iter().filter(|h| !h.done) {
      choice = choice.or(
        handler.parent,
        Handler::ScopeWaiting {
          scope: scope.clone(),
        },
      );
    }
    let termination = scope.info.termination;
    cx.object(choice.or(termination, Handler::ScopeWaiting { scope }));
    Ok(())
  }

  fn scope_complete(
    &self,
    mut scope: ScopeState,
    cx: &mut Context<'_, InstanceProgram>,
  ) -> Result<(), RuntimeError> {
    if scope.fault.is_none()
      && let ActivityKind::Scope {
        compensation: Some(activity),
        ..
      } = &self.activity(scope.info.activity)?.kind
    {
      scope.compensations.insert(CompensationHandler {
        scope_instance: scope.info.id,
        scope: scope.info.activity,
        activity: *activity,
      });
    }
    debug!(
      scope = %scope.info.activity,
      faulted = scope.fault.is_some(),
      compensations = scope.compensations.len(),
      "scope completed"
    );
    cx.send(
      scope.info.parent,
      Message::completed(scope.fault, scope.compensations),
    );
    Ok(())
  }

  pub(crate) fn scope_receive(
    &self,
    mut scope: ScopeState,
    channel: ChannelId,
    message: Message,
    cx: &mut Context<'_, InstanceProgram>,
  ) -> Result<(), RuntimeError> {
    match message {
      Message::Terminate if channel == scope.info.termination => {
        scope.terminate_all(cx);
      }
      Message::Completed {
        fault,
        compensations,
      } => {
        if !scope.child_done(channel, fault, compensations, cx) {
          return Err(RuntimeError::UnexpectedMessage {
            state: "scope",
            channel,
            message: "completed".to_string(),
          });
        }
      }
      Message::Cancelled | Message::Failure { .. } => {
        if !scope.child_done(channel, None, CompensationSet::new(), cx) {
          return Err(unexpected("scope", channel, &message));
        }
      }
      Message::Compensate { scope: target, reply } => {
        cx.send(scope.info.parent, Message::Compensate { scope: target, reply });
      }
      other => return Err(unexpected("scope", channel, &other)),
    }
    cx.instance(Process::ScopeActive { scope });
    Ok(())
  }
}
