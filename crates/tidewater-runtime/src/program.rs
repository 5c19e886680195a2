use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tidewater_config::{ActivityDef, ActivityRef, AlarmDef, ActivityKind, Expression, ProcessDef};
use tidewater_vpu::{ChannelId, Context, ExecutionSoup, Program};

use crate::activity::{ActivityInfo, SequenceState};
use crate::alarm::AlarmHandler;
use crate::error::RuntimeError;
use crate::expr::{EvaluationContext, EvaluationError, EvaluationFailure, ExpressionEvaluator};
use crate::fault::FaultData;
use crate::global::{GlobalData, RootLink};
use crate::message::Message;
use crate::scope::ScopeState;

pub type InstanceSoup = ExecutionSoup<InstanceProgram>;

/// Runnable process templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "kebab-case")]
pub enum Process {
  /// Start an activity according to its definition.
  Activity { info: ActivityInfo },
  SequenceStep { sequence: SequenceState },
  ScopeActive { scope: ScopeState },
  AlarmStart { alarm: AlarmHandler },
  AlarmWait {
    alarm: AlarmHandler,
    deadline: Option<DateTime<Utc>>,
  },
  AlarmFire { alarm: AlarmHandler },
  AlarmActive {
    alarm: AlarmHandler,
    child: ActivityInfo,
    stopped: bool,
  },
}

/// Continuations waiting on a choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "kebab-case")]
pub enum Handler {
  WaitActivity {
    info: ActivityInfo,
    timer: ChannelId,
  },
  SequenceWaiting {
    sequence: SequenceState,
    child: ActivityInfo,
  },
  ScopeWaiting { scope: ScopeState },
  AlarmWaiting {
    alarm: AlarmHandler,
    timer: Option<ChannelId>,
  },
  AlarmActive {
    alarm: AlarmHandler,
    child: ActivityInfo,
    stopped: bool,
  },
}

/// The program reducing instances of one process definition.
#[derive(Clone)]
pub struct InstanceProgram {
  definition: Arc<ProcessDef>,
  evaluator: Arc<dyn ExpressionEvaluator>,
}

impl InstanceProgram {
  pub fn new(definition: Arc<ProcessDef>, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
    Self {
      definition,
      evaluator,
    }
  }

  pub fn definition(&self) -> &ProcessDef {
    &self.definition
  }

  /// A fresh soup with the root activity ready to run.
  pub fn new_soup(&self) -> InstanceSoup {
    let mut soup = InstanceSoup::new(GlobalData::new());
    let root = ActivityInfo {
      id: soup.gen_monotonic(),
      activity: self.definition.root,
      termination: soup.new_channel(),
      parent: soup.new_channel(),
    };
    soup.global_mut().root = Some(RootLink {
      termination: root.termination,
      parent: root.parent,
    });
    soup.instance(Process::Activity { info: root });
    soup
  }

  pub(crate) fn activity(&self, reference: ActivityRef) -> Result<&ActivityDef, RuntimeError> {
    self
      .definition
      .activity(reference)
      .ok_or_else(|| RuntimeError::UnknownActivity {
        process_id: self.definition.process_id.clone(),
        activity: reference,
      })
  }

  pub(crate) fn alarm(&self, scope: ActivityRef, index: u32) -> Result<&AlarmDef, RuntimeError> {
    match &self.activity(scope)?.kind {
      ActivityKind::Scope { alarms, .. } => alarms
        .get(index as usize)
        .ok_or(RuntimeError::UnknownAlarm { scope, index }),
      _ => Err(RuntimeError::UnknownAlarm { scope, index }),
    }
  }

  /// `now` plus the duration `expression` evaluates to. The inner error is a
  /// fault to be handled by the process.
  pub(crate) fn deadline_after(
    &self,
    expression: &Expression,
    activity: ActivityRef,
    now: DateTime<Utc>,
  ) -> Result<Result<DateTime<Utc>, FaultData>, RuntimeError> {
    let cx = self.evaluation_context(activity, now);
    let duration: Duration = match self.evaluator.evaluate_duration(expression, &cx) {
      Ok(duration) => duration,
      Err(failure) => return fault_or_error(failure, expression),
    };
    now
      .checked_add_signed(duration)
      .map(Ok)
      .ok_or_else(|| EvaluationError::new(expression, "deadline out of range").into())
  }

  /// The absolute deadline `expression` evaluates to.
  pub(crate) fn deadline_at(
    &self,
    expression: &Expression,
    activity: ActivityRef,
    now: DateTime<Utc>,
  ) -> Result<Result<DateTime<Utc>, FaultData>, RuntimeError> {
    let cx = self.evaluation_context(activity, now);
    match self.evaluator.evaluate_deadline(expression, &cx) {
      Ok(deadline) => Ok(Ok(deadline)),
      Err(failure) => fault_or_error(failure, expression),
    }
  }

  fn evaluation_context(&self, activity: ActivityRef, now: DateTime<Utc>) -> EvaluationContext<'_> {
    EvaluationContext {
      now,
      process: &self.definition,
      activity,
    }
  }
}

fn fault_or_error<T>(
  failure: EvaluationFailure,
  expression: &Expression,
) -> Result<Result<T, FaultData>, RuntimeError> {
  match failure {
    EvaluationFailure::Fault(fault) => {
      Ok(Err(FaultData::from_expression(&fault, expression.as_str())))
    }
    EvaluationFailure::Invalid(error) => Err(RuntimeError::InvalidProcess(error)),
  }
}

impl Program for InstanceProgram {
  type Global = GlobalData;
  type Process = Process;
  type Handler = Handler;
  type Message = Message;
  type Error = RuntimeError;

  fn run(&self, process: Process, cx: &mut Context<'_, Self>) -> Result<(), RuntimeError> {
    match process {
      Process::Activity { info } => self.start_activity(info, cx),
      Process::SequenceStep { sequence } => self.sequence_step(sequence, cx),
      Process::ScopeActive { scope } => self.scope_active(scope, cx),
      Process::AlarmStart { alarm } => self.alarm_start(alarm, cx),
      Process::AlarmWait { alarm, deadline } => self.alarm_wait(alarm, deadline, cx),
      Process::AlarmFire { alarm } => self.alarm_fire(alarm, cx),
      Process::AlarmActive {
        alarm,
        child,
        stopped,
      } => {
        self.alarm_active(alarm, child, stopped, cx);
        Ok(())
      }
    }
  }

  fn receive(
    &self,
    handler: Handler,
    channel: ChannelId,
    message: Message,
    cx: &mut Context<'_, Self>,
  ) -> Result<(), RuntimeError> {
    match handler {
      Handler::WaitActivity { info, timer } => self.wait_receive(info, timer, channel, message, cx),
      Handler::SequenceWaiting { sequence, child } => {
        self.sequence_receive(sequence, child, channel, message, cx)
      }
      Handler::ScopeWaiting { scope } => self.scope_receive(scope, channel, message, cx),
      Handler::AlarmWaiting { alarm, timer } => {
        self.alarm_waiting_receive(alarm, timer, channel, message, cx)
      }
      Handler::AlarmActive {
        alarm,
        child,
        stopped,
      } => self.alarm_active_receive(alarm, child, stopped, channel, message, cx),
    }
  }
}

pub(crate) fn unexpected(state: &'static str, channel: ChannelId, message: &Message) -> RuntimeError {
  RuntimeError::UnexpectedMessage {
    state,
    channel,
    message: message.shape().to_string(),
  }
}
