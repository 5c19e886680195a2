use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tidewater_config::{
  ActivityKind, ActivityRef, AlarmDef, Deadline, Expression, ProcessDef, ProcessDefBuilder,
};
use tidewater_runtime::{
  BusinessFault, EvaluationContext, EvaluationFailure, ExpressionEvaluator, Handler,
  InstanceProgram, InstanceSoup, LiteralEvaluator, Message, RuntimeError,
};
use tidewater_vpu::{
  ChannelId, Clock, Effect, InstanceState, ManualClock, ReductionError, RemapTable, Vpu, VpuConfig, codec,
};

/// Drives one instance the way the engine does: reduce, persist, perform
/// effects, deliver due timers.
struct Harness {
  program: InstanceProgram,
  clock: ManualClock,
  soup: Option<InstanceSoup>,
  armed: BTreeMap<ChannelId, DateTime<Utc>>,
  registered: Vec<DateTime<Utc>>,
  cancelled: usize,
  state: InstanceState,
}

fn t0() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

impl Harness {
  fn new(definition: ProcessDef) -> Self {
    Self::with_evaluator(definition, Arc::new(LiteralEvaluator))
  }

  fn with_evaluator(definition: ProcessDef, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
    let program = InstanceProgram::new(Arc::new(definition), evaluator);
    let soup = program.new_soup();
    let mut harness = Self {
      program,
      clock: ManualClock::new(t0()),
      soup: Some(soup),
      armed: BTreeMap::new(),
      registered: Vec::new(),
      cancelled: 0,
      state: InstanceState::Suspended,
    };
    harness.run().unwrap();
    harness
  }

  fn run(&mut self) -> Result<(), ReductionError<RuntimeError>> {
    let soup = self.soup.take().unwrap();
    let mut vpu = Vpu::new(&self.program, &self.clock, VpuConfig::default(), soup);
    let outcome = vpu.execute()?;
    self.state = outcome.state;

    let mut soup = vpu.into_soup();
    for effect in soup.drain_effects() {
      match effect {
        Effect::RegisterTimer { channel, deadline } => {
          self.armed.insert(channel, deadline);
          self.registered.push(deadline);
        }
        Effect::CancelTimer { channel } => {
          self.armed.remove(&channel);
          self.cancelled += 1;
        }
      }
    }

    let bytes = codec::write(&soup).unwrap();
    self.soup = Some(codec::read(&bytes, &RemapTable::new()).unwrap());
    Ok(())
  }

  fn inject(&mut self, channel: ChannelId, message: Message) {
    self.soup.as_mut().unwrap().send(channel, message);
    self.run().unwrap();
  }

  /// Move the clock one second at a time, firing due timers on the way.
  fn advance(&mut self, seconds: i64) {
    for _ in 0..seconds {
      self.clock.advance(Duration::seconds(1));
      let now = self.clock.now();
      let due: Vec<ChannelId> = self
        .armed
        .iter()
        .filter(|(_, deadline)| **deadline <= now)
        .map(|(channel, _)| *channel)
        .collect();
      for channel in due {
        self.armed.remove(&channel);
        self.inject(channel, Message::Timeout);
      }
    }
  }

  fn root_messages(&mut self) -> Vec<Message> {
    let soup = self.soup.as_mut().unwrap();
    let root = soup.global().root.unwrap();
    soup.take_messages(root.parent)
  }

  fn terminate(&mut self) {
    let root = self.soup.as_ref().unwrap().global().root.unwrap();
    self.inject(root.termination, Message::Terminate);
  }

  fn at(&self, seconds: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(seconds)
  }
}

fn wait_for(seconds: u32) -> ActivityKind {
  ActivityKind::Wait {
    deadline: Deadline::For(Expression::new(format!("PT{seconds}S"))),
  }
}

/// A scope whose body waits `body_seconds` with one alarm running `nested`.
fn alarm_process(body: ActivityKind, alarm: impl FnOnce(ActivityRef) -> AlarmDef) -> ProcessDef {
  let mut builder = ProcessDefBuilder::new("alarms", "alarms");
  let body = builder.activity("body", body);
  let nested = builder.activity("nested", wait_for(1));
  let root = builder.activity(
    "root",
    ActivityKind::Scope {
      body,
      alarms: vec![alarm(nested)],
      compensation: None,
    },
  );
  builder.build(root).unwrap()
}

fn completed_without_fault(messages: &[Message]) -> bool {
  matches!(messages, [Message::Completed { fault: None, .. }])
}

#[test]
fn test_for_alarm_fires_once_after_duration() {
  let process = alarm_process(wait_for(60), |nested| {
    AlarmDef::builder(nested).for_expr("PT10S").unwrap().build().unwrap()
  });
  let mut harness = Harness::new(process);
  assert_eq!(harness.registered, vec![harness.at(60), harness.at(10)]);

  harness.advance(9);
  assert_eq!(harness.registered.len(), 2, "alarm must not fire early");

  harness.advance(1);
  assert_eq!(harness.registered.last(), Some(&harness.at(11)));

  harness.advance(50);
  assert_eq!(harness.registered.len(), 3, "a 'for' alarm fires at most once");
  assert!(completed_without_fault(&harness.root_messages()));
  assert_eq!(harness.state, InstanceState::Terminated);
}

#[test]
fn test_repeat_alarm_rearms_after_each_completion() {
  let process = alarm_process(wait_for(35), |nested| {
    AlarmDef::builder(nested)
      .repeat_expr("PT10S")
      .unwrap()
      .build()
      .unwrap()
  });
  let mut harness = Harness::new(process);
  harness.advance(35);

  let alarm_deadlines: Vec<_> = harness.registered[1..].to_vec();
  assert_eq!(
    alarm_deadlines,
    [10, 11, 21, 22, 32, 33, 43].map(|s| harness.at(s)).to_vec()
  );
  assert!(completed_without_fault(&harness.root_messages()));
  assert!(harness.armed.is_empty(), "pending repeat must be cancelled");
}

#[test]
fn test_stop_while_waiting_completes_without_firing() {
  let process = alarm_process(ActivityKind::Empty, |nested| {
    AlarmDef::builder(nested).for_expr("PT10S").unwrap().build().unwrap()
  });
  let mut harness = Harness::new(process);

  assert!(completed_without_fault(&harness.root_messages()));
  assert_eq!(harness.state, InstanceState::Terminated);
  assert_eq!(harness.registered, vec![harness.at(10)]);
  assert_eq!(harness.cancelled, 1);

  harness.advance(20);
  assert_eq!(harness.registered.len(), 1);
}

#[test]
fn test_stale_timer_expiry_is_a_no_op() {
  let process = alarm_process(ActivityKind::Empty, |nested| {
    AlarmDef::builder(nested).for_expr("PT10S").unwrap().build().unwrap()
  });
  let program = InstanceProgram::new(Arc::new(process), Arc::new(LiteralEvaluator));
  let clock = ManualClock::new(t0());

  let mut vpu = Vpu::new(&program, &clock, VpuConfig::default(), program.new_soup());
  vpu.execute().unwrap();
  let timer = match vpu.soup_mut().drain_effects().as_slice() {
    [Effect::RegisterTimer { channel, .. }, Effect::CancelTimer { .. }] => *channel,
    other => panic!("unexpected effects {other:?}"),
  };

  vpu.inject(timer, Message::Timeout);
  let outcome = vpu.execute().unwrap();
  assert_eq!(outcome.reductions, 0);
  assert_eq!(outcome.state, InstanceState::Terminated);
}

#[test]
fn test_terminate_while_active_terminates_the_child() {
  let mut builder = ProcessDefBuilder::new("alarms", "alarms");
  let body = builder.activity("body", wait_for(60));
  let nested = builder.activity("nested", wait_for(30));
  let root = builder.activity(
    "root",
    ActivityKind::Scope {
      body,
      alarms: vec![AlarmDef::builder(nested).for_expr("PT1S").unwrap().build().unwrap()],
      compensation: None,
    },
  );
  let mut harness = Harness::new(builder.build(root).unwrap());

  harness.advance(1);
  assert_eq!(harness.registered.last(), Some(&harness.at(31)));

  harness.terminate();
  assert!(completed_without_fault(&harness.root_messages()));
  assert!(harness.armed.is_empty(), "body and child timers are cancelled");
  assert_eq!(harness.state, InstanceState::Terminated);
}

#[test]
fn test_stop_while_active_lets_child_finish() {
  let mut builder = ProcessDefBuilder::new("alarms", "alarms");
  let body = builder.activity("body", wait_for(11));
  let nested = builder.activity("nested", wait_for(5));
  let root = builder.activity(
    "root",
    ActivityKind::Scope {
      body,
      alarms: vec![
        AlarmDef::builder(nested)
          .repeat_expr("PT10S")
          .unwrap()
          .build()
          .unwrap(),
      ],
      compensation: None,
    },
  );
  let mut harness = Harness::new(builder.build(root).unwrap());

  harness.advance(11);
  assert!(harness.root_messages().is_empty(), "the firing is still running");
  assert_eq!(harness.state, InstanceState::Suspended);

  harness.advance(4);
  assert!(completed_without_fault(&harness.root_messages()));
  assert_eq!(
    harness.registered,
    [11, 10, 15].map(|s| harness.at(s)).to_vec(),
    "a stopped alarm does not re-arm"
  );
  assert!(harness.armed.is_empty());
  assert_eq!(harness.state, InstanceState::Terminated);
}

#[test]
fn test_child_fault_wins_over_repeat() {
  let mut builder = ProcessDefBuilder::new("alarms", "alarms");
  let body = builder.activity("body", wait_for(60));
  let nested = builder.activity(
    "nested",
    ActivityKind::Throw {
      fault: "boom".to_string(),
    },
  );
  let root = builder.activity(
    "root",
    ActivityKind::Scope {
      body,
      alarms: vec![
        AlarmDef::builder(nested)
          .repeat_expr("PT10S")
          .unwrap()
          .build()
          .unwrap(),
      ],
      compensation: None,
    },
  );
  let mut harness = Harness::new(builder.build(root).unwrap());

  harness.advance(10);
  match harness.root_messages().as_slice() {
    [Message::Completed { fault: Some(fault), .. }] => assert_eq!(fault.name, "boom"),
    other => panic!("unexpected root messages {other:?}"),
  }
  assert_eq!(harness.registered, vec![harness.at(60), harness.at(10)]);
  assert!(harness.armed.is_empty(), "nothing is left armed");
  assert_eq!(harness.state, InstanceState::Terminated);
}

#[test]
fn test_compensate_request_is_forwarded_to_the_root() {
  let mut builder = ProcessDefBuilder::new("alarms", "alarms");
  let body = builder.activity("body", wait_for(60));
  let inner = builder.activity("inner", wait_for(30));
  let nested = builder.activity(
    "nested",
    ActivityKind::Sequence {
      children: vec![inner],
    },
  );
  let root = builder.activity(
    "root",
    ActivityKind::Scope {
      body,
      alarms: vec![AlarmDef::builder(nested).for_expr("PT1S").unwrap().build().unwrap()],
      compensation: None,
    },
  );
  let mut harness = Harness::new(builder.build(root).unwrap());
  harness.advance(1);

  let inner_parent = harness
    .soup
    .as_ref()
    .unwrap()
    .choices()
    .iter()
    .flat_map(|choice| choice.arms())
    .find_map(|arm| match &arm.handler {
      Handler::SequenceWaiting { child, .. } => Some(child.parent),
      _ => None,
    })
    .unwrap();
  let reply = ChannelId(9_999);
  harness.inject(inner_parent, Message::Compensate { scope: root, reply });

  assert_eq!(
    harness.root_messages(),
    vec![Message::Compensate { scope: root, reply }]
  );
  assert_eq!(harness.state, InstanceState::Suspended);

  harness.advance(59);
  assert!(completed_without_fault(&harness.root_messages()));
  assert_eq!(harness.state, InstanceState::Terminated);
}

#[test]
fn test_past_until_fires_immediately() {
  let process = alarm_process(wait_for(60), |nested| {
    AlarmDef::builder(nested)
      .until_expr("2000-01-01T00:00:00Z")
      .unwrap()
      .build()
      .unwrap()
  });
  let harness = Harness::new(process);
  assert_eq!(harness.registered, vec![harness.at(60), harness.at(1)]);
}

#[test]
fn test_alarm_without_expressions_waits_for_stop() {
  let process = alarm_process(wait_for(5), |nested| AlarmDef::builder(nested).build().unwrap());
  let mut harness = Harness::new(process);
  assert_eq!(harness.registered, vec![harness.at(5)]);

  harness.advance(5);
  assert!(completed_without_fault(&harness.root_messages()));
  assert_eq!(harness.registered.len(), 1);
}

struct FaultingEvaluator;

impl ExpressionEvaluator for FaultingEvaluator {
  fn evaluate_duration(
    &self,
    expression: &Expression,
    cx: &EvaluationContext<'_>,
  ) -> Result<Duration, EvaluationFailure> {
    match expression.as_str().strip_prefix("fault:") {
      Some(name) => Err(BusinessFault::new(name).into()),
      None => LiteralEvaluator.evaluate_duration(expression, cx),
    }
  }

  fn evaluate_deadline(
    &self,
    expression: &Expression,
    cx: &EvaluationContext<'_>,
  ) -> Result<DateTime<Utc>, EvaluationFailure> {
    LiteralEvaluator.evaluate_deadline(expression, cx)
  }
}

#[test]
fn test_business_fault_completes_scope_with_fault() {
  let process = alarm_process(wait_for(60), |nested| {
    AlarmDef::builder(nested)
      .for_expr("fault:uninitializedVariable")
      .unwrap()
      .build()
      .unwrap()
  });
  let mut harness = Harness::with_evaluator(process, Arc::new(FaultingEvaluator));

  match harness.root_messages().as_slice() {
    [Message::Completed { fault: Some(fault), .. }] => {
      assert_eq!(fault.name, "uninitializedVariable");
      assert_eq!(fault.explanation.as_deref(), Some("fault:uninitializedVariable"));
    }
    other => panic!("unexpected root messages {other:?}"),
  }
  assert!(harness.armed.is_empty(), "the body is terminated");
}

#[test]
fn test_repeat_fault_after_firing() {
  let process = alarm_process(wait_for(60), |nested| {
    AlarmDef::builder(nested)
      .for_expr("PT2S")
      .unwrap()
      .repeat_expr("fault:noRepeat")
      .unwrap()
      .build()
      .unwrap()
  });
  let mut harness = Harness::with_evaluator(process, Arc::new(FaultingEvaluator));
  harness.advance(3);

  match harness.root_messages().as_slice() {
    [Message::Completed { fault: Some(fault), .. }] => assert_eq!(fault.name, "noRepeat"),
    other => panic!("unexpected root messages {other:?}"),
  }
}

#[test]
fn test_evaluation_error_is_unrecoverable() {
  let process = alarm_process(wait_for(60), |nested| {
    AlarmDef::builder(nested).for_expr("soon").unwrap().build().unwrap()
  });
  let program = InstanceProgram::new(Arc::new(process), Arc::new(LiteralEvaluator));
  let clock = ManualClock::new(t0());
  let mut vpu = Vpu::new(&program, &clock, VpuConfig::default(), program.new_soup());

  let err = vpu.execute().unwrap_err();
  assert!(matches!(
    err,
    ReductionError::Process(RuntimeError::InvalidProcess(_))
  ));
}
