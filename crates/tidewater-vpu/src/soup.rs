use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::ChannelId;
use crate::effect::Effect;
use crate::program::{Choice, Program};

/// The complete suspended state of one instance.
///
/// Everything but the effect outbox is persisted. The soup is mutated only by
/// the [`crate::Vpu`] reducing it, or by the driver injecting messages
/// between runs.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = ""))]
pub struct ExecutionSoup<P: Program> {
  global: P::Global,
  next_channel: u64,
  next_monotonic: u64,
  runnables: VecDeque<P::Process>,
  choices: Vec<Choice<P::Handler>>,
  messages: BTreeMap<ChannelId, VecDeque<P::Message>>,
  closed: BTreeSet<ChannelId>,
  timers: BTreeMap<ChannelId, DateTime<Utc>>,
  #[serde(skip)]
  outbox: Vec<Effect>,
}

impl<P: Program> ExecutionSoup<P> {
  pub fn new(global: P::Global) -> Self {
    Self {
      global,
      next_channel: 1,
      next_monotonic: 1,
      runnables: VecDeque::new(),
      choices: Vec::new(),
      messages: BTreeMap::new(),
      closed: BTreeSet::new(),
      timers: BTreeMap::new(),
      outbox: Vec::new(),
    }
  }

  pub fn global(&self) -> &P::Global {
    &self.global
  }

  pub fn global_mut(&mut self) -> &mut P::Global {
    &mut self.global
  }

  /// Replace the global data, returning the previous value.
  pub fn replace_global(&mut self, global: P::Global) -> P::Global {
    std::mem::replace(&mut self.global, global)
  }

  pub fn new_channel(&mut self) -> ChannelId {
    let id = ChannelId(self.next_channel);
    self.next_channel += 1;
    id
  }

  pub fn gen_monotonic(&mut self) -> u64 {
    let id = self.next_monotonic;
    self.next_monotonic += 1;
    id
  }

  /// Queue a process to run in a later reduction.
  pub fn instance(&mut self, process: P::Process) {
    self.runnables.push_back(process);
  }

  /// Register a choice of pending receives.
  pub fn object(&mut self, choice: Choice<P::Handler>) {
    if choice.is_empty() {
      return;
    }
    self.choices.push(choice);
  }

  /// Queue a message on `channel`. Messages for closed channels are dropped.
  pub fn send(&mut self, channel: ChannelId, message: P::Message) {
    if self.closed.contains(&channel) {
      debug!(%channel, ?message, "dropping message for closed channel");
      return;
    }
    self.timers.remove(&channel);
    self.messages.entry(channel).or_default().push_back(message);
  }

  /// Mark a channel as never listened on again.
  pub fn close(&mut self, channel: ChannelId) {
    self.messages.remove(&channel);
    self.closed.insert(channel);
  }

  pub fn is_closed(&self, channel: ChannelId) -> bool {
    self.closed.contains(&channel)
  }

  /// Remove and return every message queued on `channel`. Used by drivers
  /// that listen on a channel from outside the instance.
  pub fn take_messages(&mut self, channel: ChannelId) -> Vec<P::Message> {
    self
      .messages
      .remove(&channel)
      .map(Vec::from)
      .unwrap_or_default()
  }

  pub fn pending_messages(&self, channel: ChannelId) -> usize {
    self.messages.get(&channel).map_or(0, VecDeque::len)
  }

  pub fn register_timer(&mut self, channel: ChannelId, deadline: DateTime<Utc>) {
    self.timers.insert(channel, deadline);
    self.outbox.push(Effect::RegisterTimer { channel, deadline });
  }

  pub fn cancel_timer(&mut self, channel: ChannelId) {
    if self.timers.remove(&channel).is_some() {
      self.outbox.push(Effect::CancelTimer { channel });
    }
  }

  /// Timers registered and neither fired nor cancelled yet.
  pub fn armed_timers(&self) -> impl Iterator<Item = (ChannelId, DateTime<Utc>)> + '_ {
    self.timers.iter().map(|(channel, deadline)| (*channel, *deadline))
  }

  /// Take the effects requested since the last drain.
  pub fn drain_effects(&mut self) -> Vec<Effect> {
    std::mem::take(&mut self.outbox)
  }

  pub fn listener_count(&self) -> usize {
    self.choices.len()
  }

  pub fn runnable_count(&self) -> usize {
    self.runnables.len()
  }

  pub fn choices(&self) -> &[Choice<P::Handler>] {
    &self.choices
  }

  pub(crate) fn pop_runnable(&mut self) -> Option<P::Process> {
    self.runnables.pop_front()
  }

  /// Find the first choice, in registration order, with a matching message,
  /// and consume both.
  pub(crate) fn pop_match(&mut self) -> Option<(P::Handler, ChannelId, P::Message)> {
    let (choice_index, arm_index) = self.choices.iter().enumerate().find_map(|(ci, choice)| {
      choice
        .arms()
        .iter()
        .position(|arm| self.pending_messages(arm.channel) > 0)
        .map(|ai| (ci, ai))
    })?;

    let arm = self.choices.remove(choice_index).into_arm(arm_index)?;
    let queue = self.messages.get_mut(&arm.channel)?;
    let message = queue.pop_front()?;
    if queue.is_empty() {
      self.messages.remove(&arm.channel);
    }

    Some((arm.handler, arm.channel, message))
  }
}
