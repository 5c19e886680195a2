use chrono::{DateTime, Utc};

use crate::channel::ChannelId;
use crate::clock::Clock;
use crate::program::{Choice, Program};
use crate::soup::ExecutionSoup;

/// What a process may do while it is being reduced.
pub struct Context<'a, P: Program> {
  soup: &'a mut ExecutionSoup<P>,
  clock: &'a dyn Clock,
}

impl<'a, P: Program> Context<'a, P> {
  pub(crate) fn new(soup: &'a mut ExecutionSoup<P>, clock: &'a dyn Clock) -> Self {
    Self { soup, clock }
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  pub fn new_channel(&mut self) -> ChannelId {
    self.soup.new_channel()
  }

  /// Next value of the instance-wide monotonic counter.
  pub fn gen_monotonic(&mut self) -> u64 {
    self.soup.gen_monotonic()
  }

  /// Spawn a process.
  pub fn instance(&mut self, process: P::Process) {
    self.soup.instance(process);
  }

  /// Suspend on a choice of receives.
  pub fn object(&mut self, choice: Choice<P::Handler>) {
    self.soup.object(choice);
  }

  pub fn send(&mut self, channel: ChannelId, message: P::Message) {
    self.soup.send(channel, message);
  }

  pub fn close(&mut self, channel: ChannelId) {
    self.soup.close(channel);
  }

  /// Ask the driver to deliver a timer message to `channel` at `deadline`.
  pub fn register_timer(&mut self, channel: ChannelId, deadline: DateTime<Utc>) {
    self.soup.register_timer(channel, deadline);
  }

  pub fn cancel_timer(&mut self, channel: ChannelId) {
    self.soup.cancel_timer(channel);
  }

  pub fn global(&self) -> &P::Global {
    self.soup.global()
  }

  pub fn global_mut(&mut self) -> &mut P::Global {
    self.soup.global_mut()
  }
}
