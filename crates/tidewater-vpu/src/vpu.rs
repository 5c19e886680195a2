use tracing::{debug, trace};

use crate::channel::ChannelId;
use crate::clock::Clock;
use crate::context::Context;
use crate::error::ReductionError;
use crate::program::Program;
use crate::soup::ExecutionSoup;

/// Tuning for a VPU run.
#[derive(Debug, Clone)]
pub struct VpuConfig {
  /// Upper bound of reductions in a single [`Vpu::execute`] call.
  pub max_reductions: usize,
}

impl Default for VpuConfig {
  fn default() -> Self {
    Self {
      max_reductions: 10_000,
    }
  }
}

/// Where an instance stands after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
  /// Listeners remain; the soup must be persisted.
  Suspended,
  /// No process is left.
  Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
  pub reductions: usize,
  pub state: InstanceState,
}

/// Reduces one instance's soup.
///
/// The VPU owns the soup while it runs. When a run fails the soup is in an
/// unspecified intermediate state and must be discarded; the caller resumes
/// from the last persisted blob instead.
pub struct Vpu<'p, P: Program> {
  program: &'p P,
  clock: &'p dyn Clock,
  config: VpuConfig,
  soup: ExecutionSoup<P>,
}

impl<'p, P: Program> Vpu<'p, P> {
  pub fn new(program: &'p P, clock: &'p dyn Clock, config: VpuConfig, soup: ExecutionSoup<P>) -> Self {
    Self {
      program,
      clock,
      config,
      soup,
    }
  }

  pub fn soup(&self) -> &ExecutionSoup<P> {
    &self.soup
  }

  pub fn soup_mut(&mut self) -> &mut ExecutionSoup<P> {
    &mut self.soup
  }

  pub fn into_soup(self) -> ExecutionSoup<P> {
    self.soup
  }

  /// Deliver a message from outside the instance.
  pub fn inject(&mut self, channel: ChannelId, message: P::Message) {
    self.soup.send(channel, message);
  }

  /// Spawn a process from outside the instance.
  pub fn spawn(&mut self, process: P::Process) {
    self.soup.instance(process);
  }

  /// Perform a single reduction. Returns `false` when nothing could be reduced.
  pub fn step(&mut self) -> Result<bool, ReductionError<P::Error>> {
    if let Some(process) = self.soup.pop_runnable() {
      trace!(?process, "running process");
      let mut cx = Context::new(&mut self.soup, self.clock);
      self
        .program
        .run(process, &mut cx)
        .map_err(ReductionError::Process)?;
      return Ok(true);
    }

    if let Some((handler, channel, message)) = self.soup.pop_match() {
      trace!(%channel, ?message, ?handler, "matched receive");
      let mut cx = Context::new(&mut self.soup, self.clock);
      self
        .program
        .receive(handler, channel, message, &mut cx)
        .map_err(ReductionError::Process)?;
      return Ok(true);
    }

    Ok(false)
  }

  /// Reduce until no runnable process and no matching send/receive remain.
  pub fn execute(&mut self) -> Result<RunOutcome, ReductionError<P::Error>> {
    let mut reductions = 0;
    while self.step()? {
      reductions += 1;
      if reductions >= self.config.max_reductions && self.has_work() {
        return Err(ReductionError::LimitExceeded {
          limit: self.config.max_reductions,
        });
      }
    }

    let state = if self.soup.listener_count() == 0 {
      InstanceState::Terminated
    } else {
      InstanceState::Suspended
    };
    debug!(reductions, ?state, "vpu quiescent");

    Ok(RunOutcome { reductions, state })
  }

  fn has_work(&self) -> bool {
    self.soup.runnable_count() > 0
      || self.soup.choices().iter().any(|choice| {
        choice
          .arms()
          .iter()
          .any(|arm| self.soup.pending_messages(arm.channel) > 0)
      })
  }
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;
  use crate::testing::{Counter, CounterError, CounterHandler, CounterProcess, Tick};
  use crate::{Choice, Effect, ManualClock};

  fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap())
  }

  #[test]
  fn test_runs_to_quiescence() {
    let clock = clock();
    let mut soup = ExecutionSoup::<Counter>::new(0);
    let channel = soup.new_channel();
    soup.instance(CounterProcess::Start { channel });

    let mut vpu = Vpu::new(&Counter, &clock, VpuConfig::default(), soup);
    let outcome = vpu.execute().unwrap();
    assert_eq!(outcome.state, InstanceState::Suspended);
    assert_eq!(outcome.reductions, 1);

    vpu.inject(channel, Tick::Tick);
    vpu.inject(channel, Tick::Tick);
    let outcome = vpu.execute().unwrap();
    assert_eq!(outcome.state, InstanceState::Terminated);
    assert_eq!(*vpu.soup().global(), 2);
  }

  #[test]
  fn test_choice_fires_once_on_first_ready_arm() {
    let clock = clock();
    let mut soup = ExecutionSoup::<Counter>::new(0);
    let a = soup.new_channel();
    let b = soup.new_channel();
    soup.object(
      Choice::new()
        .or(a, CounterHandler::Named { name: "a".into() })
        .or(b, CounterHandler::Named { name: "b".into() }),
    );
    soup.send(b, Tick::Tick);
    soup.send(a, Tick::Tick);

    let mut vpu = Vpu::new(&Counter, &clock, VpuConfig::default(), soup);
    vpu.execute().unwrap();

    let mut soup = vpu.into_soup();
    let replies = soup.take_messages(crate::ChannelId(1000));
    assert_eq!(replies, vec![Tick::Done { name: "a".into() }]);
    // The losing arm was consumed with the choice; its message stays queued.
    assert_eq!(soup.listener_count(), 0);
    assert_eq!(soup.pending_messages(b), 1);
  }

  #[test]
  fn test_process_error_propagates() {
    let clock = clock();
    let mut soup = ExecutionSoup::<Counter>::new(0);
    let channel = soup.new_channel();
    soup.instance(CounterProcess::Start { channel });
    soup.send(channel, Tick::Boom);

    let mut vpu = Vpu::new(&Counter, &clock, VpuConfig::default(), soup);
    let result = vpu.execute();
    assert!(matches!(
      result,
      Err(ReductionError::Process(CounterError::Boom(c))) if c == channel
    ));
  }

  #[test]
  fn test_reduction_limit() {
    let clock = clock();
    let mut soup = ExecutionSoup::<Counter>::new(0);
    soup.instance(CounterProcess::Spin);

    let config = VpuConfig { max_reductions: 50 };
    let mut vpu = Vpu::new(&Counter, &clock, config, soup);
    assert!(matches!(
      vpu.execute(),
      Err(ReductionError::LimitExceeded { limit: 50 })
    ));
  }

  #[test]
  fn test_closed_channel_drops_messages() {
    let clock = clock();
    let mut soup = ExecutionSoup::<Counter>::new(0);
    let channel = soup.new_channel();
    soup.instance(CounterProcess::Start { channel });
    soup.close(channel);
    soup.send(channel, Tick::Tick);

    let mut vpu = Vpu::new(&Counter, &clock, VpuConfig::default(), soup);
    let outcome = vpu.execute().unwrap();
    assert_eq!(outcome.state, InstanceState::Suspended);
    assert_eq!(*vpu.soup().global(), 0);
  }

  #[test]
  fn test_timer_effects_and_arming() {
    let clock = clock();
    let mut soup = ExecutionSoup::<Counter>::new(0);
    let channel = soup.new_channel();
    soup.instance(CounterProcess::Arm {
      channel,
      seconds: 30,
    });

    let mut vpu = Vpu::new(&Counter, &clock, VpuConfig::default(), soup);
    vpu.execute().unwrap();

    let deadline = clock.now() + chrono::Duration::seconds(30);
    let effects = vpu.soup_mut().drain_effects();
    assert_eq!(effects, vec![Effect::RegisterTimer { channel, deadline }]);
    assert_eq!(
      vpu.soup().armed_timers().collect::<Vec<_>>(),
      vec![(channel, deadline)]
    );

    vpu.inject(channel, Tick::Tick);
    assert_eq!(vpu.soup().armed_timers().count(), 0);
    assert_eq!(vpu.execute().unwrap().state, InstanceState::Terminated);
    assert!(vpu.soup_mut().drain_effects().is_empty());
  }
}
