use std::sync::Arc;

use tidewater_config::ProcessDef;
use tidewater_runtime::{
  ExpressionEvaluator, InstanceProgram, InstanceSoup, LiteralEvaluator, Message,
};
use tidewater_store::{InstanceLocks, InstanceRecord, InstanceStatus, InstanceStore};
use tidewater_vpu::{ChannelId, Clock, Effect, InstanceState, RemapTable, SystemClock, Vpu, codec};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::registry::ProcessRegistry;
use crate::timer::{TimerEvent, TimerService};

/// What a reduction starts with, besides the persisted soup.
#[derive(Debug)]
enum Injection {
  /// Run the runnables of a freshly created soup.
  Start,
  Message { channel: ChannelId, message: Message },
  /// Terminate the root activity.
  Terminate,
}

/// Owns deployed processes and reduces their instances.
pub struct Engine {
  store: Arc<dyn InstanceStore>,
  locks: InstanceLocks,
  registry: ProcessRegistry,
  timers: Arc<dyn TimerService>,
  clock: Arc<dyn Clock>,
  evaluator: Arc<dyn ExpressionEvaluator>,
  workers: Semaphore,
  config: EngineConfig,
}

impl Engine {
  pub fn new(
    store: Arc<dyn InstanceStore>,
    timers: Arc<dyn TimerService>,
    config: EngineConfig,
  ) -> Self {
    Self {
      store,
      locks: InstanceLocks::new(),
      registry: ProcessRegistry::new(),
      timers,
      clock: Arc::new(SystemClock),
      evaluator: Arc::new(LiteralEvaluator),
      workers: Semaphore::new(config.max_workers.max(1)),
      config,
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
    self.evaluator = evaluator;
    self
  }

  /// The instance locks reductions run under. Migrations must share them.
  pub fn locks(&self) -> &InstanceLocks {
    &self.locks
  }

  pub fn registry(&self) -> &ProcessRegistry {
    &self.registry
  }

  pub fn store(&self) -> &Arc<dyn InstanceStore> {
    &self.store
  }

  /// Deploy a process definition. New instances use it immediately.
  pub fn register_process(&self, definition: ProcessDef, remap: RemapTable) {
    let process_id = definition.process_id.clone();
    let program = InstanceProgram::new(Arc::new(definition), self.evaluator.clone());
    if self.registry.insert(program, remap) {
      info!(%process_id, "process redeployed");
    } else {
      info!(%process_id, "process deployed");
    }
  }

  /// Create an instance and run it until it first suspends.
  pub async fn start_instance(&self, process_id: &str) -> Result<Uuid, EngineError> {
    let registered = self.registry.get(process_id)?;
    let soup = registered.program.new_soup();
    let record = InstanceRecord::new(process_id, codec::write(&soup)?);
    let instance_id = record.instance_id;
    self.store.create_instance(&record).await?;
    info!(%instance_id, %process_id, "instance created");

    self.reduce(instance_id, Injection::Start).await?;
    Ok(instance_id)
  }

  /// Deliver a message to a channel of an instance and reduce it.
  pub async fn deliver(
    &self,
    instance_id: Uuid,
    channel: ChannelId,
    message: Message,
  ) -> Result<InstanceStatus, EngineError> {
    self
      .reduce(instance_id, Injection::Message { channel, message })
      .await
  }

  /// Ask the root activity of an instance to terminate.
  pub async fn terminate(&self, instance_id: Uuid) -> Result<InstanceStatus, EngineError> {
    self.reduce(instance_id, Injection::Terminate).await
  }

  pub async fn status(&self, instance_id: Uuid) -> Result<InstanceStatus, EngineError> {
    Ok(self.store.get_instance(instance_id).await?.status)
  }

  #[instrument(skip(self, injection), fields(%instance_id))]
  async fn reduce(
    &self,
    instance_id: Uuid,
    injection: Injection,
  ) -> Result<InstanceStatus, EngineError> {
    let _permit = self
      .workers
      .acquire()
      .await
      .map_err(|_| EngineError::ShuttingDown)?;
    let _guard = self.locks.lock(instance_id).await;

    let record = self.store.get_instance(instance_id).await?;
    let Some(bytes) = record.execution_state.filter(|_| !record.status.is_final()) else {
      debug!(status = ?record.status, ?injection, "instance is final, dropping event");
      return Ok(record.status);
    };

    let registered = self.registry.get(&record.process_id)?;
    let mut soup: InstanceSoup = codec::read::<InstanceProgram>(&bytes, &registered.remap)
      .map_err(|source| EngineError::CorruptState {
        instance_id,
        source,
      })?;

    match injection {
      Injection::Start => {}
      Injection::Message { channel, message } => soup.send(channel, message),
      Injection::Terminate => {
        let root = soup.global().root.ok_or(EngineError::NotStarted(instance_id))?;
        soup.send(root.termination, Message::Terminate);
      }
    }

    let (result, mut soup) = {
      let mut vpu = Vpu::new(
        &registered.program,
        self.clock.as_ref(),
        self.config.vpu.clone(),
        soup,
      );
      let result = vpu.execute();
      (result, vpu.into_soup())
    };

    let outcome = match result {
      Ok(outcome) => outcome,
      Err(source) => {
        error!(error = %source, "reduction failed, instance is broken");
        self
          .store
          .mark_broken(instance_id, &source.to_string())
          .await?;
        return Err(EngineError::Reduction {
          instance_id,
          source,
        });
      }
    };
    debug!(reductions = outcome.reductions, state = ?outcome.state, "reduction finished");

    let effects = soup.drain_effects();
    let root = soup.global().root;
    let completion = root.and_then(|root| {
      soup
        .take_messages(root.parent)
        .into_iter()
        .find_map(|message| match message {
          Message::Completed { fault, .. } => Some(fault),
          other => {
            warn!(message = other.shape(), "unhandled message at the root");
            None
          }
        })
    });

    let status = match completion {
      Some(fault) => {
        let status = if fault.is_some() {
          InstanceStatus::Faulted
        } else {
          InstanceStatus::Completed
        };
        let fault = fault.map(|f| f.name);
        self
          .store
          .complete_instance(instance_id, status, fault.clone(), self.clock.now())
          .await?;
        info!(?status, ?fault, "instance finished");
        status
      }
      None if outcome.state == InstanceState::Terminated => {
        error!("instance has no listener left but never completed");
        self
          .store
          .mark_broken(instance_id, "no listener left without completing")
          .await?;
        InstanceStatus::Broken
      }
      None => {
        let bytes = codec::write(&soup)?;
        self.store.set_execution_state(instance_id, &bytes).await?;
        InstanceStatus::Active
      }
    };

    for effect in effects {
      match effect {
        Effect::RegisterTimer { channel, deadline } => {
          self.timers.register(instance_id, channel, deadline)
        }
        Effect::CancelTimer { channel } => self.timers.cancel(instance_id, channel),
      }
    }
    if status.is_final() {
      for (channel, _) in soup.armed_timers() {
        self.timers.cancel(instance_id, channel);
      }
      self.locks.forget(instance_id);
    }

    Ok(status)
  }

  /// Re-register the armed timers of every active instance of every
  /// registered process. Returns the number of timers registered.
  pub async fn recover(&self) -> Result<usize, EngineError> {
    let mut registered_timers = 0;
    for (process_id, remap) in self.registry.list() {
      for instance_id in self.store.active_instances(&process_id).await? {
        let _guard = self.locks.lock(instance_id).await;
        let Some(bytes) = self.store.execution_state(instance_id).await? else {
          continue;
        };
        let soup = match codec::read::<InstanceProgram>(&bytes, &remap) {
          Ok(soup) => soup,
          Err(e) => {
            error!(%instance_id, error = %e, "cannot recover instance");
            continue;
          }
        };
        for (channel, deadline) in soup.armed_timers() {
          self.timers.register(instance_id, channel, deadline);
          registered_timers += 1;
        }
      }
    }
    info!(timers = registered_timers, "recovered armed timers");
    Ok(registered_timers)
  }

  /// Turn timer events into reductions until `cancel` fires or the timer
  /// service goes away. In-flight reductions are awaited before returning.
  pub async fn run(
    self: Arc<Self>,
    mut events: mpsc::UnboundedReceiver<TimerEvent>,
    cancel: CancellationToken,
  ) {
    info!(max_workers = self.config.max_workers, "engine started");
    let mut tasks = JoinSet::new();

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("engine cancelled");
          break;
        }
        Some(result) = tasks.join_next(), if !tasks.is_empty() => {
          if let Err(e) = result {
            error!(error = %e, "reduction task failed");
          }
        }
        event = events.recv() => {
          let Some(event) = event else {
            info!("timer service closed");
            break;
          };
          let (instance_id, channel, message) = match event {
            TimerEvent::Timeout { instance, channel } => (instance, channel, Message::Timeout),
            TimerEvent::Cancelled { instance, channel } => {
              (instance, channel, Message::TimerCancelled)
            }
          };
          let engine = self.clone();
          tasks.spawn(async move {
            if let Err(e) = engine.deliver(instance_id, channel, message).await {
              error!(%instance_id, error = %e, "timer delivery failed");
            }
          });
        }
      }
    }

    self.timers.shutdown();
    while let Some(result) = tasks.join_next().await {
      if let Err(e) = result {
        error!(error = %e, "reduction task failed");
      }
    }
    info!("engine stopped");
  }
}
