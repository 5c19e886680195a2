use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tidewater_vpu::ChannelId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// A timer outcome, to be delivered to `channel` of `instance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
  Timeout { instance: Uuid, channel: ChannelId },
  /// The timer service shut down before the timer expired.
  Cancelled { instance: Uuid, channel: ChannelId },
}

/// Schedules timer messages for instances.
pub trait TimerService: Send + Sync {
  fn register(&self, instance: Uuid, channel: ChannelId, at: DateTime<Utc>);

  /// Forget a timer. Does nothing if it already fired.
  fn cancel(&self, instance: Uuid, channel: ChannelId);

  /// Stop the service. Every pending timer delivers
  /// [`TimerEvent::Cancelled`].
  fn shutdown(&self);
}

type TimerKey = (Uuid, ChannelId);

struct Pending {
  id: u64,
  token: CancellationToken,
}

/// Timers backed by tokio sleeps; events are sent over an mpsc channel.
pub struct TokioTimerService {
  sender: mpsc::UnboundedSender<TimerEvent>,
  pending: Arc<Mutex<HashMap<TimerKey, Pending>>>,
  next_id: AtomicU64,
  shutdown: CancellationToken,
}

impl TokioTimerService {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let service = Self {
      sender,
      pending: Arc::new(Mutex::new(HashMap::new())),
      next_id: AtomicU64::new(0),
      shutdown: CancellationToken::new(),
    };
    (service, receiver)
  }

  pub fn pending(&self) -> usize {
    self.pending.lock().unwrap_or_else(|p| p.into_inner()).len()
  }
}

impl TimerService for TokioTimerService {
  fn register(&self, instance: Uuid, channel: ChannelId, at: DateTime<Utc>) {
    if self.shutdown.is_cancelled() {
      if self.sender.send(TimerEvent::Cancelled { instance, channel }).is_err() {
        debug!(%instance, %channel, "timer event dropped, receiver closed");
      }
      return;
    }

    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let token = self.shutdown.child_token();
    let previous = self.pending.lock().unwrap_or_else(|p| p.into_inner()).insert(
      (instance, channel),
      Pending {
        id,
        token: token.clone(),
      },
    );
    if let Some(previous) = previous {
      previous.token.cancel();
    }

    let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    let sender = self.sender.clone();
    let pending = self.pending.clone();
    let shutdown = self.shutdown.clone();

    tokio::spawn(async move {
      let event = tokio::select! {
        _ = token.cancelled() => {
          if !shutdown.is_cancelled() {
            return;
          }
          TimerEvent::Cancelled { instance, channel }
        }
        _ = tokio::time::sleep(delay) => TimerEvent::Timeout { instance, channel },
      };

      {
        let mut pending = pending.lock().unwrap_or_else(|p| p.into_inner());
        if pending.get(&(instance, channel)).is_some_and(|p| p.id == id) {
          pending.remove(&(instance, channel));
        }
      }
      if sender.send(event).is_err() {
        debug!(%instance, %channel, "timer event dropped, receiver closed");
      }
    });
  }

  fn cancel(&self, instance: Uuid, channel: ChannelId) {
    let pending = self
      .pending
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .remove(&(instance, channel));
    if let Some(pending) = pending {
      pending.token.cancel();
    }
  }

  fn shutdown(&self) {
    self.shutdown.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration as ChronoDuration;

  #[tokio::test]
  async fn test_timeout_is_delivered() {
    let (timers, mut events) = TokioTimerService::new();
    let instance = Uuid::new_v4();
    timers.register(instance, ChannelId(3), Utc::now() + ChronoDuration::milliseconds(20));

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
    assert_eq!(
      event,
      Some(TimerEvent::Timeout {
        instance,
        channel: ChannelId(3)
      })
    );
    assert_eq!(timers.pending(), 0);
  }

  #[tokio::test]
  async fn test_cancelled_timer_is_silent() {
    let (timers, mut events) = TokioTimerService::new();
    let instance = Uuid::new_v4();
    timers.register(instance, ChannelId(3), Utc::now() + ChronoDuration::milliseconds(20));
    timers.cancel(instance, ChannelId(3));
    timers.cancel(instance, ChannelId(3));

    let event = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
    assert!(event.is_err());
  }

  #[tokio::test]
  async fn test_shutdown_cancels_pending_timers() {
    let (timers, mut events) = TokioTimerService::new();
    let instance = Uuid::new_v4();
    timers.register(instance, ChannelId(3), Utc::now() + ChronoDuration::hours(1));
    timers.shutdown();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
    assert_eq!(
      event,
      Some(TimerEvent::Cancelled {
        instance,
        channel: ChannelId(3)
      })
    );

    timers.register(instance, ChannelId(4), Utc::now());
    assert_eq!(
      events.recv().await,
      Some(TimerEvent::Cancelled {
        instance,
        channel: ChannelId(4)
      })
    );
  }

  #[tokio::test]
  async fn test_register_after_shutdown_without_receiver() {
    let (timers, events) = TokioTimerService::new();
    drop(events);
    timers.shutdown();

    timers.register(Uuid::new_v4(), ChannelId(5), Utc::now());
    assert_eq!(timers.pending(), 0);
  }
}
