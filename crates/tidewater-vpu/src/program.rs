use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::channel::ChannelId;
use crate::context::Context;

/// The behavior reduced by the VPU.
///
/// All state a program keeps between reductions lives in the associated
/// types, which are persisted with the soup. Polymorphic types should carry a
/// `"shape"` discriminator so stored soups can be remapped (see
/// [`crate::RemapTable`]).
pub trait Program: Sized {
  /// Instance-wide data shared by every process of the instance.
  type Global: Serialize + DeserializeOwned;
  /// A runnable process template.
  type Process: Serialize + DeserializeOwned + fmt::Debug;
  /// A continuation waiting for a message as one arm of a [`Choice`].
  type Handler: Serialize + DeserializeOwned + fmt::Debug;
  type Message: Serialize + DeserializeOwned + fmt::Debug;
  type Error: std::error::Error + 'static;

  /// Run a process to completion. It may spawn processes, register choices
  /// and send messages through `cx`.
  fn run(&self, process: Self::Process, cx: &mut Context<'_, Self>) -> Result<(), Self::Error>;

  /// Continue `handler` with the message that matched on `channel`.
  fn receive(
    &self,
    handler: Self::Handler,
    channel: ChannelId,
    message: Self::Message,
    cx: &mut Context<'_, Self>,
  ) -> Result<(), Self::Error>;
}

/// One receive inside a choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arm<H> {
  pub channel: ChannelId,
  pub handler: H,
}

/// An ordered set of pending receives of which exactly one fires.
///
/// The first arm, in the order they were added, whose channel has a queued
/// message wins; the whole choice is then consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice<H> {
  arms: Vec<Arm<H>>,
}

impl<H> Choice<H> {
  pub fn new() -> Self {
    Self { arms: Vec::new() }
  }

  /// Add a receive on `channel`.
  pub fn or(mut self, channel: ChannelId, handler: H) -> Self {
    self.arms.push(Arm { channel, handler });
    self
  }

  pub fn arms(&self) -> &[Arm<H>] {
    &self.arms
  }

  pub fn is_empty(&self) -> bool {
    self.arms.is_empty()
  }

  pub(crate) fn into_arm(self, index: usize) -> Option<Arm<H>> {
    self.arms.into_iter().nth(index)
  }
}

impl<H> Default for Choice<H> {
  fn default() -> Self {
    Self::new()
  }
}
