//! Instance-wide data shared by every process of an instance.
//!
//! The outstanding-request bookkeeping has changed shape once. Instances
//! persisted before the change carry [`RequestState::OutstandingRequests`];
//! new instances and migrated ones carry [`RequestState::RequestManager`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tidewater_vpu::ChannelId;

/// The channels linking the root activity to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootLink {
  pub termination: ChannelId,
  pub parent: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalData {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub root: Option<RootLink>,
  pub requests: RequestState,
}

impl GlobalData {
  pub fn new() -> Self {
    Self {
      root: None,
      requests: RequestState::current(),
    }
  }
}

impl Default for GlobalData {
  fn default() -> Self {
    Self::new()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape")]
pub enum RequestState {
  #[serde(rename = "outstanding-requests/v1")]
  OutstandingRequests(OutstandingRequests),
  #[serde(rename = "request-manager/v2")]
  RequestManager(RequestManager),
}

impl RequestState {
  /// Empty state in the current shape.
  pub fn current() -> Self {
    RequestState::RequestManager(RequestManager::default())
  }

  pub fn is_current(&self) -> bool {
    matches!(self, RequestState::RequestManager(_))
  }
}

/// One open request-response exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutstandingRequest {
  pub partner_link: String,
  pub operation: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub correlation_key: Option<String>,
  /// Where the reply is delivered.
  pub channel: ChannelId,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message_exchange: Option<String>,
}

impl OutstandingRequest {
  /// Key identifying the conversation the request belongs to.
  pub fn key(&self) -> RequestKey {
    RequestKey {
      partner_link: self.partner_link.clone(),
      operation: self.operation.clone(),
      correlation_key: self.correlation_key.clone(),
    }
  }
}

/// Compared field by field, so an absent correlation key and an empty one
/// are different conversations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
  pub partner_link: String,
  pub operation: String,
  pub correlation_key: Option<String>,
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?}/{:?}", self.partner_link, self.operation)?;
    match &self.correlation_key {
      Some(correlation_key) => write!(f, "/{correlation_key:?}"),
      None => Ok(()),
    }
  }
}

/// Obsolete shape: a flat list, scanned linearly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutstandingRequests {
  #[serde(default)]
  pub requests: Vec<OutstandingRequest>,
}

impl OutstandingRequests {
  /// Convert into the current shape. Fails if two requests share a key,
  /// which the current shape cannot represent.
  pub fn into_request_manager(self) -> Result<RequestManager, ConflictingRequest> {
    let mut manager = RequestManager::default();
    for request in self.requests {
      manager.register(request)?;
    }
    Ok(manager)
  }
}

pub type RequestEntry = OutstandingRequest;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("conflicting outstanding request for {key}")]
pub struct ConflictingRequest {
  pub key: RequestKey,
}

/// Current shape: requests indexed by conversation key.
///
/// Persisted as the list of entries in key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RequestList", into = "RequestList")]
pub struct RequestManager {
  entries: BTreeMap<RequestKey, RequestEntry>,
}

#[derive(Serialize, Deserialize)]
struct RequestList {
  #[serde(default)]
  entries: Vec<RequestEntry>,
}

impl TryFrom<RequestList> for RequestManager {
  type Error = ConflictingRequest;

  fn try_from(list: RequestList) -> Result<Self, Self::Error> {
    let mut manager = RequestManager::default();
    for entry in list.entries {
      manager.register(entry)?;
    }
    Ok(manager)
  }
}

impl From<RequestManager> for RequestList {
  fn from(manager: RequestManager) -> Self {
    RequestList {
      entries: manager.entries.into_values().collect(),
    }
  }
}

impl RequestManager {
  pub fn register(&mut self, request: OutstandingRequest) -> Result<(), ConflictingRequest> {
    let key = request.key();
    if self.entries.contains_key(&key) {
      return Err(ConflictingRequest { key });
    }
    self.entries.insert(key, request);
    Ok(())
  }

  pub fn find(
    &self,
    partner_link: &str,
    operation: &str,
    correlation_key: Option<&str>,
  ) -> Option<&RequestEntry> {
    let key = RequestKey {
      partner_link: partner_link.to_string(),
      operation: operation.to_string(),
      correlation_key: correlation_key.map(str::to_string),
    };
    self.entries.get(&key)
  }

  /// Release every request replying on `channel`.
  pub fn release(&mut self, channel: ChannelId) -> Vec<RequestEntry> {
    let keys: Vec<RequestKey> = self
      .entries
      .iter()
      .filter(|(_, entry)| entry.channel == channel)
      .map(|(key, _)| key.clone())
      .collect();
    keys
      .into_iter()
      .filter_map(|key| self.entries.remove(&key))
      .collect()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn entries(&self) -> impl Iterator<Item = &RequestEntry> {
    self.entries.values()
  }
}
