//! Interests and the instance records they select.
//!
//! An [`Interest`] is a predicate over service instances. The transport
//! layer only carries lists of them; matching is left to the handler.

use serde::{Deserialize, Serialize};

/// Lifecycle status reported by a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Up,
    Down,
    Starting,
    OutOfService,
    Unknown,
}

/// A registered service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Unique instance identifier.
    pub id: String,
    /// Application the instance belongs to.
    pub app: String,
    /// Optional VIP address the instance serves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vip_address: Option<String>,
    /// Current status.
    pub status: InstanceStatus,
}

impl InstanceInfo {
    /// Create a new instance record with status `Up`.
    #[must_use]
    pub fn new(id: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            app: app.into(),
            vip_address: None,
            status: InstanceStatus::Up,
        }
    }

    /// Set the VIP address.
    #[must_use]
    pub fn with_vip(mut self, vip_address: impl Into<String>) -> Self {
        self.vip_address = Some(vip_address.into());
        self
    }

    /// Set the status.
    #[must_use]
    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }
}

/// A predicate selecting a subset of service instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Interest {
    /// All instances of an application.
    Application { name: String },
    /// All instances serving a VIP address.
    Vip { address: String },
    /// A single instance.
    Instance { id: String },
    /// Every instance in the registry.
    FullRegistry,
}

impl Interest {
    /// Interest in every instance of `name`.
    #[must_use]
    pub fn application(name: impl Into<String>) -> Self {
        Interest::Application { name: name.into() }
    }

    /// Interest in every instance serving `address`.
    #[must_use]
    pub fn vip(address: impl Into<String>) -> Self {
        Interest::Vip {
            address: address.into(),
        }
    }

    /// Interest in the instance `id`.
    #[must_use]
    pub fn instance(id: impl Into<String>) -> Self {
        Interest::Instance { id: id.into() }
    }

    /// Check whether this interest selects `instance`.
    #[must_use]
    pub fn matches(&self, instance: &InstanceInfo) -> bool {
        match self {
            Interest::Application { name } => instance.app == *name,
            Interest::Vip { address } => instance.vip_address.as_deref() == Some(address.as_str()),
            Interest::Instance { id } => instance.id == *id,
            Interest::FullRegistry => true,
        }
    }

    /// Validate the interest.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the interest can never match.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self {
            Interest::Application { name } if name.is_empty() => {
                Err("application name cannot be empty")
            }
            Interest::Vip { address } if address.is_empty() => Err("VIP address cannot be empty"),
            Interest::Instance { id } if id.is_empty() => Err("instance id cannot be empty"),
            _ => Ok(()),
        }
    }
}
