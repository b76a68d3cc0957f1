//! Host Preparer
//!
//! Stamps a fixed hostname and operator tags into every outgoing
//! heartbeat.

use crate::domain::entities::Heartbeat;
use crate::domain::ports::{PrepareError, Preparer};
use crate::domain::value_objects::{split_field, Meta};

#[derive(Debug, Clone, Default)]
pub struct HostPreparer {
    host: String,
    meta: Meta,
}

impl HostPreparer {
    pub fn new(host: impl Into<String>, meta: Meta) -> Self {
        Self {
            host: host.into(),
            meta,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }
}

impl Preparer for HostPreparer {
    fn prepare(&self, hb: &mut Heartbeat) -> Result<(), PrepareError> {
        if let Some(bad) = self.meta.iter().find(|f| split_field(f).is_none()) {
            return Err(PrepareError(format!("meta field {:?} is not key=value", bad)));
        }
        hb.set_host(self.host.clone());
        hb.set_meta(self.meta.clone());
        Ok(())
    }
}
