//! Traffic source answering from a fixed table.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::{TrafficSource, TrafficTarget};

#[derive(Debug, Clone)]
enum Reading {
    Bytes(u64),
    Failure(String),
}

/// Answers `received_bytes` from values set per controller
/// (namespace, name). Unknown controllers have no data.
#[derive(Default)]
pub struct FixedTraffic {
    readings: Mutex<HashMap<(String, String), Reading>>,
    queries: Mutex<Vec<TrafficTarget>>,
}

impl FixedTraffic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bytes(&self, namespace: &str, name: &str, bytes: u64) {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (namespace.to_string(), name.to_string()),
                Reading::Bytes(bytes),
            );
    }

    pub fn set_failure(&self, namespace: &str, name: &str, message: &str) {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (namespace.to_string(), name.to_string()),
                Reading::Failure(message.to_string()),
            );
    }

    /// Targets queried so far, in call order.
    pub fn queries(&self) -> Vec<TrafficTarget> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TrafficSource for FixedTraffic {
    async fn received_bytes(
        &self,
        target: &TrafficTarget,
        _window: Duration,
    ) -> anyhow::Result<Option<u64>> {
        self.queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(target.clone());
        let reading = self
            .readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(target.namespace.clone(), target.name.clone()))
            .cloned();
        match reading {
            Some(Reading::Bytes(b)) => Ok(Some(b)),
            Some(Reading::Failure(msg)) => Err(anyhow::anyhow!(msg)),
            None => Ok(None),
        }
    }
}
