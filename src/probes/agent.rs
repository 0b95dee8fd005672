//! Self-monitoring of the agent's own buffers.

use std::sync::Arc;

use super::{Probe, ProbeError, Sample};
use crate::delivery::DeliveryQueue;
use crate::registry::Registry;

/// Samples in-flight transactions and delivery queue pressure.
pub struct AgentProbe {
    registry: Arc<Registry>,
    delivery: Arc<DeliveryQueue>,
}

impl AgentProbe {
    pub fn new(registry: Arc<Registry>, delivery: Arc<DeliveryQueue>) -> Self {
        Self { registry, delivery }
    }
}

impl Probe for AgentProbe {
    fn name(&self) -> &str {
        "agent"
    }

    fn namespace(&self) -> &str {
        "agent"
    }

    fn sample(&self) -> Result<Vec<Sample>, ProbeError> {
        Ok(vec![
            Sample::new("in_flight_transactions", self.registry.len() as f64),
            Sample::new("delivery_queue_depth", self.delivery.len() as f64),
            Sample::new("delivery_dropped", self.delivery.dropped_count() as f64),
        ])
    }
}
