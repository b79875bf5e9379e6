use std::{sync::Arc, time::Instant};

use tracing::{debug, info};

use crate::{
    config::HomeSection,
    entity::{Entity, EntitySnapshot},
    throttle::{Clock, SystemClock},
};

/// The framework side of the platforms: it knows where home is, keeps the
/// registered entities and drives their updates. Updates run one entity at a
/// time and never overlap.
#[derive(Debug)]
pub struct Host {
    home: HomeSection,
    clock: Arc<dyn Clock>,
    entities: Vec<Box<dyn Entity>>,
}

impl Host {
    pub fn new(home: HomeSection, clock: Arc<dyn Clock>) -> Self {
        Self {
            home,
            clock,
            entities: Vec::new(),
        }
    }

    pub fn with_system_clock(home: HomeSection) -> Self {
        Self::new(home, Arc::new(SystemClock))
    }

    pub fn home(&self) -> &HomeSection {
        &self.home
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Register entities, optionally updating each once first so they start
    /// out with data.
    pub async fn add_entities(&mut self, entities: Vec<Box<dyn Entity>>, update_before_add: bool) {
        for mut entity in entities {
            if update_before_add {
                entity.update(self.clock.now()).await;
            }
            info!(entity = entity.name(), state = %entity.state(), "registered entity");
            self.entities.push(entity);
        }
    }

    /// One scheduler tick: update every entity in registration order.
    pub async fn tick(&mut self) {
        let now = self.clock.now();
        for entity in &mut self.entities {
            entity.update(now).await;
            debug!(entity = entity.name(), state = %entity.state(), "updated");
        }
    }

    pub fn entities(&self) -> &[Box<dyn Entity>] {
        &self.entities
    }

    pub fn snapshots(&self) -> Vec<EntitySnapshot> {
        self.entities.iter().map(|e| e.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::ManualClock;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Counter {
        updates: Vec<Instant>,
    }

    #[async_trait]
    impl Entity for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn state(&self) -> String {
            self.updates.len().to_string()
        }

        fn attributes(&self) -> Map<String, serde_json::Value> {
            Map::new()
        }

        async fn update(&mut self, now: Instant) {
            self.updates.push(now);
        }
    }

    #[tokio::test]
    async fn update_before_add_runs_once() {
        let mut host = Host::new(HomeSection::default(), Arc::new(ManualClock::new()));
        host.add_entities(vec![Box::new(Counter::default())], true).await;
        host.add_entities(vec![Box::new(Counter::default())], false).await;

        let states: Vec<String> = host.entities().iter().map(|e| e.state()).collect();
        assert_eq!(states, ["1", "0"]);
    }

    #[tokio::test]
    async fn tick_passes_clock_time() {
        let clock = ManualClock::new();
        let mut host = Host::new(HomeSection::default(), Arc::new(clock.clone()));
        host.add_entities(vec![Box::new(Counter::default())], false).await;

        host.tick().await;
        clock.advance(Duration::from_secs(30));
        host.tick().await;

        assert_eq!(host.snapshots()[0].state, "2");
        assert_eq!(host.now(), clock.now());
    }
}
