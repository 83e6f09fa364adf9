//! Applies requested mutations to registry devices.
//!
//! The registry is consulted and updated only through here: the engine
//! maps the uniform request shape onto a [`Mutation`], runs the
//! type-dispatched transition, and persists the result atomically.

use super::store::DeviceStore;
use super::{Device, Mutation};
use anyhow::Result;
use std::sync::Arc;

pub struct TransitionEngine {
    registry: Arc<DeviceStore>,
}

impl TransitionEngine {
    pub fn new(registry: Arc<DeviceStore>) -> Self {
        Self { registry }
    }

    /// Apply one mutation: a present `value` is a direct set, an absent
    /// one a toggle. No range policy here; the engine stays total and
    /// writes whatever the caller asked for. Returns `None` for an
    /// unknown id, leaving the registry untouched.
    pub fn apply_mutation(&self, id: i64, value: Option<i64>) -> Result<Option<Device>> {
        let mutation = match value {
            Some(v) => Mutation::Set(v),
            None => Mutation::Toggle,
        };

        let updated = self.registry.mutate(id, |state| state.apply(mutation))?;
        if let Some(ref device) = updated {
            tracing::info!(
                id = device.id,
                kind = device.state.kind().as_str(),
                ?mutation,
                "device state updated"
            );
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::DeviceState;

    fn engine() -> TransitionEngine {
        let store = Arc::new(DeviceStore::in_memory().unwrap());
        store.seed_defaults().unwrap();
        TransitionEngine::new(store)
    }

    #[test]
    fn lock_toggles_there_and_back() {
        let engine = engine();

        let once = engine.apply_mutation(2, None).unwrap().unwrap();
        assert_eq!(once.state, DeviceState::Lock { locked: false });

        let twice = engine.apply_mutation(2, None).unwrap().unwrap();
        assert_eq!(twice.state, DeviceState::Lock { locked: true });
    }

    #[test]
    fn thermostat_direct_set_keeps_on_state() {
        let engine = engine();

        let updated = engine.apply_mutation(3, Some(25)).unwrap().unwrap();
        assert_eq!(updated.state, DeviceState::Temp { on: true, target: 25 });
    }

    #[test]
    fn direct_set_is_unclamped() {
        let engine = engine();

        let updated = engine.apply_mutation(3, Some(999)).unwrap().unwrap();
        assert_eq!(updated.state, DeviceState::Temp { on: true, target: 999 });
    }

    #[test]
    fn blinds_toggle_is_a_documented_no_op() {
        let engine = engine();

        let before = engine.apply_mutation(6, Some(40)).unwrap().unwrap();
        let toggled = engine.apply_mutation(6, None).unwrap().unwrap();
        assert_eq!(before.state, toggled.state);
    }

    #[test]
    fn unknown_id_returns_none_and_changes_nothing() {
        let engine = engine();

        let before = engine.registry.list().unwrap();
        assert!(engine.apply_mutation(99, None).unwrap().is_none());
        assert!(engine.apply_mutation(99, Some(10)).unwrap().is_none());
        assert_eq!(engine.registry.list().unwrap(), before);
    }
}
