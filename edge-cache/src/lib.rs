//! In-memory Tenant/Meter/DeviceRegister cache (spec.md §4.4), grounded on
//! `syncstorage-sqlite/src/pool.rs`'s `CollectionCache` — there, two
//! separate `RwLock<HashMap<..>>`s updated independently (the code even
//! carries a `// XXX: should probably either lock both simultaneously
//! during writes or use an RwLock alternative` note). Here the three
//! related tables must swap together with no partial updates (spec.md
//! §4.4), so a single `ArcSwap<CacheSnapshot>` replaces the pair of locks:
//! a reader always sees either the whole old snapshot or the whole new
//! one, never a mix.

#[macro_use]
extern crate slog_scope;

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use edge_common::model::{DeviceRegister, Meter, Register, Tenant};
use edge_common::Id;

/// An immutable point-in-time view built by `reload_all`. Cheap to clone
/// (an `Arc` underneath); callers can hold a snapshot across several
/// lookups without worrying about a reload happening mid-read.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    tenant: Option<Tenant>,
    meters: HashMap<Id, Meter>,
    registers_by_device: HashMap<Id, Vec<Register>>,
}

impl CacheSnapshot {
    fn build(
        tenant: Option<Tenant>,
        meters: Vec<Meter>,
        registers: Vec<Register>,
        device_registers: Vec<DeviceRegister>,
    ) -> Self {
        let registers_by_id: HashMap<Id, Register> =
            registers.into_iter().map(|r| (r.id.clone(), r)).collect();

        let mut registers_by_device: HashMap<Id, Vec<Register>> = HashMap::new();
        for join in device_registers {
            if let Some(register) = registers_by_id.get(&join.register_id) {
                registers_by_device
                    .entry(join.device_id)
                    .or_default()
                    .push(register.clone());
            }
        }

        // spec.md §4.4 invariant: "The Meter cache is valid iff every
        // cached meter has a parseable register map referencing only
        // known DeviceRegisters." A meter whose device id resolves to no
        // registers is dropped from the cache entirely rather than kept
        // with an empty register set (Testable Property 6, scenario S5:
        // a meter referencing a not-yet-synced DeviceRegister row must
        // not appear in the Meter cache at all).
        let meters = meters
            .into_iter()
            .filter_map(|m| {
                if registers_by_device.contains_key(&m.device_id) {
                    Some((m.id.clone(), m))
                } else {
                    warn!("meter {} has no resolvable device registers for device {}, excluding from cache", m.id, m.device_id);
                    None
                }
            })
            .collect();

        Self {
            tenant,
            meters,
            registers_by_device,
        }
    }
}

/// Three caches (Tenant ≤1 entry, Meter by id, DeviceRegister→Register by
/// device id) behind one atomically-swapped snapshot.
pub struct CacheLayer {
    snapshot: ArcSwap<CacheSnapshot>,
}

impl Default for CacheLayer {
    fn default() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(CacheSnapshot::default()),
        }
    }
}

impl CacheLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `initialize(store)` and `reloadAll(store)` in spec.md §4.4 are the
    /// same atomic swap; the distinction is purely about call site (first
    /// load at startup vs. periodic refresh). Callers fetch rows from the
    /// store themselves and hand them here so this crate never needs to
    /// know about `edge-store`.
    pub fn reload_all(
        &self,
        tenant: Option<Tenant>,
        meters: Vec<Meter>,
        registers: Vec<Register>,
        device_registers: Vec<DeviceRegister>,
    ) {
        let snapshot = CacheSnapshot::build(tenant, meters, registers, device_registers);
        self.snapshot.store(Arc::new(snapshot));
    }

    pub fn clear(&self) {
        self.snapshot.store(Arc::new(CacheSnapshot::default()));
    }

    pub fn current(&self) -> Arc<CacheSnapshot> {
        self.snapshot.load_full()
    }

    pub fn get_tenant(&self) -> Option<Tenant> {
        self.current().tenant.clone()
    }

    pub fn get_meter(&self, meter_id: &Id) -> Option<Meter> {
        self.current().meters.get(meter_id).cloned()
    }

    pub fn list_meters(&self) -> Vec<Meter> {
        self.current().meters.values().cloned().collect()
    }

    pub fn list_active_meters(&self) -> Vec<Meter> {
        self.current()
            .meters
            .values()
            .filter(|m| m.active)
            .cloned()
            .collect()
    }

    /// Registers attached to `device_id` via the DeviceRegister join,
    /// what the Collector resolves `(device_id → registers[])` from
    /// (spec.md §4.6).
    pub fn registers_for_device(&self, device_id: &Id) -> Vec<Register> {
        self.current()
            .registers_by_device
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn register(id: &str, device_id: &str, base: i64) -> Register {
        Register {
            id: Id::new(id),
            device_id: Id::new(device_id),
            name: id.to_string(),
            base_number: base,
            unit: "kWh".into(),
            field_name: id.to_lowercase(),
        }
    }

    fn join(device_id: &str, register_id: &str) -> DeviceRegister {
        DeviceRegister {
            id: Id::new(format!("{device_id}-{register_id}")),
            device_id: Id::new(device_id),
            register_id: Id::new(register_id),
        }
    }

    fn meter(id: &str, device_id: &str, active: bool) -> Meter {
        Meter {
            id: Id::new(id),
            display_name: id.to_string(),
            ip: "10.0.0.1".into(),
            port: 502,
            protocol: edge_common::model::Protocol::Modbus,
            device_id: Id::new(device_id),
            element_tag: "A".into(),
            active,
            register_map: None,
        }
    }

    #[test]
    fn reload_builds_device_to_registers_join() {
        let cache = CacheLayer::new();
        cache.reload_all(
            None,
            vec![meter("m1", "d1", true)],
            vec![register("r1", "d1", 1100)],
            vec![join("d1", "r1")],
        );

        let regs = cache.registers_for_device(&Id::new("d1"));
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].base_number, 1100);
    }

    #[test]
    fn reload_is_a_single_atomic_swap() {
        let cache = CacheLayer::new();
        cache.reload_all(
            None,
            vec![meter("m1", "d1", true), meter("m2", "d2", false)],
            vec![register("r1", "d1", 1100), register("r2", "d2", 1100)],
            vec![join("d1", "r1"), join("d2", "r2")],
        );
        assert_eq!(cache.list_meters().len(), 2);
        assert_eq!(cache.list_active_meters().len(), 1);

        // A second reload must replace the whole snapshot, not merge into it.
        cache.reload_all(
            None,
            vec![meter("m3", "d3", true)],
            vec![register("r3", "d3", 1100)],
            vec![join("d3", "r3")],
        );
        assert_eq!(cache.list_meters().len(), 1);
        assert!(cache.get_meter(&Id::new("m1")).is_none());
    }

    #[test]
    fn clear_empties_all_three_caches() {
        let cache = CacheLayer::new();
        cache.reload_all(
            None,
            vec![meter("m1", "d1", true)],
            vec![register("r1", "d1", 1100)],
            vec![join("d1", "r1")],
        );
        cache.clear();
        assert!(cache.list_meters().is_empty());
        assert!(cache.get_tenant().is_none());
    }

    #[test]
    fn meter_with_no_resolvable_registers_is_excluded_from_the_cache() {
        // spec.md §4.4 invariant + Testable Property 6 + scenario S5: a
        // meter referencing a device id with no known DeviceRegister row
        // must not appear in the Meter cache at all.
        let cache = CacheLayer::new();
        cache.reload_all(
            None,
            vec![meter("m1", "d1", true), meter("m2", "d77", true)],
            vec![register("r1", "d1", 1100)],
            vec![join("d1", "r1")],
        );
        assert_eq!(cache.list_meters().len(), 1);
        assert!(cache.get_meter(&Id::new("m1")).is_some());
        assert!(cache.get_meter(&Id::new("m2")).is_none());
    }
}
