//! Consistency tests for the in-memory device cache under concurrency

use std::sync::Arc;
use std::thread;

use chrono::{TimeZone, Utc};
use device_cache::{CacheManager, InMemoryCache};
use fleet_model::{Device, DeviceId, DeviceStatus, Position};
use proptest::prelude::*;

fn position_at(id: u64, secs: i64, lat: f64) -> Position {
    let time = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
    Position::new(DeviceId::new(id), "osmand", time, lat, 0.0)
}

#[test]
fn concurrent_field_updates_are_not_lost() {
    let id = DeviceId::new(12345);
    let cache = Arc::new(InMemoryCache::with_devices([Device::new(id, "Van", "860000000000001")]));

    let status_writer = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            for _ in 0..500 {
                cache.update_device(id, &mut |d| d.status = DeviceStatus::Online);
            }
        })
    };
    let position_writer = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            for n in 0..500u64 {
                cache.update_device(id, &mut |d| d.position_id = Some(n));
            }
        })
    };

    status_writer.join().unwrap();
    position_writer.join().unwrap();

    let device = cache.get_device(id).unwrap();
    assert_eq!(device.status, DeviceStatus::Online);
    assert_eq!(device.position_id, Some(499));
}

#[test]
fn distinct_devices_update_in_parallel() {
    let cache = Arc::new(InMemoryCache::with_devices(
        (0..16).map(|n| Device::new(DeviceId::new(n), format!("Unit {}", n), format!("U{}", n))),
    ));

    let handles: Vec<_> = (0..16u64)
        .map(|n| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for secs in 0..100 {
                    cache.update_position(&position_at(n, secs, n as f64));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    for n in 0..16u64 {
        let latest = cache.latest_position(DeviceId::new(n)).unwrap();
        assert_eq!(latest.fix_time, Utc.timestamp_opt(1_700_000_099, 0).unwrap());
        assert_eq!(latest.latitude, n as f64);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Whatever order fixes arrive in, the cached latest carries the newest fix time.
    #[test]
    fn prop_latest_position_has_max_fix_time(offsets in proptest::collection::vec(0i64..10_000, 1..40)) {
        let cache = InMemoryCache::new();
        for (i, secs) in offsets.iter().enumerate() {
            cache.update_position(&position_at(1, *secs, i as f64));
        }

        let max = *offsets.iter().max().unwrap();
        let latest = cache.latest_position(DeviceId::new(1)).unwrap();
        prop_assert_eq!(latest.fix_time, Utc.timestamp_opt(1_700_000_000 + max, 0).unwrap());

        // Equal fix times let the later arrival win
        let last_with_max = offsets.iter().rposition(|s| *s == max).unwrap();
        prop_assert_eq!(latest.latitude, last_with_max as f64);
    }
}
