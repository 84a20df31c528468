use std::collections::HashMap;
use std::sync::Mutex;

/// Receives global completion fractions in `[0, 1]`. Fire-and-forget.
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f32);
}

impl<F> ProgressSink for F
where
    F: Fn(f32) + Send + Sync,
{
    fn report(&self, fraction: f32) {
        self(fraction)
    }
}

pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _fraction: f32) {}
}

#[derive(Debug, Clone, Copy)]
struct ItemProgress {
    total_units: u32,
    completed_units: f32,
}

impl ItemProgress {
    fn fraction(&self) -> f32 {
        if self.total_units == 0 {
            return 1.0;
        }
        (self.completed_units / self.total_units as f32).clamp(0.0, 1.0)
    }
}

/// Folds per-item unit progress into one global scalar.
///
/// Every tracked item weighs the same regardless of its unit count. Updates
/// are last-write-wins per key; keeping values non-decreasing is up to the
/// caller.
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    items: Mutex<HashMap<i64, ItemProgress>>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, key: i64, total_units: u32) {
        self.with_items(|items| {
            items.insert(
                key,
                ItemProgress {
                    total_units,
                    completed_units: 0.0,
                },
            );
        });
    }

    /// Sets the completed unit count for `key`; fractional values express
    /// partial progress inside the current unit.
    pub fn set_units(&self, key: i64, completed_units: f32) {
        self.with_items(|items| {
            if let Some(item) = items.get_mut(&key) {
                item.completed_units = completed_units.max(0.0);
            }
        });
    }

    /// Records `done` of `of` sub-steps inside unit `unit_index` (0-based).
    pub fn set_partial(&self, key: i64, unit_index: u32, done: usize, of: usize) {
        let partial = if of == 0 {
            0.0
        } else {
            (done as f32 / of as f32).clamp(0.0, 1.0)
        };
        self.set_units(key, unit_index as f32 + partial);
    }

    pub fn complete(&self, key: i64) {
        self.with_items(|items| {
            if let Some(item) = items.get_mut(&key) {
                item.completed_units = item.total_units as f32;
            }
        });
    }

    pub fn remove(&self, key: i64) {
        self.with_items(|items| {
            items.remove(&key);
        });
    }

    pub fn item_fraction(&self, key: i64) -> Option<f32> {
        self.with_items(|items| items.get(&key).map(ItemProgress::fraction))
    }

    pub fn global(&self) -> f32 {
        self.with_items(|items| {
            if items.is_empty() {
                return 0.0;
            }
            let sum: f32 = items.values().map(ItemProgress::fraction).sum();
            (sum / items.len() as f32).clamp(0.0, 1.0)
        })
    }

    fn with_items<T>(&self, f: impl FnOnce(&mut HashMap<i64, ItemProgress>) -> T) -> T {
        let mut guard = match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn partial_units_make_progress_smooth() {
        let agg = ProgressAggregator::new();
        agg.start(1, 4);
        agg.set_partial(1, 1, 1, 2);
        assert!((agg.global() - 1.5 / 4.0).abs() < 1e-6);
        agg.set_units(1, 2.0);
        assert!((agg.global() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn items_weigh_equally_regardless_of_unit_count() {
        let agg = ProgressAggregator::new();
        agg.start(1, 100);
        agg.start(2, 2);
        agg.set_units(1, 50.0);
        agg.complete(2);
        assert!((agg.global() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn global_stays_within_bounds() {
        let agg = ProgressAggregator::new();
        assert_eq!(agg.global(), 0.0);
        agg.start(7, 3);
        agg.set_units(7, 42.0);
        assert_eq!(agg.global(), 1.0);
        agg.set_units(7, -3.0);
        assert_eq!(agg.global(), 0.0);
    }

    #[test]
    fn zero_unit_items_count_as_done() {
        let agg = ProgressAggregator::new();
        agg.start(3, 0);
        assert_eq!(agg.item_fraction(3), Some(1.0));
        agg.remove(3);
        assert_eq!(agg.item_fraction(3), None);
    }

    #[test]
    fn updates_from_other_threads_are_visible() {
        let agg = Arc::new(ProgressAggregator::new());
        agg.start(9, 10);
        let worker = {
            let agg = agg.clone();
            thread::spawn(move || {
                for unit in 1..=10 {
                    agg.set_units(9, unit as f32);
                }
            })
        };
        worker.join().expect("join");
        assert_eq!(agg.item_fraction(9), Some(1.0));
    }
}
