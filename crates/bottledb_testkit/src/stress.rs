//! Stress tests for BottleDB.
//!
//! These helpers run many transactions, sequentially or from several
//! threads sharing one store, and count how they ended. Concurrent runs
//! share customers and items between threads so that lock sets overlap in
//! every order.

use crate::fixtures::{customer, item, order};
use bottledb_core::{CoreError, CoreResult, Entity, Store, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Failures caused by lock timeouts.
    pub lock_timeouts: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, lock_timeouts: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            lock_timeouts,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Lock timeouts: {}", self.lock_timeouts);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform, over all threads.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Number of shared customers.
    pub customers: usize,
    /// Items per order.
    pub items_per_order: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            customers: 8,
            items_per_order: 3,
        }
    }
}

#[derive(Default)]
struct Tally {
    successful: AtomicUsize,
    failed: AtomicUsize,
    lock_timeouts: AtomicUsize,
}

impl Tally {
    fn record(&self, result: CoreResult<()>) {
        match result {
            Ok(()) => {
                self.successful.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                if matches!(e, CoreError::LockTimeout { .. }) {
                    self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
                }
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn finish(&self, start: Instant) -> StressTestResult {
        StressTestResult::new(
            self.successful.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.lock_timeouts.load(Ordering::Relaxed),
            start.elapsed(),
        )
    }
}

/// Saves customers shared by the stress runs. They are saved up front so
/// no two threads assign an identity to the same handle.
pub fn shared_customers(store: &Store, count: usize) -> CoreResult<Vec<Entity>> {
    (0..count.max(1))
        .map(|i| {
            let customer = customer(&format!("customer-{i}@example.com"), &format!("Customer {i}"));
            store.save(&customer)?;
            Ok(customer)
        })
        .collect()
}

/// Saves a new order per operation, one thread.
pub fn stress_sequential_saves(store: &Store, config: &StressConfig) -> StressTestResult {
    let tally = Tally::default();
    let start = Instant::now();
    let customers = match shared_customers(store, config.customers) {
        Ok(customers) => customers,
        Err(_) => return StressTestResult::new(0, config.operations, 0, start.elapsed()),
    };

    for i in 0..config.operations {
        let items: Vec<Entity> = (0..config.items_per_order)
            .map(|n| item(&format!("seq-{i}-{n}"), n as i64))
            .collect();
        let order = order(&customers[i % customers.len()], &items);
        tally.record(store.save(&order).map(|_| ()));
    }

    tally.finish(start)
}

/// Threads save orders that all point at the same customers, picked in a
/// different rotation per thread, and re-save a shared order whose item
/// list they take turns replacing.
pub fn stress_concurrent_saves(store: &Store, config: &StressConfig) -> StressTestResult {
    let tally = Tally::default();
    let start = Instant::now();
    let customers = match shared_customers(store, config.customers) {
        Ok(customers) => customers,
        Err(_) => return StressTestResult::new(0, config.operations, 0, start.elapsed()),
    };
    let shared = order(&customers[0], &[item("shared-0", 0)]);
    if store.save(&shared).is_err() {
        return StressTestResult::new(0, config.operations, 0, start.elapsed());
    }

    let threads = config.threads.max(1);
    let ops_per_thread = config.operations / threads;

    thread::scope(|scope| {
        for t in 0..threads {
            let (tally, customers, shared) = (&tally, &customers, &shared);
            scope.spawn(move || {
                for i in 0..ops_per_thread {
                    let result = if i % 4 == 3 {
                        let items = vec![Value::Entity(item(&format!("shared-{t}-{i}"), i as i64))];
                        let replacement = Entity::with_id(
                            shared.type_name(),
                            shared.id().unwrap_or_default(),
                        )
                        .with("customer", customers[t % customers.len()].clone())
                        .with("items", items);
                        store.save(&replacement).map(|_| ())
                    } else {
                        let picked: Vec<Entity> = (0..config.items_per_order)
                            .map(|n| item(&format!("t{t}-{i}-{n}"), n as i64))
                            .collect();
                        let customer = if t % 2 == 0 {
                            &customers[i % customers.len()]
                        } else {
                            &customers[customers.len() - 1 - i % customers.len()]
                        };
                        store.save(&order(customer, &picked)).map(|_| ())
                    };
                    tally.record(result);
                }
            });
        }
    });

    tally.finish(start)
}

/// Threads load every saved order while one thread keeps saving.
pub fn stress_reads_during_writes(store: &Store, config: &StressConfig) -> StressTestResult {
    let tally = Tally::default();
    let start = Instant::now();
    let customers = match shared_customers(store, config.customers) {
        Ok(customers) => customers,
        Err(_) => return StressTestResult::new(0, config.operations, 0, start.elapsed()),
    };
    let threads = config.threads.max(2);
    let ops_per_thread = config.operations / threads;

    thread::scope(|scope| {
        let (tally, customers) = (&tally, &customers);
        scope.spawn(move || {
            for i in 0..ops_per_thread {
                let order = order(&customers[i % customers.len()], &[item(&format!("rw-{i}"), 1)]);
                tally.record(store.save(&order).map(|_| ()));
            }
        });
        for _ in 1..threads {
            scope.spawn(move || {
                for i in 0..ops_per_thread {
                    let customer = &customers[i % customers.len()];
                    let result = store
                        .reference_of(customer)
                        .and_then(|reference| store.load(&reference))
                        .map(|_| ());
                    tally.record(result);
                }
            });
        }
    });

    tally.finish(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{shop_schema, TestStore, ORDER};

    #[test]
    fn test_sequential_saves() {
        let store = TestStore::memory(shop_schema());
        let config = StressConfig {
            operations: 50,
            ..Default::default()
        };

        let result = stress_sequential_saves(&store, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 50);
        assert_eq!(store.count(ORDER).unwrap(), 50);
    }

    #[test]
    fn test_reads_during_writes() {
        let store = TestStore::memory(shop_schema());
        let config = StressConfig {
            operations: 80,
            threads: 4,
            ..Default::default()
        };

        let result = stress_reads_during_writes(&store, &config);
        assert_eq!(result.failed_ops, 0);
        assert!(store.verify().unwrap().is_consistent());
    }
}
