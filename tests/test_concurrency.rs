//! Multi-threaded tests for the busy protocol and free-page waits
//!
//! Without the `std` feature sleeps fall back to polling, which is slower
//! but must behave the same.

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Barrier, Mutex};
use std::thread;
use std::time::Duration;

use common::boot;
use mach_vm_page::{PageQueueType, VmObject, VmObjectId, VmPageConfig, VmPageError, PAGE_SIZE};

#[test]
fn busy_sleeper_wakes_when_holder_finishes() {
    let (mgr, _) = boot(4, 1, VmPageConfig::default());
    let object = VmObject::new(VmObjectId(1));
    let barrier = Barrier::new(2);
    let finished = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            let busy = {
                let mut lock = object.lock();
                mgr.page_alloc_for(&mut lock, 0).unwrap()
            };
            barrier.wait();
            thread::sleep(Duration::from_millis(50));
            finished.store(true, Ordering::SeqCst);
            drop(busy);
        });

        s.spawn(|| {
            barrier.wait();
            loop {
                let lock = object.lock();
                let page = mgr.page_lookup(&lock, 0).unwrap();
                match mgr.try_busy(page) {
                    Ok(busy) => {
                        assert!(finished.load(Ordering::SeqCst));
                        drop(busy);
                        break;
                    }
                    Err(VmPageError::Busy) => mgr.page_sleep(lock, page),
                    Err(err) => panic!("unexpected {:?}", err),
                }
            }
        });
    });

    mgr.check_invariants();
}

#[test]
fn busy_sleeper_sees_page_freed() {
    let (mgr, _) = boot(4, 1, VmPageConfig::default());
    let object = VmObject::new(VmObjectId(2));
    let barrier = Barrier::new(2);

    thread::scope(|s| {
        s.spawn(|| {
            let busy = {
                let mut lock = object.lock();
                mgr.page_alloc_for(&mut lock, 0).unwrap()
            };
            barrier.wait();
            thread::sleep(Duration::from_millis(50));
            let mut lock = object.lock();
            mgr.page_free(&mut lock, busy);
        });

        s.spawn(|| {
            barrier.wait();
            // Retry from the top after every sleep; the page may be gone
            loop {
                let lock = object.lock();
                let Some(page) = mgr.page_lookup(&lock, 0) else {
                    break;
                };
                match mgr.try_busy(page) {
                    Ok(_) => panic!("page should be freed, not handed over"),
                    Err(_) => mgr.page_sleep(lock, page),
                }
            }
        });
    });

    assert_eq!(object.resident_page_count(), 0);
    mgr.check_invariants();
}

#[test]
fn page_wait_wakes_on_free() {
    let (mgr, _) = boot(1, 1, VmPageConfig::default());
    let only = mgr.alloc_page(0).unwrap();
    let index = only.index();
    let barrier = Barrier::new(2);

    thread::scope(|s| {
        let waiter = s.spawn(|| {
            barrier.wait();
            loop {
                match mgr.alloc_page(0) {
                    Ok(page) => return page.index(),
                    Err(VmPageError::OutOfMemory) => mgr.page_wait(),
                    Err(err) => panic!("unexpected {:?}", err),
                }
            }
        });

        barrier.wait();
        thread::sleep(Duration::from_millis(50));
        mgr.page_free_anonymous(only);

        assert_eq!(waiter.join().unwrap(), index);
    });
}

#[test]
fn concurrent_allocations_never_share_a_frame() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 500;

    let (mgr, _) = boot(16, 2, VmPageConfig::default());
    let held = Mutex::new(HashSet::new());

    thread::scope(|s| {
        for t in 0..THREADS {
            let mgr = &mgr;
            let held = &held;
            s.spawn(move || {
                for round in 0..ROUNDS {
                    let Ok(page) = mgr.alloc_page(t % 2) else {
                        thread::yield_now();
                        continue;
                    };
                    assert!(held.lock().unwrap().insert(page.index()));
                    if round % 3 == 0 {
                        mgr.activate(&page);
                    }
                    assert!(held.lock().unwrap().remove(&page.index()));
                    mgr.page_free_anonymous(page);
                }
            });
        }
    });

    let stats = mgr.stats();
    assert_eq!(stats.free, 16);
    assert_eq!(mgr.counters().allocs, mgr.counters().frees);
    mgr.check_invariants();
}

#[test]
fn concurrent_objects_keep_lookup_table_consistent() {
    const THREADS: u64 = 4;
    const PAGES: u64 = 8;

    let (mgr, _) = boot(THREADS * PAGES, 1, VmPageConfig::default().with_hash_buckets(16));
    let objects: Vec<_> = (0..THREADS).map(|i| VmObject::new(VmObjectId(10 + i))).collect();

    thread::scope(|s| {
        for object in &objects {
            let mgr = &mgr;
            s.spawn(move || {
                for round in 0..20 {
                    let mut lock = object.lock();
                    for p in 0..PAGES {
                        let busy = mgr.page_alloc_for(&mut lock, p * PAGE_SIZE as u64).unwrap();
                        if round % 2 == 0 {
                            mgr.deactivate(&busy);
                        }
                    }
                    assert_eq!(lock.resident_page_count() as u64, PAGES);

                    for p in 0..PAGES {
                        let page = mgr.page_lookup(&lock, p * PAGE_SIZE as u64).unwrap();
                        assert_eq!(page.object(), Some(lock.id()));
                        let busy = mgr.try_busy(page).unwrap();
                        mgr.page_free(&mut lock, busy);
                    }
                    assert_eq!(lock.resident_page_count(), 0);
                }
            });
        }
    });

    assert!(mgr.queue_snapshot(PageQueueType::Inactive).is_empty());
    assert_eq!(mgr.stats().free as u64, THREADS * PAGES);
    mgr.check_invariants();
}
