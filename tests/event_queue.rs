//! Host-to-guest hand-off ordering through the machine's event queue.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[test]
fn zero_delay_closures_run_in_enqueue_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut m = common::machine(&dir.path().join("nand.bin"));
    let handle = m.handle();

    let log = Arc::new(Mutex::new(Vec::new()));
    for i in 0..8u32 {
        let log = log.clone();
        handle.post_delayed(move |_m| log.lock().unwrap().push(i), 0);
    }
    m.run_ticks(1);
    assert_eq!(*log.lock().unwrap(), (0..8).collect::<Vec<_>>());
}

#[test]
fn delayed_closure_waits_its_quanta() {
    let dir = tempfile::tempdir().unwrap();
    let mut m = common::machine(&dir.path().join("nand.bin"));
    let handle = m.handle();

    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    handle.post_delayed(move |_m| flag.store(true, Ordering::SeqCst), 5);

    m.run_ticks(5);
    assert!(!fired.load(Ordering::SeqCst), "not before its delay");
    m.run_ticks(1);
    assert!(fired.load(Ordering::SeqCst));
}

#[test]
fn panicking_closure_does_not_poison_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let mut m = common::machine(&dir.path().join("nand.bin"));
    let handle = m.handle();

    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    handle.post_delayed(|_m| panic!("deliberate"), 0);
    handle.post_delayed(move |_m| flag.store(true, Ordering::SeqCst), 0);

    m.run_ticks(1);
    assert!(fired.load(Ordering::SeqCst), "later closures still drain");
}

#[test]
fn closures_mutate_guest_state_on_the_cpu_thread() {
    let dir = tempfile::tempdir().unwrap();
    let mut m = common::machine(&dir.path().join("nand.bin"));
    let handle = m.handle();

    handle.post(|m| m.soc.write32(0x0040_0000, 0x1234_5678));
    m.run_ticks(2);
    assert_eq!(m.soc.read32(0x0040_0000), 0x1234_5678);
}
