//! Asserts that a warmed-up `BufferPool` never reaches the system allocator
//! again: once a size class has been seen, repeated acquire/release cycles
//! recycle its buffers instead of growing, shrinking, or dropping them.
#![allow(unsafe_code)]

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};

use patchgraph_core::BufferPool;

struct CountingAllocator;

static ALLOC_COUNT: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        ALLOC_COUNT.fetch_add(1, Ordering::Relaxed);
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        ALLOC_COUNT.fetch_add(1, Ordering::Relaxed);
        System.realloc(ptr, layout, new_size)
    }
}

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator;

// Every class is already a power of two, matching `BufferPool`'s own
// rounding, so a warmed-up `acquire` never needs to grow what it gets back.
const SIZE_CLASSES: [usize; 6] = [1, 4, 16, 64, 256, 1024];
const WARMUP_FRAMES: usize = 8;
const MEASURED_FRAMES: usize = 200;

fn run_frame(pool: &mut BufferPool) {
    let mut bufs: [Vec<f32>; SIZE_CLASSES.len()] = [Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new()];
    for (slot, &len) in bufs.iter_mut().zip(SIZE_CLASSES.iter()) {
        *slot = pool.acquire(len);
    }
    for buf in bufs {
        pool.release(buf);
    }
}

#[test]
fn buffer_pool_reaches_steady_state_with_zero_further_allocations() {
    let mut pool = BufferPool::new();

    for _ in 0..WARMUP_FRAMES {
        run_frame(&mut pool);
    }

    let baseline = ALLOC_COUNT.load(Ordering::Relaxed);

    for _ in 0..MEASURED_FRAMES {
        run_frame(&mut pool);
    }

    assert_eq!(
        ALLOC_COUNT.load(Ordering::Relaxed),
        baseline,
        "steady-state acquire/release cycles must not reach the system allocator"
    );
}
