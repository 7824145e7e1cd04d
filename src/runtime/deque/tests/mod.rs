//! Deque tests: ring buffer growth, sequential model checks and
//! concurrent owner/thief linearizability.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use proptest::prelude::*;

use crate::runtime::deque::{deque, RingBuffer, Steal};

#[cfg(test)]
mod ring_buffer_tests {
    use super::*;

    fn tag(value: usize) -> *mut () {
        (value << 1 | 1) as *mut ()
    }

    #[test]
    fn test_alloc_is_power_of_two() {
        let buffer = RingBuffer::alloc(3);
        assert_eq!(buffer.capacity(), 8);
        assert_eq!(buffer.log_size(), 3);
        assert!(buffer.get(5).is_null());
    }

    #[test]
    fn test_indices_wrap_with_mask() {
        let buffer = RingBuffer::alloc(2);
        buffer.set(6, tag(42));
        assert_eq!(buffer.get(2), tag(42));
        assert_eq!(buffer.get(10), tag(42));
    }

    #[test]
    fn test_grow_preserves_wrapped_window() {
        let buffer = RingBuffer::alloc(2);
        // Window [6, 10) wraps: slots 2, 3, 0, 1.
        for index in 6..10 {
            buffer.set(index, tag(index));
        }
        let grown = buffer.grow(10, 6);
        assert_eq!(grown.capacity(), 8);
        for index in 6..10 {
            assert_eq!(grown.get(index), tag(index));
        }
    }
}

#[cfg(test)]
mod owner_tests {
    use super::*;

    #[test]
    fn test_take_is_lifo() {
        let (worker, _stealer) = deque::<Box<usize>>(2);
        for i in 0..3 {
            worker.push_bottom(Box::new(i));
        }
        assert_eq!(worker.take_bottom().map(|b| *b), Some(2));
        assert_eq!(worker.take_bottom().map(|b| *b), Some(1));
        assert_eq!(worker.take_bottom().map(|b| *b), Some(0));
        assert!(worker.take_bottom().is_none());
    }

    #[test]
    fn test_take_on_fresh_deque() {
        let (worker, stealer) = deque::<Box<u8>>(4);
        assert!(worker.take_bottom().is_none());
        assert_eq!(stealer.steal(), Steal::Empty);
        assert!(worker.is_empty());
    }

    #[test]
    fn test_steal_is_fifo() {
        let (worker, stealer) = deque::<Box<usize>>(2);
        for i in 0..3 {
            worker.push_bottom(Box::new(i));
        }
        assert_eq!(stealer.steal().success().map(|b| *b), Some(0));
        assert_eq!(stealer.steal().success().map(|b| *b), Some(1));
        assert_eq!(worker.take_bottom().map(|b| *b), Some(2));
        assert_eq!(stealer.steal(), Steal::Empty);
    }

    #[test]
    fn test_grow_round_trip_with_wraparound() {
        const CAPACITY: usize = 8;
        let (worker, stealer) = deque::<Box<usize>>(3);

        // Advance top so the live window wraps before growing.
        for i in 0..5 {
            worker.push_bottom(Box::new(i));
        }
        for i in 0..5 {
            assert_eq!(stealer.steal().success().map(|b| *b), Some(i));
        }

        for i in 0..4 * CAPACITY {
            worker.push_bottom(Box::new(i));
        }
        assert!(worker.capacity() >= 4 * CAPACITY);
        assert_eq!(worker.len(), 4 * CAPACITY);

        let drained: Vec<usize> = std::iter::from_fn(|| stealer.steal().success().map(|b| *b))
            .collect();
        assert_eq!(drained, (0..4 * CAPACITY).collect::<Vec<_>>());
    }

    #[test]
    fn test_drop_releases_remaining_tasks() {
        let live = Arc::new(());
        {
            let (worker, _stealer) = deque::<Arc<()>>(1);
            for _ in 0..10 {
                worker.push_bottom(live.clone());
            }
            worker.take_bottom();
        }
        assert_eq!(Arc::strong_count(&live), 1);
    }
}

#[cfg(test)]
mod model_tests {
    use super::*;

    #[derive(Debug, Clone)]
    enum Op {
        Push(u32),
        Take,
        Steal,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => any::<u32>().prop_map(Op::Push),
            1 => Just(Op::Take),
            1 => Just(Op::Steal),
        ]
    }

    proptest! {
        #[test]
        fn prop_matches_vecdeque_model(ops in prop::collection::vec(op(), 0..300)) {
            let (worker, stealer) = deque::<Box<u32>>(1);
            let mut model = VecDeque::new();
            for op in ops {
                match op {
                    Op::Push(v) => {
                        worker.push_bottom(Box::new(v));
                        model.push_back(v);
                    },
                    Op::Take => {
                        prop_assert_eq!(worker.take_bottom().map(|b| *b), model.pop_back());
                    },
                    Op::Steal => {
                        prop_assert_eq!(stealer.steal().success().map(|b| *b), model.pop_front());
                    },
                }
                prop_assert_eq!(worker.len(), model.len());
            }
        }
    }
}

#[cfg(test)]
mod concurrency_tests {
    use super::*;

    fn run_linearizability(
        total: usize,
        thieves: usize,
    ) {
        let (worker, stealer) = deque::<Box<usize>>(2);
        let seen: Arc<Vec<AtomicUsize>> =
            Arc::new((0..=total).map(|_| AtomicUsize::new(0)).collect());
        let done = AtomicUsize::new(0);
        let stolen = AtomicUsize::new(0);
        let barrier = Barrier::new(thieves + 1);

        let taken = std::thread::scope(|s| {
            for _ in 0..thieves {
                let stealer = stealer.clone();
                let seen = seen.clone();
                let (done, stolen, barrier) = (&done, &stolen, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    loop {
                        match stealer.steal() {
                            Steal::Success(v) => {
                                seen[*v].fetch_add(1, Ordering::SeqCst);
                                stolen.fetch_add(1, Ordering::SeqCst);
                            },
                            Steal::Retry => continue,
                            Steal::Empty => {
                                if done.load(Ordering::SeqCst) == 1 {
                                    break;
                                }
                                std::hint::spin_loop();
                            },
                        }
                    }
                });
            }

            barrier.wait();
            let mut taken = 0;
            for value in 1..=total {
                worker.push_bottom(Box::new(value));
                if value % 3 == 0 {
                    if let Some(v) = worker.take_bottom() {
                        seen[*v].fetch_add(1, Ordering::SeqCst);
                        taken += 1;
                    }
                }
            }
            while let Some(v) = worker.take_bottom() {
                seen[*v].fetch_add(1, Ordering::SeqCst);
                taken += 1;
            }
            done.store(1, Ordering::SeqCst);
            taken
        });

        assert_eq!(seen[0].load(Ordering::SeqCst), 0);
        for value in 1..=total {
            assert_eq!(
                seen[value].load(Ordering::SeqCst),
                1,
                "value {} obtained a wrong number of times",
                value
            );
        }
        let obtained: usize = seen.iter().map(|c| c.load(Ordering::SeqCst)).sum();
        assert_eq!(obtained, total);
        assert_eq!(taken + stolen.load(Ordering::SeqCst), total);
    }

    #[test]
    fn test_each_value_obtained_once_single_thief() {
        run_linearizability(20_000, 1);
    }

    #[test]
    fn test_each_value_obtained_once_many_thieves() {
        run_linearizability(50_000, 4);
    }
}
