//! Response cursor for a stub.
//!
//! The cursor packs the current response index and how many times that
//! response has been served into one `AtomicU64`, so selecting and advancing
//! is a single `fetch_update`. Concurrent resolutions of the same stub each
//! observe a distinct position.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Position {
    response: u32,
    served: u32,
}

impl Position {
    fn unpack(raw: u64) -> Self {
        Self {
            response: (raw >> 32) as u32,
            served: raw as u32,
        }
    }

    fn pack(self) -> u64 {
        (u64::from(self.response) << 32) | u64::from(self.served)
    }

    /// Position after serving the current response once more.
    fn next(self, response_count: u32, repeat: u32) -> Self {
        let served = self.served.saturating_add(1);
        if served < repeat {
            return Self { served, ..self };
        }
        let response = self.response + 1;
        Self {
            response: if response >= response_count { 0 } else { response },
            served: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct ResponseCycler(AtomicU64);

impl ResponseCycler {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Select the response to serve and advance past it.
    ///
    /// `repeat_for` reports how many consecutive times a response is served
    /// before moving on (absent or zero means once). Wraps to the first
    /// response after the last.
    pub fn select_and_advance(
        &self,
        response_count: u32,
        repeat_for: impl Fn(u32) -> Option<u32>,
    ) -> u32 {
        if response_count == 0 {
            return 0;
        }
        let mut selected = 0;
        // The closure always returns Some, so fetch_update cannot fail.
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                let mut position = Position::unpack(raw);
                if position.response >= response_count {
                    position = Position::default();
                }
                selected = position.response;
                let repeat = repeat_for(position.response).unwrap_or(1).max(1);
                Some(position.next(response_count, repeat).pack())
            });
        selected
    }

    /// Index the next call to `select_and_advance` would return.
    #[must_use]
    pub fn peek(&self, response_count: u32) -> u32 {
        let position = Position::unpack(self.0.load(Ordering::Acquire));
        if position.response >= response_count {
            0
        } else {
            position.response
        }
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_cycles_and_wraps() {
        let cycler = ResponseCycler::new();
        let served: Vec<u32> = (0..7).map(|_| cycler.select_and_advance(3, |_| None)).collect();
        assert_eq!(served, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_single_response_always_zero() {
        let cycler = ResponseCycler::new();
        for _ in 0..5 {
            assert_eq!(cycler.select_and_advance(1, |_| None), 0);
        }
    }

    #[test]
    fn test_repeat_serves_response_multiple_times() {
        let cycler = ResponseCycler::new();
        let repeats = [Some(2), None, Some(3)];
        let served: Vec<u32> = (0..8)
            .map(|_| cycler.select_and_advance(3, |i| repeats[i as usize]))
            .collect();
        assert_eq!(served, vec![0, 0, 1, 2, 2, 2, 0, 0]);
    }

    #[test]
    fn test_shrunk_response_list_restarts() {
        let cycler = ResponseCycler::new();
        cycler.select_and_advance(5, |_| None);
        cycler.select_and_advance(5, |_| None);
        cycler.select_and_advance(5, |_| None);
        assert_eq!(cycler.peek(2), 0);
        assert_eq!(cycler.select_and_advance(2, |_| None), 0);
    }

    #[test]
    fn test_peek_and_reset() {
        let cycler = ResponseCycler::new();
        cycler.select_and_advance(3, |_| None);
        assert_eq!(cycler.peek(3), 1);
        cycler.reset();
        assert_eq!(cycler.peek(3), 0);
    }

    #[test]
    fn test_concurrent_selection_is_distinct() {
        let cycler = Arc::new(ResponseCycler::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cycler = Arc::clone(&cycler);
                std::thread::spawn(move || {
                    (0..250)
                        .map(|_| cycler.select_and_advance(1000, |_| None))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }
}
