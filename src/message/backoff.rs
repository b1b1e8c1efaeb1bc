use std::time::Duration;

/// An infinite stream of back off durations, where each duration is a
/// constant factor longer than the previous one, up to some maximum delay.
/// Upon reaching the maximum delay, that value is returned from then on.
///
/// Pair it with `Iterator::take` to bound the number of attempts, and with
/// `retry` to run a fallible operation. The delay is realized with
/// [std::thread::sleep], so do NOT use this with asynchronous code.
pub struct ExponentialBackoff {
    curr: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    pub fn new(start: Duration, max: Duration, factor: u32) -> ExponentialBackoff {
        ExponentialBackoff {
            curr: start,
            max,
            factor,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let delay = self.curr;
        self.curr = std::cmp::min(self.curr * self.factor, self.max);
        Some(delay)
    }
}

/// Run `f` until it returns [Ok], waiting for the next delay from `delays`
/// between attempts. `on_err` is called with each failure and the delay
/// that follows it, e.g. to log it. Returns the last error if the delays
/// run out first.
pub fn retry<T, E, F, L>(delays: impl Iterator<Item = Duration>, mut f: F, on_err: L) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    L: Fn(&E, Duration),
{
    let mut delays = delays.peekable();
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) => match delays.next() {
                Some(delay) if delays.peek().is_some() => {
                    on_err(&e, delay);
                    std::thread::sleep(delay);
                }
                _ => return Err(e),
            },
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{retry, ExponentialBackoff};
    use std::cell::Cell;
    use std::time::Duration;


    #[test]
    fn delays_grow_to_the_maximum() {
        let delays: Vec<_> = ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(5), 2)
            .take(5)
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }


    #[test]
    fn retry_gives_up_with_the_last_error() {
        let attempts = Cell::new(0);
        let delays = ExponentialBackoff::new(Duration::from_millis(0), Duration::from_millis(0), 2).take(3);
        let result: Result<(), usize> = retry(delays, || {
            attempts.set(attempts.get() + 1);
            Err(attempts.get())
        }, |_, _| ());
        assert_eq!(result, Err(3));
    }


    #[test]
    fn retry_stops_on_success() {
        let attempts = Cell::new(0);
        let delays = ExponentialBackoff::new(Duration::from_millis(0), Duration::from_millis(0), 2);
        let result: Result<usize, ()> = retry(delays, || {
            attempts.set(attempts.get() + 1);
            if attempts.get() == 4 { Ok(4) } else { Err(()) }
        }, |_, _| ());
        assert_eq!(result, Ok(4));
    }
}
