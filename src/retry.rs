use std::{marker::PhantomData, time::Duration};

/// Runs a fallible operation up to a bounded number of attempts.
///
/// Errors for which the predicate returns `false` are returned immediately;
/// everything else is retried after the configured delay until the attempt
/// budget is spent.
pub struct Retry<E, F = fn(&E) -> bool> {
    max_attempts: usize,
    delay: Duration,
    should_retry: F,
    target: &'static str,
    _error: PhantomData<fn(E)>,
}

// === impl Retry ===

impl<E> Retry<E> {
    pub const fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
            should_retry: |_: &E| true,
            target: "retry",
            _error: PhantomData,
        }
    }
}

impl<E, F> Retry<E, F>
where
    F: Fn(&E) -> bool,
    E: std::fmt::Debug,
{
    pub fn with_target(self, target: &'static str) -> Self {
        Self { target, ..self }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    pub fn with_predicate<F2>(self, should_retry: F2) -> Retry<E, F2>
    where
        F2: Fn(&E) -> bool,
    {
        Retry {
            max_attempts: self.max_attempts,
            delay: self.delay,
            should_retry,
            target: self.target,
            _error: PhantomData,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn run<T>(&self, mut op: impl FnMut() -> Result<T, E>) -> Result<T, E> {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(val) => return Ok(val),
                Err(error) if (self.should_retry)(&error) && attempt < max => {
                    log::warn!(
                        target: self.target,
                        "attempt {attempt}/{max} failed: {error:?}; retrying in {:?}",
                        self.delay,
                    );
                    attempt += 1;
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), &str> = Retry::new(4).run(|| {
            calls += 1;
            Err("nope")
        });
        assert_eq!(result, Err("nope"));
        assert_eq!(calls, 4);
    }

    #[test]
    fn returns_first_success() {
        let mut calls = 0;
        let result: Result<usize, &str> = Retry::new(10).run(|| {
            calls += 1;
            if calls < 3 {
                Err("not yet")
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn predicate_short_circuits() {
        let mut calls = 0;
        let result: Result<(), &str> = Retry::new(10)
            .with_predicate(|error: &&str| *error == "transient")
            .run(|| {
                calls += 1;
                if calls == 1 {
                    Err("transient")
                } else {
                    Err("fatal")
                }
            });
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls, 2);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let mut calls = 0;
        let _: Result<(), &str> = Retry::new(0).run(|| {
            calls += 1;
            Err("nope")
        });
        assert_eq!(calls, 1);
    }
}
