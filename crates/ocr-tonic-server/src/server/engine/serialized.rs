use super::{EngineError, ExclusiveEngine, PixelGrid, RecognitionEngine};
use ocr_tonic_core::RecognitionResult;
use parking_lot::Mutex;

/// Shares an [`ExclusiveEngine`] across workers by admitting one call at a
/// time.
///
/// Workers still run decode and response serialization in parallel; only the
/// engine call itself is serialized. With this adapter the effective
/// recognition concurrency is 1 regardless of the pool size.
pub struct Serialized<E> {
    inner: Mutex<E>,
}

impl<E: ExclusiveEngine> Serialized<E> {
    pub fn new(engine: E) -> Self {
        Self {
            inner: Mutex::new(engine),
        }
    }

    pub fn into_inner(self) -> E {
        self.inner.into_inner()
    }
}

impl<E: ExclusiveEngine> RecognitionEngine for Serialized<E> {
    fn recognize(&self, grid: &PixelGrid) -> Result<Vec<RecognitionResult>, EngineError> {
        self.inner.lock().recognize(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use std::time::Duration;

    /// Tracks how many calls overlap and remembers how often it ran.
    struct Counting {
        calls: usize,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl ExclusiveEngine for Counting {
        fn recognize(&mut self, _grid: &PixelGrid) -> Result<Vec<RecognitionResult>, EngineError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.calls += 1;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    #[test]
    fn calls_never_overlap() {
        let peak = Arc::new(AtomicUsize::new(0));
        let engine = Arc::new(Serialized::new(Counting {
            calls: 0,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::clone(&peak),
        }));
        let grid = PixelGrid::blank(4, 4);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let engine = Arc::clone(&engine);
                let grid = &grid;
                scope.spawn(move || engine.recognize(grid).unwrap());
            }
        });

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        let engine = Arc::into_inner(engine).unwrap().into_inner();
        assert_eq!(engine.calls, 4);
    }

    #[test]
    fn errors_pass_through() {
        struct Failing;
        impl ExclusiveEngine for Failing {
            fn recognize(&mut self, _: &PixelGrid) -> Result<Vec<RecognitionResult>, EngineError> {
                Err(EngineError::Backend("model not loaded".to_string()))
            }
        }

        let err = Serialized::new(Failing)
            .recognize(&PixelGrid::blank(1, 1))
            .unwrap_err();
        assert_eq!(err.to_string(), "model not loaded");
    }
}
