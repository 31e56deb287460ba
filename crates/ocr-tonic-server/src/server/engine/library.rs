//! Recognition engine backed by libtesseract through `leptess`.
//!
//! A Tesseract API handle is created on, and never leaves, its own thread.
//! [`LibraryEngine`] runs `instances` such threads behind one job queue, so a
//! call is served by whichever instance is free and the worker pool stays the
//! bound on concurrency.

use super::{
    Device, EngineError, PixelGrid, RecognitionEngine,
    tesseract::{TesseractConfig, parse_tsv},
};
use ::leptess::LepTess;
use image::ImageFormat;
use ocr_tonic_core::RecognitionResult;
use parking_lot::Mutex;
use std::{
    io::Cursor,
    sync::{Arc, mpsc},
    thread,
};

type Outcome = Result<Vec<RecognitionResult>, EngineError>;

struct Job {
    png: Vec<u8>,
    reply: mpsc::SyncSender<Outcome>,
}

pub struct LibraryEngine {
    jobs: mpsc::Sender<Job>,
    instances: usize,
}

impl LibraryEngine {
    /// Starts `instances` threads, each holding an initialized Tesseract API
    /// for `config.languages`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnsupportedDevice`] for anything but [`Device::Cpu`].
    /// - [`EngineError::Backend`] if libtesseract fails to initialize, most
    ///   often because a language's traineddata is missing.
    pub fn new(config: &TesseractConfig, instances: usize) -> Result<Self, EngineError> {
        if config.device != Device::Cpu {
            return Err(EngineError::UnsupportedDevice(config.device));
        }

        let instances = instances.max(1);
        let (jobs, queue) = mpsc::channel::<Job>();
        let queue = Arc::new(Mutex::new(queue));

        for index in 0..instances {
            let (ready_tx, ready_rx) = mpsc::sync_channel(1);
            let queue = Arc::clone(&queue);
            let languages = config.languages.clone();

            thread::Builder::new()
                .name(format!("ocr-tess-{index}"))
                .spawn(move || {
                    let api = match LepTess::new(None, &languages) {
                        Ok(api) => api,
                        Err(e) => {
                            let _ = ready_tx.send(Err(EngineError::Backend(format!(
                                "failed to initialize libtesseract for `{languages}`: {e:?}"
                            ))));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    serve(api, &queue);
                })
                .map_err(|source| EngineError::Io {
                    context: "failed to spawn libtesseract thread",
                    source,
                })?;

            // Threads already started exit once `jobs` is dropped.
            ready_rx.recv().map_err(|_| {
                EngineError::Backend("libtesseract thread exited during initialization".to_string())
            })??;
        }

        Ok(Self { jobs, instances })
    }

    pub const fn instances(&self) -> usize {
        self.instances
    }
}

fn serve(mut api: LepTess, queue: &Mutex<mpsc::Receiver<Job>>) {
    loop {
        let next = queue.lock().recv();
        let Ok(Job { png, reply }) = next else {
            break;
        };
        let _ = reply.send(recognize_png(&mut api, &png));
    }
}

fn recognize_png(api: &mut LepTess, png: &[u8]) -> Outcome {
    api.set_image_from_mem(png)
        .map_err(|e| EngineError::Backend(format!("libtesseract rejected the image: {e:?}")))?;
    let tsv = api
        .get_tsv_text(0)
        .map_err(|e| EngineError::MalformedOutput {
            reason: format!("{e:?}"),
        })?;
    parse_tsv(&tsv)
}

impl RecognitionEngine for LibraryEngine {
    fn recognize(&self, grid: &PixelGrid) -> Result<Vec<RecognitionResult>, EngineError> {
        let mut png = Vec::new();
        grid.as_rgb()
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let (reply, outcome) = mpsc::sync_channel(1);
        self.jobs.send(Job { png, reply }).map_err(|_| {
            EngineError::Backend("no libtesseract thread is running".to_string())
        })?;
        outcome.recv().map_err(|_| {
            EngineError::Backend("libtesseract thread died during recognition".to_string())
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::engine::Backend;
    use std::path::PathBuf;

    fn config(device: Device) -> TesseractConfig {
        TesseractConfig {
            backend: Backend::Library,
            binary: PathBuf::from("tesseract"),
            languages: "eng".to_string(),
            device,
        }
    }

    #[test]
    fn gpu_device_is_unsupported() {
        let err = LibraryEngine::new(&config(Device::Gpu { ordinal: 0 }), 2)
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::UnsupportedDevice(_)));
    }

    #[test]
    fn unknown_language_fails_construction() {
        let err = LibraryEngine::new(
            &TesseractConfig {
                languages: "no_such_language".to_string(),
                ..config(Device::Cpu)
            },
            1,
        )
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::Backend(_)));
    }

    #[test]
    #[ignore = "needs libtesseract with eng traineddata"]
    fn blank_grid_has_no_text() {
        let engine = LibraryEngine::new(&config(Device::Cpu), 2).unwrap();
        assert_eq!(engine.instances(), 2);
        let results = engine.recognize(&PixelGrid::blank(100, 100)).unwrap();
        assert!(results.is_empty());
    }
}
