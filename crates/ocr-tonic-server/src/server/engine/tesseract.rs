//! Recognition engine backed by the `tesseract` command-line tool.
//!
//! Each call encodes the grid as PNG, pipes it to
//! `tesseract stdin stdout -l <languages> tsv` and folds the word-level TSV
//! rows into one [`RecognitionResult`] per text line. Calls share no state,
//! so one [`TesseractEngine`] serves every worker concurrently.

use super::{Backend, Device, EngineError, ExclusiveEngine, PixelGrid, RecognitionEngine};
use image::ImageFormat;
use ocr_tonic_core::{BoundingBox, RecognitionResult};
use std::{
    collections::HashSet,
    io::{Cursor, Write},
    path::PathBuf,
    process::{Command, Output, Stdio},
};

/// TSV row level for a single word.
const WORD_LEVEL: u8 = 5;

/// Settings passed to [`TesseractEngine::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TesseractConfig {
    pub backend: Backend,
    pub binary: PathBuf,
    /// `+`-separated language codes, as accepted by `tesseract -l`.
    pub languages: String,
    pub device: Device,
}

#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: PathBuf,
    languages: String,
}

impl TesseractEngine {
    /// Verifies that the binary runs and every requested language is
    /// installed.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnsupportedDevice`] for anything but [`Device::Cpu`].
    /// - [`EngineError::Spawn`] / [`EngineError::Failed`] if the binary cannot
    ///   be executed.
    /// - [`EngineError::MissingLanguage`] for an unknown language code.
    pub fn new(config: TesseractConfig) -> Result<Self, EngineError> {
        if config.device != Device::Cpu {
            return Err(EngineError::UnsupportedDevice(config.device));
        }

        let engine = Self {
            binary: config.binary,
            languages: config.languages,
        };

        let version = engine.run(&["--version"], None)?;
        let version = String::from_utf8_lossy(&version.stdout);
        tracing::info!(
            binary = %engine.binary.display(),
            version = version.lines().next().unwrap_or_default(),
            "Found tesseract"
        );

        let listing = engine.run(&["--list-langs"], None)?;
        // Older releases print the list on stderr.
        let listing = format!(
            "{}\n{}",
            String::from_utf8_lossy(&listing.stdout),
            String::from_utf8_lossy(&listing.stderr)
        );
        let installed = installed_languages(&listing);
        if let Some(missing) = engine
            .languages
            .split('+')
            .find(|language| !installed.contains(language))
        {
            return Err(EngineError::MissingLanguage {
                language: missing.to_string(),
            });
        }

        Ok(engine)
    }

    pub fn languages(&self) -> &str {
        &self.languages
    }

    /// Runs the binary to completion, optionally feeding `input` on stdin.
    fn run(&self, args: &[&str], input: Option<&[u8]>) -> Result<Output, EngineError> {
        let mut child = Command::new(&self.binary)
            .args(args)
            // One OpenMP thread per process; the worker count bounds CPU use.
            .env("OMP_THREAD_LIMIT", "1")
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.binary.display().to_string(),
                source,
            })?;

        let stdin = child.stdin.take();
        // stdin is written from a second thread so a large image cannot
        // deadlock against a full stdout pipe.
        let (written, output) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || match (stdin, input) {
                (Some(mut stdin), Some(input)) => stdin.write_all(input),
                _ => Ok(()),
            });
            let output = child.wait_with_output();
            (writer.join(), output)
        });

        let output = output.map_err(|source| EngineError::Io {
            context: "failed to collect tesseract output",
            source,
        })?;

        if !output.status.success() {
            return Err(EngineError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        match written {
            Ok(Ok(())) => Ok(output),
            Ok(Err(source)) => Err(EngineError::Io {
                context: "failed to write image to tesseract",
                source,
            }),
            Err(_) => Err(EngineError::Backend(
                "tesseract stdin writer panicked".to_string(),
            )),
        }
    }
}

impl RecognitionEngine for TesseractEngine {
    fn recognize(&self, grid: &PixelGrid) -> Result<Vec<RecognitionResult>, EngineError> {
        let mut png = Vec::new();
        grid.as_rgb()
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let output = self.run(
            &["stdin", "stdout", "-l", &self.languages, "tsv"],
            Some(&png),
        )?;

        let tsv = String::from_utf8(output.stdout).map_err(|e| EngineError::MalformedOutput {
            reason: format!("output is not UTF-8: {e}"),
        })?;

        parse_tsv(&tsv)
    }
}

impl ExclusiveEngine for TesseractEngine {
    fn recognize(&mut self, grid: &PixelGrid) -> Result<Vec<RecognitionResult>, EngineError> {
        RecognitionEngine::recognize(self, grid)
    }
}

fn installed_languages(listing: &str) -> HashSet<&str> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of available languages"))
        .collect()
}

/// Identifies a text line: `(page, block, paragraph, line)`.
type LineKey = [u32; 4];

struct LineBuilder {
    key: LineKey,
    words: Vec<String>,
    confidence_sum: f32,
    bbox: BoundingBox,
}

impl LineBuilder {
    fn finish(self) -> RecognitionResult {
        let count = self.words.len() as f32;
        RecognitionResult {
            text: self.words.join(" "),
            confidence: self.confidence_sum / count,
            bbox: self.bbox,
        }
    }
}

/// Folds tesseract's TSV output into one result per text line.
///
/// Columns: `level page_num block_num par_num line_num word_num left top
/// width height conf text`. Only word rows with a non-negative confidence and
/// non-blank text contribute. Lines keep the order in which tesseract emits
/// them.
pub fn parse_tsv(tsv: &str) -> Result<Vec<RecognitionResult>, EngineError> {
    let mut lines: Vec<LineBuilder> = Vec::new();

    for (row_idx, row) in tsv.lines().enumerate() {
        if row.trim().is_empty() || row.starts_with("level") {
            continue;
        }

        let columns: Vec<&str> = row.splitn(12, '\t').collect();
        if columns.len() < 11 {
            return Err(EngineError::MalformedOutput {
                reason: format!("row {row_idx} has {} columns", columns.len()),
            });
        }

        let number = |idx: usize| -> Result<u32, EngineError> {
            columns[idx]
                .trim()
                .parse()
                .map_err(|_| EngineError::MalformedOutput {
                    reason: format!("row {row_idx}, column {idx}: {:?}", columns[idx]),
                })
        };

        if number(0)? != u32::from(WORD_LEVEL) {
            continue;
        }

        let confidence: f32 =
            columns[10]
                .trim()
                .parse()
                .map_err(|_| EngineError::MalformedOutput {
                    reason: format!("row {row_idx}, confidence: {:?}", columns[10]),
                })?;
        let text = columns.get(11).map_or("", |text| text.trim());
        if confidence < 0.0 || text.is_empty() {
            continue;
        }

        let key = [number(1)?, number(2)?, number(3)?, number(4)?];
        let bbox = BoundingBox {
            left: number(6)?,
            top: number(7)?,
            width: number(8)?,
            height: number(9)?,
        };

        match lines.last_mut() {
            Some(line) if line.key == key => {
                line.words.push(text.to_string());
                line.confidence_sum += confidence;
                line.bbox = line.bbox.union(&bbox);
            }
            _ => lines.push(LineBuilder {
                key,
                words: vec![text.to_string()],
                confidence_sum: confidence,
                bbox,
            }),
        }
    }

    Ok(lines.into_iter().map(LineBuilder::finish).collect())
}
