//! Tesseract OCR backend (drives the `tesseract` CLI).
//!
//! Images are recognized directly. PDFs are first rasterised page by page with
//! `pdftoppm`, then every page image goes through Tesseract.

use super::{Document, DocumentKind, OcrBackend, Recognition};
use crate::config::TesseractConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct TesseractBackend {
    config: TesseractConfig,
}

impl TesseractBackend {
    pub fn new(config: TesseractConfig) -> Self {
        Self { config }
    }

    /// Check that the binary runs; returns its version line.
    pub async fn probe(&self) -> Result<String> {
        let output = Command::new(&self.config.command)
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.config.command))?;

        if !output.status.success() {
            anyhow::bail!("{} --version exited with {}", self.config.command, output.status);
        }

        // Older releases print the version on stderr.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(stdout
            .lines()
            .chain(stderr.lines())
            .next()
            .unwrap_or("unknown version")
            .trim()
            .to_string())
    }

    /// Recognize one image file.
    async fn recognize_image(&self, path: &Path, language: &str) -> Result<Recognition> {
        let output = Command::new(&self.config.command)
            .arg(path)
            .arg("stdout")
            .arg("-l")
            .arg(language)
            .arg("--oem")
            .arg("3")
            .arg("--psm")
            .arg("6")
            .arg("tsv")
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.config.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Tesseract failed ({}): {}", output.status, stderr.trim());
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        debug!("Tesseract TSV output: {} bytes", tsv.len());
        Ok(parse_tsv(&tsv))
    }

    /// Rasterise a PDF into `dir`, returning page images in page order.
    async fn rasterise_pdf(&self, pdf: &Path, dir: &Path) -> Result<Vec<PathBuf>> {
        let prefix = dir.join("page");
        let output = Command::new(&self.config.pdftoppm_command)
            .arg("-r")
            .arg(self.config.dpi.to_string())
            .arg("-png")
            .arg(pdf)
            .arg(&prefix)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.config.pdftoppm_command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("PDF rasterisation failed ({}): {}", output.status, stderr.trim());
        }

        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "png").unwrap_or(false) {
                pages.push(path);
            }
        }

        // pdftoppm zero-pads page numbers to a common width, so a plain sort works.
        pages.sort();

        if pages.is_empty() {
            anyhow::bail!("PDF produced no pages");
        }
        Ok(pages)
    }

    async fn recognize_in(&self, dir: &Path, document: &Document, language: &str) -> Result<Recognition> {
        let input = dir.join(format!("input.{}", document.extension()));
        tokio::fs::write(&input, &document.data)
            .await
            .context("Failed to stage document")?;

        match document.kind {
            DocumentKind::Image => self.recognize_image(&input, language).await,
            DocumentKind::Pdf => {
                let pages = self.rasterise_pdf(&input, dir).await?;
                info!("Tesseract: {} pages rasterised from {}", pages.len(), document.filename);

                // Unreadable pages count as empty with confidence 0.
                let mut page_results = Vec::with_capacity(pages.len());
                let mut failures = Vec::new();
                for (i, page) in pages.iter().enumerate() {
                    match self.recognize_image(page, language).await {
                        Ok(recognition) => page_results.push(recognition),
                        Err(e) => {
                            warn!("Tesseract: page {} of {} failed: {:#}", i + 1, document.filename, e);
                            page_results.push(Recognition {
                                text: String::new(),
                                confidence: 0.0,
                            });
                            failures.push(e);
                        }
                    }
                }

                if failures.len() == pages.len() {
                    if let Some(e) = failures.pop() {
                        return Err(e.context(format!("All {} pages failed", pages.len())));
                    }
                }
                Ok(merge_pages(page_results))
            }
            DocumentKind::Text => anyhow::bail!("Tesseract cannot read plain-text documents"),
        }
    }
}

#[async_trait::async_trait]
impl OcrBackend for TesseractBackend {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, document: &Document, language: &str) -> Result<Recognition> {
        // Removed on drop, including when the caller times out or aborts.
        let mut builder = tempfile::Builder::new();
        builder.prefix("ocr_");
        let scratch = match &self.config.scratch_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .context("Failed to create scratch directory")?;

        self.recognize_in(scratch.path(), document, language).await
    }
}

/// Rebuild text and mean word confidence from Tesseract TSV output.
///
/// Word rows (level 5) sharing a block/paragraph/line are joined with spaces;
/// lines are separated by newlines and paragraphs by a blank line. Rows with a
/// confidence of zero or below do not count toward the mean.
fn parse_tsv(tsv: &str) -> Recognition {
    let mut text = String::new();
    let mut last_line: Option<(u32, u32, u32)> = None;
    let mut confidences = Vec::new();

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let word = cols[11].trim();
        if word.is_empty() {
            continue;
        }

        let num = |i: usize| cols[i].parse::<u32>().unwrap_or(0);
        let key = (num(2), num(3), num(4));

        match last_line {
            Some(prev) if prev == key => text.push(' '),
            Some(prev) if (prev.0, prev.1) == (key.0, key.1) => text.push('\n'),
            Some(_) => text.push_str("\n\n"),
            None => {}
        }
        text.push_str(word);
        last_line = Some(key);

        if let Ok(conf) = cols[10].trim().parse::<f64>() {
            if conf > 0.0 {
                confidences.push(conf);
            }
        }
    }

    Recognition {
        text,
        confidence: mean(&confidences),
    }
}

fn merge_pages(pages: Vec<Recognition>) -> Recognition {
    let confidences: Vec<f64> = pages.iter().map(|p| p.confidence).collect();
    let text = pages
        .into_iter()
        .map(|p| p.text)
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    Recognition {
        text,
        confidence: mean(&confidences),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut out = HEADER.to_string();
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out
    }

    #[test]
    fn test_parse_tsv_rebuilds_lines_and_paragraphs() {
        let input = tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t10\t50\t20\t96.5\tHello",
            "5\t1\t1\t1\t1\t2\t70\t10\t50\t20\t91.5\tworld",
            "5\t1\t1\t1\t2\t1\t10\t40\t50\t20\t90\tsecond",
            "5\t1\t2\t1\t1\t1\t10\t90\t50\t20\t82\tnext",
        ]);
        let rec = parse_tsv(&input);
        assert_eq!(rec.text, "Hello world\nsecond\n\nnext");
        assert!((rec.confidence - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_tsv_skips_nonpositive_confidence() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t0\t0\t1\t1\t-1\tnoise",
            "5\t1\t1\t1\t1\t2\t0\t0\t1\t1\t80\tword",
        ]);
        let rec = parse_tsv(&input);
        assert_eq!(rec.text, "noise word");
        assert_eq!(rec.confidence, 80.0);
    }

    #[test]
    fn test_parse_tsv_empty() {
        let rec = parse_tsv(HEADER);
        assert_eq!(rec.text, "");
        assert_eq!(rec.confidence, 0.0);
    }

    #[test]
    fn test_merge_pages_averages_confidence() {
        let merged = merge_pages(vec![
            Recognition { text: "page one".into(), confidence: 90.0 },
            Recognition { text: "  ".into(), confidence: 0.0 },
            Recognition { text: "page three".into(), confidence: 60.0 },
        ]);
        assert_eq!(merged.text, "page one\n\npage three");
        assert_eq!(merged.confidence, 50.0);
    }

    #[tokio::test]
    async fn test_missing_binary_fails_probe() {
        let backend = TesseractBackend::new(TesseractConfig {
            command: "definitely-not-tesseract-binary".into(),
            pdftoppm_command: "pdftoppm".into(),
            dpi: 300,
            scratch_dir: None,
        });
        assert!(backend.probe().await.is_err());
    }

    #[cfg(unix)]
    mod cli {
        use crate::config::TesseractConfig;
        use crate::ocr::tesseract::TesseractBackend;
        use crate::ocr::{Document, DocumentKind, OcrBackend, OcrEngine, RecognitionAdapter};
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;
        use tempfile::TempDir;

        /// Stand-in for tesseract: page images ending in `-2.png` are unreadable.
        const FAKE_TESSERACT: &str = r#"#!/bin/sh
case "$1" in
  *-2.png) echo "page unreadable" >&2; exit 1 ;;
esac
printf 'level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n'
printf '5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t90\tPageOne\n'
"#;

        fn script(dir: &TempDir, name: &str, body: &str) -> String {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().into_owned()
        }

        /// `pdftoppm` stand-in writing `pages` empty page images under the prefix.
        fn fake_pdftoppm(dir: &TempDir, pages: usize) -> String {
            let files = (1..=pages)
                .map(|n| format!("\"$5-{}.png\"", n))
                .collect::<Vec<_>>()
                .join(" ");
            script(dir, "pdftoppm", &format!("#!/bin/sh\ntouch {}\n", files))
        }

        fn backend(scratch: &TempDir, command: String, pdftoppm: String) -> TesseractBackend {
            TesseractBackend::new(TesseractConfig {
                command,
                pdftoppm_command: pdftoppm,
                dpi: 72,
                scratch_dir: Some(scratch.path().to_path_buf()),
            })
        }

        fn pdf() -> Document {
            Document::new("scan.pdf", DocumentKind::Pdf, b"%PDF-1.4".to_vec())
        }

        fn scratch_entries(scratch: &TempDir) -> usize {
            std::fs::read_dir(scratch.path()).unwrap().count()
        }

        #[tokio::test]
        async fn test_unreadable_page_is_skipped() {
            let bin = TempDir::new().unwrap();
            let scratch = TempDir::new().unwrap();
            let backend = backend(
                &scratch,
                script(&bin, "tesseract", FAKE_TESSERACT),
                fake_pdftoppm(&bin, 2),
            );

            let recognition = backend.recognize(&pdf(), "eng").await.unwrap();
            assert_eq!(recognition.text, "PageOne");
            assert_eq!(recognition.confidence, 45.0);
            assert_eq!(scratch_entries(&scratch), 0);
        }

        #[tokio::test]
        async fn test_every_page_unreadable_fails() {
            let bin = TempDir::new().unwrap();
            let scratch = TempDir::new().unwrap();
            let backend = backend(
                &scratch,
                script(&bin, "tesseract", "#!/bin/sh\necho broken >&2\nexit 1\n"),
                fake_pdftoppm(&bin, 2),
            );

            let err = backend.recognize(&pdf(), "eng").await.unwrap_err();
            assert!(format!("{:#}", err).contains("All 2 pages failed"));
            assert_eq!(scratch_entries(&scratch), 0);
        }

        #[tokio::test]
        async fn test_scratch_dir_removed_on_timeout() {
            let bin = TempDir::new().unwrap();
            let scratch = TempDir::new().unwrap();
            let backend = backend(
                &scratch,
                script(&bin, "tesseract", "#!/bin/sh\nsleep 5\n"),
                "pdftoppm".into(),
            );
            let engine = RecognitionAdapter::new(backend, Duration::from_millis(300));
            let image = Document::new("scan.png", DocumentKind::Image, vec![0x89, b'P', b'N', b'G']);

            let result = engine.run(&image, "eng").await;
            assert_eq!(result.error(), Some("Recognition timed out after 300ms"));
            assert_eq!(scratch_entries(&scratch), 0);
        }
    }
}
