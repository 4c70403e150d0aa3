use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use doc_model::{
    valid_opacity, valid_scale, Annotation, Bbox, ExportPolicy, PendingSelection, Point,
    ReadingColors, Rgb, Settings, SyncStatus,
};
use export::{ExportOutcome, ExportRequest, Exporter};
use pdf_engine::{DocumentHandle, LopdfEditor, OpenSource, PdfEngine};
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use storage::{document_id_for_path, local_file_ref, FolderSink, Storage};
use viewer_core::{composite, marks_for_page, ColorFilterCompiler, DocumentView};

mod session;

use session::DocumentSession;

/// Scale used when only text presence matters.
const TEXT_SCAN_SCALE: f32 = 0.25;

#[derive(Debug, Parser)]
#[command(name = "marginalia")]
#[command(about = "Read, annotate and export PDF documents")]
pub struct Cli {
    /// Directory holding settings and annotations. Defaults to
    /// `MARGINALIA_DATA_DIR`, then the platform data directory.
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    /// Whose annotations to read and write.
    #[arg(long, global = true, default_value = "local")]
    user: String,
    #[command(flatten)]
    overrides: SettingsOverrides,
    #[command(subcommand)]
    command: Commands,
}

/// Per-invocation overrides of the stored settings.
#[derive(Debug, Default, Args)]
struct SettingsOverrides {
    /// Rendering scale in pixels per point.
    #[arg(long, global = true, value_parser = parse_scale)]
    scale: Option<f32>,
    #[arg(long, global = true, value_name = "#RRGGBB")]
    highlight_color: Option<Rgb>,
    #[arg(long, global = true, value_name = "0..1", value_parser = parse_opacity)]
    highlight_opacity: Option<f32>,
    #[arg(long, global = true, value_name = "#RRGGBB")]
    note_color: Option<Rgb>,
    #[arg(long, global = true, value_name = "0..1", value_parser = parse_opacity)]
    note_opacity: Option<f32>,
    /// Reading-mode background color.
    #[arg(long, global = true, value_name = "#RRGGBB")]
    page_color: Option<Rgb>,
    /// Reading-mode text color.
    #[arg(long, global = true, value_name = "#RRGGBB")]
    text_color: Option<Rgb>,
    /// Attempts per remote call before a change is reported as failed.
    #[arg(long, global = true)]
    max_attempts: Option<u32>,
}

impl SettingsOverrides {
    fn apply(&self, settings: &mut Settings) {
        if let Some(scale) = self.scale {
            settings.render_scale = scale;
        }
        if let Some(color) = self.highlight_color {
            settings.highlight.color = color;
        }
        if let Some(opacity) = self.highlight_opacity {
            settings.highlight.opacity = opacity;
        }
        if let Some(color) = self.note_color {
            settings.note.color = color;
        }
        if let Some(opacity) = self.note_opacity {
            settings.note.opacity = opacity;
        }
        if self.page_color.is_some() || self.text_color.is_some() {
            let base = settings.reading_colors.unwrap_or_default();
            settings.reading_colors = Some(ReadingColors {
                page: self.page_color.unwrap_or(base.page),
                text: self.text_color.unwrap_or(base.text),
            });
        }
        if let Some(attempts) = self.max_attempts {
            settings.sync_max_attempts = attempts.max(1);
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print the selectable text of one page or the whole document.
    Text {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        page: Option<u32>,
    },
    /// Render a page to PNG with reading colors and annotations applied.
    Render {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Leave stored annotations off the image.
        #[arg(long)]
        no_annotations: bool,
    },
    /// Highlight a selection, one rectangle per line in page pixels.
    Highlight {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        page: u32,
        /// Selected text.
        #[arg(long)]
        text: String,
        #[arg(long = "line", value_name = "X,Y,W,H", required = true, value_parser = parse_rect)]
        lines: Vec<Bbox>,
    },
    /// Attach a note at a point in page pixels.
    Note {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        page: u32,
        #[arg(long, value_name = "X,Y", value_parser = parse_point)]
        at: Point,
        #[arg(long)]
        text: String,
    },
    /// List stored annotations.
    List {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        page: Option<u32>,
    },
    /// Delete an annotation by id.
    Delete {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(value_name = "ID")]
        id: String,
    },
    /// Retry changes that were not persisted.
    Sync {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Write a copy of the PDF with annotations drawn into it.
    Export {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, value_name = "copy|replace")]
        policy: Option<ExportPolicy>,
        /// Confirm replacing the original.
        #[arg(long)]
        yes: bool,
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// Print effective settings.
    Config {
        /// Persist the effective settings, including overrides.
        #[arg(long)]
        save: bool,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    document_id: String,
    page_count: u32,
    first_page_size_pt: Option<PageSizeOutput>,
    image_only_pages: Vec<u32>,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

#[derive(Debug, Serialize)]
struct ListEntry<'a> {
    #[serde(flatten)]
    annotation: &'a Annotation,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct CreatedOutput {
    ids: Vec<String>,
    unsynced: usize,
}

#[derive(Debug, Serialize)]
struct SyncOutput {
    saved: usize,
    deleted: usize,
    failed: Vec<FailureOutput>,
}

#[derive(Debug, Serialize)]
struct FailureOutput {
    id: String,
    operation: annotations::SyncOperation,
    attempts: u32,
    error: String,
}

#[derive(Debug, Serialize)]
struct ExportOutput {
    outcome: &'static str,
    path: String,
    annotations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_error: Option<String>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    if let Commands::Version = cli.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let storage = open_storage(cli.data_dir.as_deref())?;
    let mut settings = storage.load_settings().context("failed to load settings")?;
    cli.overrides.apply(&mut settings);
    settings.validate().context("invalid settings")?;

    let context = RunContext { storage, settings, user: cli.user };
    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Text { file, page } => run_text(&file, page),
        Commands::Render { file, page, output, no_annotations } => {
            run_render(&context, &file, page, output.as_deref(), no_annotations)
        }
        Commands::Highlight { file, page, text, lines } => {
            run_highlight(&context, &file, page, text, lines)
        }
        Commands::Note { file, page, at, text } => run_note(&context, &file, page, at, &text),
        Commands::List { file, page } => run_list(&context, &file, page),
        Commands::Delete { file, id } => run_delete(&context, &file, &id),
        Commands::Sync { file } => run_sync(&context, &file),
        Commands::Export { file, policy, yes, output_dir } => {
            run_export(&context, &file, policy, yes, output_dir)
        }
        Commands::Config { save } => run_config(&context, save),
        Commands::Version => Ok(()),
    }
}

struct RunContext {
    storage: Storage,
    settings: Settings,
    user: String,
}

impl RunContext {
    fn session(&self, file: &Path) -> Result<DocumentSession> {
        DocumentSession::open(self.storage.clone(), &self.user, file, &self.settings)
    }
}

fn open_storage(data_dir: Option<&Path>) -> Result<Storage> {
    if let Some(dir) = data_dir {
        return Ok(Storage::with_root(dir));
    }
    if let Some(dir) = std::env::var_os("MARGINALIA_DATA_DIR") {
        return Ok(Storage::with_root(PathBuf::from(dir)));
    }
    Storage::from_default_project().context("failed to locate data directory")
}

#[cfg(feature = "pdfium")]
fn open_engine() -> Result<Box<dyn PdfEngine>> {
    let engine = pdf_engine::pdfium_backend::PdfiumEngine::from_system_library()
        .context("failed to load pdfium")?;
    Ok(Box::new(engine))
}

#[cfg(not(feature = "pdfium"))]
fn open_engine() -> Result<Box<dyn PdfEngine>> {
    Ok(Box::new(pdf_engine::default_engine()))
}

fn open_document(file: &Path) -> Result<(Box<dyn PdfEngine>, DocumentHandle)> {
    ensure_pdf_exists(file)?;

    let mut engine = open_engine()?;
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;
    Ok((engine, handle))
}

fn run_info(file: &Path) -> Result<()> {
    let (mut engine, handle) = open_document(file)?;

    let page_count = engine.page_count(handle)?;
    let first_page_size_pt = if page_count > 0 {
        let size = engine.page(handle, 1)?.size();
        Some(PageSizeOutput { width: size.width_pt, height: size.height_pt })
    } else {
        None
    };

    let mut view = DocumentView::open(engine.as_ref(), handle, TEXT_SCAN_SCALE)
        .context("failed to read pages")?;
    view.request_all();
    view.render_pending(engine.as_ref());

    let payload = InfoOutput {
        path: file.display().to_string(),
        document_id: document_id_for_path(file),
        page_count,
        first_page_size_pt,
        image_only_pages: view.image_only_pages(),
    };
    print_json(&payload)?;

    view.teardown();
    engine.close(handle)?;

    Ok(())
}

fn run_text(file: &Path, page: Option<u32>) -> Result<()> {
    let (mut engine, handle) = open_document(file)?;
    let mut view = DocumentView::open(engine.as_ref(), handle, TEXT_SCAN_SCALE)
        .context("failed to read pages")?;

    let pages: Vec<u32> = match page {
        Some(page) => {
            ensure_page_in_range(page, view.page_count())?;
            view.request_around(page, 0);
            vec![page]
        }
        None => {
            view.request_all();
            (1..=view.page_count()).collect()
        }
    };

    let report = view.render_pending(engine.as_ref());
    if let Some((failed, error)) = report.failed.first() {
        anyhow::bail!("failed to read text of page {failed}: {error}");
    }

    let texts: Vec<String> = pages
        .iter()
        .filter_map(|number| view.page(*number))
        .map(|renderer| renderer.overlay().plain_text())
        .collect();
    // Form feed between pages, as pdftotext does.
    println!("{}", texts.join("\n\u{c}"));

    view.teardown();
    engine.close(handle)?;

    Ok(())
}

fn run_render(
    context: &RunContext,
    file: &Path,
    page: u32,
    output: Option<&Path>,
    no_annotations: bool,
) -> Result<()> {
    let (mut engine, handle) = open_document(file)?;
    let settings = &context.settings;

    let mut view = DocumentView::open(engine.as_ref(), handle, settings.render_scale)
        .context("failed to read pages")?;
    ensure_page_in_range(page, view.page_count())?;

    view.request_around(page, 0);
    let report = view.render_pending(engine.as_ref());
    if let Some((_, error)) = report.failed.first() {
        anyhow::bail!("{error}");
    }

    let mut image = view
        .page(page)
        .and_then(|renderer| renderer.surface().cloned())
        .with_context(|| format!("page {page} was not rendered"))?;

    let filter = ColorFilterCompiler::new(settings.reading_colors);
    if !filter.matrix().is_identity() {
        filter.matrix().apply(&mut image);
    }

    if !no_annotations {
        let session = context.session(file)?;
        let annotations = session.store().annotations();
        let marks = marks_for_page(annotations, page, view.scale(), settings.render_scale);
        composite(&mut image, &marks);
    }

    let output = output.map(ToOwned::to_owned).unwrap_or_else(|| default_render_output(file, page));
    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    image
        .save(&output)
        .with_context(|| format!("failed to write image to {}", output.display()))?;

    println!("{}", output.display());

    view.teardown();
    engine.close(handle)?;

    Ok(())
}

fn run_highlight(
    context: &RunContext,
    file: &Path,
    page: u32,
    text: String,
    lines: Vec<Bbox>,
) -> Result<()> {
    check_page(file, page)?;
    if text.trim().is_empty() {
        anyhow::bail!("highlight text is empty");
    }

    let mut session = context.session(file)?;
    let selection = PendingSelection {
        page,
        text: text.trim().to_owned(),
        line_rects: lines,
        anchor: Point::default(),
    };
    let created = session.store_mut().create_highlight(
        selection,
        context.settings.highlight,
        context.settings.render_scale,
    )?;

    finish_created(session, created.len())
}

fn run_note(context: &RunContext, file: &Path, page: u32, at: Point, text: &str) -> Result<()> {
    check_page(file, page)?;

    let mut session = context.session(file)?;
    session
        .store_mut()
        .create_note(page, at.x, at.y, text, context.settings.note, context.settings.render_scale)?
        .context("note text is empty")?;

    finish_created(session, 1)
}

/// Syncs and reports the ids of the `count` most recent records, which are
/// permanent when the sync went through.
fn finish_created(mut session: DocumentSession, count: usize) -> Result<()> {
    session.sync()?;

    let records = session.store().records();
    let ids = records[records.len().saturating_sub(count)..]
        .iter()
        .map(|record| record.annotation.id.to_string())
        .collect();
    print_json(&CreatedOutput { ids, unsynced: session.store().pending_changes().len() })
}

fn run_list(context: &RunContext, file: &Path, page: Option<u32>) -> Result<()> {
    ensure_pdf_exists(file)?;
    let session = context.session(file)?;

    let entries: Vec<ListEntry<'_>> = session
        .store()
        .records()
        .iter()
        .filter(|record| page.map_or(true, |page| record.annotation.page == page))
        .map(|record| ListEntry {
            annotation: &record.annotation,
            status: match record.status {
                SyncStatus::Pending => "pending",
                SyncStatus::Synced => "synced",
                SyncStatus::Failed { .. } => "failed",
            },
        })
        .collect();

    print_json(&entries)
}

fn run_delete(context: &RunContext, file: &Path, id: &str) -> Result<()> {
    ensure_pdf_exists(file)?;
    let mut session = context.session(file)?;

    let id = doc_model::AnnotationId::new(id);
    if !session.store_mut().delete(&id) {
        anyhow::bail!("annotation {id} not found");
    }

    let report = session.sync()?;
    print_sync(&session, report)
}

fn run_sync(context: &RunContext, file: &Path) -> Result<()> {
    ensure_pdf_exists(file)?;
    let mut session = context.session(file)?;

    let retried = session.store_mut().retry_failed();
    tracing::debug!(retried, "queued failed changes again");

    let report = session.sync()?;
    print_sync(&session, report)
}

fn print_sync(session: &DocumentSession, report: annotations::SyncReport) -> Result<()> {
    let failed = session
        .store()
        .failed()
        .into_iter()
        .map(|failure| FailureOutput {
            id: failure.id.to_string(),
            operation: failure.operation,
            attempts: failure.attempts,
            error: failure.error,
        })
        .collect();

    print_json(&SyncOutput { saved: report.saved, deleted: report.deleted, failed })
}

fn run_export(
    context: &RunContext,
    file: &Path,
    policy: Option<ExportPolicy>,
    confirmed: bool,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    ensure_pdf_exists(file)?;
    let mut session = context.session(file)?;
    let report = session.sync()?;
    if report.failed > 0 {
        tracing::warn!(failed = report.failed, "exporting annotations that are not persisted yet");
    }

    let original = local_file_ref(file)
        .with_context(|| format!("failed to resolve {}", file.display()))?;
    let bytes = fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let annotations = session.store().snapshot();

    let request = ExportRequest {
        original: &original,
        original_bytes: &bytes,
        annotations: &annotations,
        session_scale: context.settings.render_scale,
        policy: policy.unwrap_or(context.settings.export_policy),
        confirmed,
    };
    let outcome = Exporter::new()
        .run::<LopdfEditor>(request, &FolderSink::new(output_dir))
        .context("export failed")?;

    let (label, original_error) = match &outcome {
        ExportOutcome::Copied { .. } => ("copied", None),
        ExportOutcome::Replaced { .. } => ("replaced", None),
        ExportOutcome::OriginalRetained { error, .. } => ("original-retained", Some(error.clone())),
    };

    print_json(&ExportOutput {
        outcome: label,
        path: outcome.file().id.clone(),
        annotations: annotations.len(),
        original_error,
    })
}

fn run_config(context: &RunContext, save: bool) -> Result<()> {
    if save {
        context.storage.save_settings(&context.settings).context("failed to save settings")?;
    }
    print_json(&context.settings)
}

fn check_page(file: &Path, page: u32) -> Result<()> {
    let (mut engine, handle) = open_document(file)?;
    let page_count = engine.page_count(handle)?;
    engine.close(handle)?;
    ensure_page_in_range(page, page_count)
}

fn ensure_page_in_range(page: u32, page_count: u32) -> Result<()> {
    if page == 0 {
        anyhow::bail!("--page is 1-based and must be >= 1");
    }
    if page > page_count {
        anyhow::bail!("page {page} out of range (document has {page_count} pages)");
    }
    Ok(())
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

fn default_render_output(file: &Path, page: u32) -> PathBuf {
    let stem = file.file_stem().and_then(|name| name.to_str()).unwrap_or("page");

    file.with_file_name(format!("{stem}-page-{page}.png"))
}

fn parse_numbers<const N: usize>(value: &str) -> Result<[f32; N], String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != N {
        return Err(format!("expected {N} comma-separated numbers, got {value:?}"));
    }

    let mut numbers = [0.0; N];
    for (slot, part) in numbers.iter_mut().zip(parts) {
        *slot = part
            .parse::<f32>()
            .ok()
            .filter(|number| number.is_finite())
            .ok_or_else(|| format!("{part:?} is not a number"))?;
    }
    Ok(numbers)
}

fn parse_rect(value: &str) -> Result<Bbox, String> {
    let [x, y, width, height] = parse_numbers::<4>(value)?;
    if width <= 0.0 || height <= 0.0 {
        return Err(format!("line rectangle {value:?} has no area"));
    }
    Ok(Bbox::new(x, y, width, height))
}

fn parse_point(value: &str) -> Result<Point, String> {
    let [x, y] = parse_numbers::<2>(value)?;
    Ok(Point::new(x, y))
}

fn parse_opacity(value: &str) -> Result<f32, String> {
    let [opacity] = parse_numbers::<1>(value)?;
    if !valid_opacity(opacity) {
        return Err(format!("opacity {value:?} is outside 0..1"));
    }
    Ok(opacity)
}

fn parse_scale(value: &str) -> Result<f32, String> {
    let [scale] = parse_numbers::<1>(value)?;
    if !valid_scale(scale) {
        return Err(format!("scale {value:?} must be greater than zero"));
    }
    Ok(scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_and_point_arguments_parse() {
        assert_eq!(
            parse_rect("10, 20.5,30,4").expect("valid rect"),
            Bbox::new(10.0, 20.5, 30.0, 4.0)
        );
        assert_eq!(parse_point("3,4").expect("valid point"), Point::new(3.0, 4.0));
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        assert!(parse_rect("1,2,3").is_err());
        assert!(parse_rect("1,2,0,4").is_err());
        assert!(parse_rect("1,2,x,4").is_err());
        assert!(parse_point("1,NaN").is_err());
    }

    #[test]
    fn opacity_must_be_a_number_between_zero_and_one() {
        assert_eq!(parse_opacity("0.25"), Ok(0.25));
        assert_eq!(parse_opacity("1"), Ok(1.0));
        for bad in ["NaN", "inf", "-0.1", "1.01", "half"] {
            assert!(parse_opacity(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn scale_must_be_positive_and_finite() {
        assert_eq!(parse_scale("0.5"), Ok(0.5));
        for bad in ["0", "-1", "NaN", "inf"] {
            assert!(parse_scale(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn invalid_override_fails_argument_parsing() {
        for args in [
            ["marginalia", "--highlight-opacity", "NaN", "version"],
            ["marginalia", "--note-opacity", "2", "version"],
            ["marginalia", "--scale", "0", "version"],
        ] {
            assert!(Cli::try_parse_from(args).is_err(), "{args:?} should be rejected");
        }
    }

    #[test]
    fn overrides_only_touch_given_fields() {
        let mut settings = Settings::default();
        let overrides = SettingsOverrides {
            scale: Some(2.0),
            text_color: Some(Rgb::WHITE),
            highlight_opacity: Some(0.7),
            ..SettingsOverrides::default()
        };

        overrides.apply(&mut settings);

        assert_eq!(settings.render_scale, 2.0);
        assert_eq!(settings.highlight.opacity, 0.7);
        assert_eq!(
            settings.reading_colors,
            Some(ReadingColors { page: Rgb::WHITE, text: Rgb::WHITE })
        );
        assert_eq!(settings.note, Settings::default().note);
    }

    #[test]
    fn page_numbers_are_one_based() {
        assert!(ensure_page_in_range(0, 3).is_err());
        assert!(ensure_page_in_range(4, 3).is_err());
        assert!(ensure_page_in_range(3, 3).is_ok());
    }

    #[test]
    fn default_render_output_sits_next_to_source() {
        let output = default_render_output(Path::new("/docs/paper.pdf"), 2);
        assert_eq!(output, PathBuf::from("/docs/paper-page-2.png"));
    }
}
