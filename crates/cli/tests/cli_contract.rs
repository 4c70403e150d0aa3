use assert_cmd::cargo::cargo_bin_cmd;
use pdf_engine::{fixtures, LopdfEngine, OpenSource, PdfEngine};
use predicates::prelude::*;
use serde_json::Value;
use std::path::{Path, PathBuf};

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self { dir: tempfile::tempdir().expect("temp dir should be created") }
    }

    fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    /// Two pages: one line of text, then an image-only page.
    fn paper(&self) -> PathBuf {
        self.write("paper.pdf", &fixtures::pdf_with_pages(&[&[(72.0, 700.0, "Hello world")], &[]]))
    }

    fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).expect("fixture should be written");
        path
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = cargo_bin_cmd!("marginalia");
        cmd.arg("--data-dir").arg(self.data_dir()).env_remove("RUST_LOG");
        cmd
    }

    fn json(&self, args: &[&str], file: &Path) -> Value {
        let output = self.cmd().args(args).arg(file).assert().success().get_output().stdout.clone();
        serde_json::from_slice(&output).expect("stdout should contain valid json")
    }
}

#[test]
fn info_emits_stable_json_contract() {
    let workspace = Workspace::new();
    let mut value = workspace.json(&["info"], &workspace.paper());

    assert_eq!(value["first_page_size_pt"]["width"], 612.0);
    assert_eq!(value["first_page_size_pt"]["height"], 792.0);
    if let Some(object) = value.as_object_mut() {
        object.remove("first_page_size_pt");
    }
    value["path"] = Value::String("<FIXTURE>".to_owned());
    value["document_id"] = Value::String("<DOCUMENT_ID>".to_owned());

    insta::assert_json_snapshot!("cli_info_pdf", value);
}

#[test]
fn text_prints_selectable_text() {
    let workspace = Workspace::new();

    workspace
        .cmd()
        .arg("text")
        .arg(workspace.paper())
        .arg("--page")
        .arg("1")
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello world"));
}

#[test]
fn render_writes_png_at_requested_scale() {
    let workspace = Workspace::new();
    let output_path = workspace.dir.path().join("out").join("page.png");

    workspace
        .cmd()
        .arg("render")
        .arg(workspace.paper())
        .args(["--page", "1", "--scale", "0.5"])
        .args(["--page-color", "#202020", "--text-color", "#F0F0F0"])
        .arg("--output")
        .arg(&output_path)
        .assert()
        .success();

    let image = image::open(&output_path).expect("render output should be readable image");
    assert_eq!((image.width(), image.height()), (306, 396));
}

#[test]
fn highlight_is_persisted_and_listed() {
    let workspace = Workspace::new();
    let paper = workspace.paper();

    let created = workspace.json(
        &[
            "highlight",
            "--page",
            "1",
            "--text",
            "Hello world",
            "--line",
            "93.6,110,100,16",
            "--line",
            "93.6,128,40,16",
        ],
        &paper,
    );
    assert_eq!(created["ids"].as_array().map(Vec::len), Some(2));
    assert_eq!(created["unsynced"], 0);

    let listed = workspace.json(&["list"], &paper);
    let entries = listed.as_array().expect("list output is an array");
    assert_eq!(entries.len(), 2);
    for entry in entries {
        assert_eq!(entry["status"], "synced");
        assert_eq!(entry["type"], "highlight");
        assert_eq!(entry["author"], "local");
        assert!(!entry["id"].as_str().unwrap_or("tmp-").starts_with("tmp-"));
    }
}

#[test]
fn nan_opacity_is_refused_and_annotations_stay_loadable() {
    let workspace = Workspace::new();
    let paper = workspace.paper();
    workspace.json(&["note", "--page", "1", "--at", "26,13", "--text", "kept"], &paper);

    workspace
        .cmd()
        .arg("highlight")
        .arg(&paper)
        .args(["--page", "1", "--text", "Hello", "--line", "93.6,110,100,16"])
        .args(["--highlight-opacity", "NaN"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("opacity"));

    let listed = workspace.json(&["list"], &paper);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
}

#[test]
fn invalid_stored_settings_are_reported() {
    let workspace = Workspace::new();
    let data_dir = workspace.data_dir();
    std::fs::create_dir_all(&data_dir).expect("data dir should be created");
    std::fs::write(
        data_dir.join("settings.json"),
        r#"{"version": 1, "settings": {"render_scale": 0}}"#,
    )
    .expect("settings should be written");

    workspace
        .cmd()
        .arg("list")
        .arg(workspace.paper())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid settings"));
}

#[test]
fn delete_removes_annotation() {
    let workspace = Workspace::new();
    let paper = workspace.paper();
    let created =
        workspace.json(&["note", "--page", "1", "--at", "26,13", "--text", "check this"], &paper);
    let id = created["ids"][0].as_str().expect("note id").to_owned();

    workspace.cmd().arg("delete").arg(&paper).arg(&id).assert().success();

    let listed = workspace.json(&["list"], &paper);
    assert_eq!(listed.as_array().map(Vec::len), Some(0));

    workspace
        .cmd()
        .arg("delete")
        .arg(&paper)
        .arg(&id)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn blank_note_is_refused() {
    let workspace = Workspace::new();

    workspace
        .cmd()
        .arg("note")
        .arg(workspace.paper())
        .args(["--page", "1", "--at", "10,10", "--text", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("note text is empty"));
}

#[test]
fn annotation_on_missing_page_is_refused() {
    let workspace = Workspace::new();

    workspace
        .cmd()
        .arg("note")
        .arg(workspace.paper())
        .args(["--page", "5", "--at", "10,10", "--text", "late"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}

#[test]
fn export_copy_writes_annotated_sibling() {
    let workspace = Workspace::new();
    let paper = workspace.paper();
    workspace.json(
        &["highlight", "--page", "1", "--text", "Hello", "--line", "93.6,110,100,16"],
        &paper,
    );

    let exported = workspace.json(&["export"], &paper);

    assert_eq!(exported["outcome"], "copied");
    assert_eq!(exported["annotations"], 1);
    let path = PathBuf::from(exported["path"].as_str().expect("export path"));
    assert_eq!(path.file_name().and_then(|name| name.to_str()), Some("paper-annotated.pdf"));

    let mut engine = LopdfEngine::new();
    let handle =
        engine.open(OpenSource::from(path.as_path())).expect("export should be a valid PDF");
    assert_eq!(engine.page_count(handle).expect("page count"), 2);
    assert!(paper.exists(), "copy policy keeps the original");
}

#[test]
fn export_replace_requires_confirmation() {
    let workspace = Workspace::new();
    let paper = workspace.paper();
    let before = std::fs::read(&paper).expect("read original");

    workspace
        .cmd()
        .arg("export")
        .arg(&paper)
        .args(["--policy", "replace"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("requires explicit confirmation"));

    assert_eq!(std::fs::read(&paper).expect("read original"), before);
}

#[test]
fn confirmed_replace_overwrites_original() {
    let workspace = Workspace::new();
    let paper = workspace.paper();
    let before = std::fs::read(&paper).expect("read original");
    workspace.json(&["note", "--page", "1", "--at", "26,13", "--text", "check"], &paper);

    let exported = workspace.json(&["export", "--policy", "replace", "--yes"], &paper);

    assert_eq!(exported["outcome"], "replaced");
    let after = std::fs::read(&paper).expect("read replaced original");
    assert_ne!(after, before);
    assert!(!workspace.dir.path().join("paper-annotated.pdf").exists());
}

#[test]
fn config_save_persists_overrides() {
    let workspace = Workspace::new();

    workspace.cmd().args(["config", "--save", "--highlight-color", "#00FF00"]).assert().success();

    workspace
        .cmd()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("#00FF00"));
}

#[test]
fn version_prints_package_version() {
    cargo_bin_cmd!("marginalia")
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn info_fails_for_missing_file() {
    let workspace = Workspace::new();

    workspace
        .cmd()
        .arg("info")
        .arg(workspace.dir.path().join("missing.pdf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn info_fails_for_invalid_pdf() {
    let workspace = Workspace::new();
    let invalid = workspace.write("invalid.pdf", b"this is not a pdf");

    workspace
        .cmd()
        .arg("info")
        .arg(invalid)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open PDF"));
}

#[test]
fn info_fails_for_encrypted_marker_pdf() {
    let workspace = Workspace::new();
    let encrypted = workspace
        .write("encrypted.pdf", b"%PDF-1.4\n1 0 obj << /Encrypt 2 0 R >> endobj\n%%EOF\n");

    workspace
        .cmd()
        .arg("info")
        .arg(encrypted)
        .assert()
        .failure()
        .stderr(predicate::str::contains("encrypted PDFs are not supported"));
}
