//! `clean` + `default`: output contents, reruns, and image concurrency.

use std::sync::Arc;
use std::time::Duration;

use conduit::core::TaskStatus;
use conduit::orchestration::Orchestrator;
use conduit::pipeline::ImagePipeline;

use crate::fixtures::{graph_for, FakeTools, RecordingRemote, TestProject};

fn default_run(project: &TestProject, tools: Arc<FakeTools>) -> Orchestrator {
    Orchestrator::new(graph_for(
        project.config(),
        tools,
        Arc::new(RecordingRemote::new()),
    ))
}

/// Test: default produces exactly copy + images output
/// Given a project with a stale file in the output root and a preserved .git
/// When `default` runs
/// Then the output root holds the copied and optimized files, nothing else
#[tokio::test]
async fn test_default_output_has_no_residue() {
    let project = TestProject::new();
    project.write("dist/stale.html", "old build");
    project.write("dist/.git/HEAD", "ref: refs/heads/main");
    let tools = Arc::new(FakeTools::new());

    default_run(&project, tools.clone()).run("default").await.unwrap();

    let mut files = project.files("dist");
    files.retain(|f| !f.starts_with(".git"));
    assert_eq!(
        files,
        vec![
            ".htaccess",
            "images/icons/arrow.svg",
            "images/logo.png",
            "images/photo.jpg",
            "images/spinner.gif",
            "index.html",
            "scripts/scripts.js",
            "scripts/view.jsx",
            "styles/main.scss",
        ]
    );
    assert!(project.exists("dist/.git/HEAD"));
    // pngquant and optipng each trimmed one byte
    assert_eq!(project.read("dist/images/logo.png"), "png-lo");
    assert_eq!(project.read("dist/index.html"), project.read("app/index.html"));

    // styles and bundle wrote their outputs beside the sources
    assert!(project.read("app/styles/main.css").ends_with("/* prefixed */"));
    assert!(project.read(".tmp/styles/main.css").ends_with("/* prefixed */"));
    assert!(project.read("app/scripts/bundle.js").starts_with("// bundle"));
    assert!(project.exists("app/scripts/bundle.js.map"));
}

/// Test: Reruns are byte-identical
/// Given a project whose generated sources have settled after one build
/// When `default` runs twice more
/// Then both output roots are identical
#[tokio::test]
async fn test_default_rerun_is_byte_identical() {
    let project = TestProject::new();
    let tools = Arc::new(FakeTools::new());

    // styles and bundle write into the source tree, so the first build
    // changes the source
    default_run(&project, tools.clone()).run("default").await.unwrap();

    default_run(&project, tools.clone()).run("default").await.unwrap();
    let first = project.snapshot("dist");
    default_run(&project, tools).run("default").await.unwrap();
    let second = project.snapshot("dist");

    assert!(!first.is_empty());
    assert_eq!(first, second);
}

/// Test: clean twice equals clean once
/// Given a built project
/// When `clean` runs twice
/// Then both runs succeed and only preserved entries remain
#[tokio::test]
async fn test_clean_is_idempotent() {
    let project = TestProject::new();
    project.write("dist/.git/HEAD", "ref");
    let tools = Arc::new(FakeTools::new());
    default_run(&project, tools.clone()).run("default").await.unwrap();

    default_run(&project, tools.clone()).run("clean").await.unwrap();
    let after_one = project.snapshot("dist");
    default_run(&project, tools).run("clean").await.unwrap();

    assert_eq!(after_one, project.snapshot("dist"));
    assert_eq!(project.files("dist"), vec![".git/HEAD"]);
    assert!(!project.exists(".tmp"));
}

/// Test: Image optimizer concurrency is bounded per stage
/// Given eight PNGs, a concurrency of 2 and slow optimizers
/// When `images` runs
/// Then no stage ever had more than two invocations in flight
#[tokio::test]
async fn test_image_concurrency_bound() {
    let project = TestProject::new();
    for i in 0..8 {
        project.write(&format!("app/images/batch/{}.png", i), "png-bytes");
    }
    let tools = Arc::new(FakeTools::with_delay(Duration::from_millis(25)));
    let config = project.config();

    let pipeline = ImagePipeline::new(&config, tools.clone());
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.files, 12);
    for program in ["pngquant", "optipng"] {
        assert!(tools.peak(program) <= 2, "{} peaked at {}", program, tools.peak(program));
        assert!(tools.peak(program) >= 1);
    }
    assert_eq!(tools.count("pngquant"), 9);
    for pool in pipeline.pools() {
        assert!(pool.peak() <= pool.max_concurrent());
        assert_eq!(pool.active_count(), 0);
    }
}

/// Test: A style compiler error is tolerated, an optimizer error is not
/// Given sass failing
/// When `default` runs
/// Then the build succeeds with styles tolerated; with pngquant failing it fails
#[tokio::test]
async fn test_failure_policies_in_default() {
    let project = TestProject::new();
    let tools = Arc::new(FakeTools::new());
    tools.fail("sass");

    let report = default_run(&project, tools.clone())
        .execute(&["default".to_string()])
        .await;
    assert!(report.success);
    assert!(matches!(
        report.status_of("styles"),
        Some(TaskStatus::Tolerated { .. })
    ));
    assert!(!project.exists("app/styles/main.css"));

    tools.recover("sass");
    tools.fail("pngquant");
    let report = default_run(&project, tools)
        .execute(&["default".to_string()])
        .await;
    assert!(!report.success);
    assert_eq!(report.failed_task.as_deref(), Some("images"));
    assert!(matches!(
        report.status_of("default"),
        Some(TaskStatus::Failed { .. })
    ));
}

/// Test: Run report is persisted
/// Given a finished run
/// When the report is saved into the log directory
/// Then it can be read back as JSON with every task recorded
#[tokio::test]
async fn test_run_report_saved() {
    let project = TestProject::new();
    let report = default_run(&project, Arc::new(FakeTools::new()))
        .execute(&["copy".to_string()])
        .await;
    let path = report.save(&project.root.join("logs")).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["targets"][0], "copy");
    assert_eq!(json["tasks"][0]["name"], "copy");
}
