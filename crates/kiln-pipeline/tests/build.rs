//! End-to-end builds of a small library + review site workspace.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_pipeline::config::{
    CopyConfig, ScriptConfig, SiteConfig, StyleConfig, TemplateConfig, UpstreamConfig,
};
use kiln_pipeline::{
    pipeline, BuildContext, BuildError, BuildResult, Orchestrator, PackageConfig, PackageKind,
    PathRef, RunState, StageState, WorkspaceConfig,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use walkdir::WalkDir;

fn write(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

fn library() -> PackageConfig {
    let mut lib = PackageConfig::new("lib", "packages/lib", PackageKind::Library);
    lib.styles.push(StyleConfig {
        entry: PathRef::local("styles.css"),
        output: PathBuf::from("lib.css"),
        search_paths: vec!["vendor:src".parse().unwrap()],
        minify: false,
    });
    lib.scripts.push(ScriptConfig {
        sources: "components/**/*.js".to_string(),
        bundle: PathBuf::from("lib.js"),
        minified: PathBuf::from("lib.min.js"),
    });
    lib
}

fn site(upstream_command: &str) -> PackageConfig {
    let mut site = PackageConfig::new("review", "packages/review", PackageKind::Site);
    site.upstream.push(UpstreamConfig {
        package: "lib".to_string(),
        command: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            upstream_command.to_string(),
        ]),
    });
    site.copy = vec![
        CopyConfig {
            from: "vendor:out/vendor.min.css".parse().unwrap(),
            to: PathRef::local("stylesheets/vendor.min.css"),
            required: true,
        },
        CopyConfig {
            from: "lib:out/lib.css".parse().unwrap(),
            to: PathRef::local("stylesheets/lib.css"),
            required: true,
        },
        CopyConfig {
            from: PathRef::local("assets"),
            to: PathRef::local("assets"),
            required: false,
        },
    ];

    let mut pages = BTreeMap::new();
    pages.insert(
        "about".to_string(),
        BTreeMap::from([("title".to_string(), serde_json::json!("About"))]),
    );
    site.templates = Some(TemplateConfig {
        exclude: vec!["layouts".to_string()],
        search_roots: vec!["vendor:src".parse().unwrap(), "lib:src".parse().unwrap()],
        pages,
        ..Default::default()
    });
    site
}

struct Fixture {
    temp: TempDir,
    config: WorkspaceConfig,
}

impl Fixture {
    fn new(upstream_command: &str) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();

        write(
            &root.join("packages/vendor"),
            &[
                ("src/core/_tokens.css", ".vendor-tokens { color: #005eb8; }"),
                ("src/macros/panel.njk", "{% macro panel(text) %}<div class=\"panel\">{{ text }}</div>{% endmacro %}"),
                ("dist/vendor.min.css", "body{margin:0}"),
            ],
        );
        write(
            &root.join("packages/lib"),
            &[
                ("src/styles.css", "@import \"core/tokens\";\n.hello-world { padding: 4px; }\n"),
                ("src/components/hello/hello.js", "// hello\nfunction hello() { return 1; }\n"),
                ("src/components/alpha/alpha.js", "function alpha() { return 2; }\n"),
                ("src/components/hello/macro.njk", "{% macro hello(name) %}<p>Hello {{ name }}</p>{% endmacro %}"),
            ],
        );
        write(
            &root.join("packages/review"),
            &[
                ("src/layouts/base.njk", "<title>{{ title }}</title>{% block content %}{% endblock %}"),
                (
                    "src/index.njk",
                    "{% extends \"layouts/base.njk\" %}{% block content %}{% from \"components/hello/macro.njk\" import hello %}{% from \"macros/panel.njk\" import panel %}{{ hello(\"world\") }}{{ panel(\"note\") }}{% endblock %}",
                ),
                ("src/about.njk", "{% extends \"layouts/base.njk\" %}"),
                ("src/examples/hello.njk", "{% from \"components/hello/macro.njk\" import hello %}{{ hello(\"example\") }}"),
                ("src/assets/logo.svg", "<svg/>"),
            ],
        );

        let config = WorkspaceConfig {
            site: SiteConfig {
                title: "Review".to_string(),
                context: BTreeMap::new(),
            },
            packages: vec![
                PackageConfig::new("vendor", "packages/vendor", PackageKind::Vendor),
                library(),
                site(upstream_command),
            ],
            ..Default::default()
        };

        Self { temp, config }
    }

    fn root(&self) -> &Path {
        self.temp.path()
    }

    fn dist(&self, package: &str) -> PathBuf {
        self.root().join("packages").join(package).join("dist")
    }

    async fn build(&self, target: &str, jobs: usize) -> BuildResult {
        let ctx = BuildContext::new(self.root(), &self.config, target).unwrap();
        let stages = pipeline::plan(&ctx, &self.config).unwrap();
        Orchestrator::new(Arc::new(ctx), stages)
            .with_jobs(jobs)
            .run()
            .await
    }
}

fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(dir)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(dir).unwrap().to_string_lossy().into_owned();
            (relative, fs::read(e.path()).unwrap())
        })
        .collect()
}

#[tokio::test]
async fn builds_library_then_site_reproducibly() {
    let fixture = Fixture::new("true");

    let lib = fixture.build("lib", 2).await;
    assert!(lib.is_success(), "{:?}", lib.cause);

    let css = fs::read_to_string(fixture.dist("lib").join("lib.css")).unwrap();
    assert!(css.contains(".vendor-tokens"));
    assert!(css.contains(".hello-world"));

    let bundle = fs::read_to_string(fixture.dist("lib").join("lib.js")).unwrap();
    assert!(bundle.find("alpha").unwrap() < bundle.find("hello").unwrap());
    let minified = fs::read_to_string(fixture.dist("lib").join("lib.min.js")).unwrap();
    assert!(!minified.contains("// hello"));

    let first = fixture.build("review", 4).await;
    assert!(first.is_success(), "{:?}", first.cause);
    let first_tree = snapshot(&fixture.dist("review"));

    let second = fixture.build("review", 1).await;
    assert!(second.is_success(), "{:?}", second.cause);
    let second_tree = snapshot(&fixture.dist("review"));

    assert_eq!(first_tree, second_tree);
    assert_eq!(
        first_tree.keys().map(String::as_str).collect::<Vec<_>>(),
        vec![
            "about/index.html",
            "assets/logo.svg",
            "examples/hello.html",
            "index.html",
            "stylesheets/lib.css",
            "stylesheets/vendor.min.css",
        ]
    );

    let index = String::from_utf8(first_tree["index.html"].clone()).unwrap();
    assert_eq!(
        index,
        "<title>Review</title><p>Hello world</p><div class=\"panel\">note</div>"
    );
    let about = String::from_utf8(first_tree["about/index.html"].clone()).unwrap();
    assert_eq!(about, "<title>About</title>");
}

#[tokio::test]
async fn rebuild_removes_stale_output() {
    let fixture = Fixture::new("true");
    assert!(fixture.build("lib", 1).await.is_success());

    write(&fixture.dist("review"), &[("old/index.html", "stale")]);

    let result = fixture.build("review", 2).await;

    assert!(result.is_success(), "{:?}", result.cause);
    assert!(!fixture.dist("review").join("old").exists());
}

#[tokio::test]
async fn upstream_failure_stops_the_build() {
    let fixture = Fixture::new("echo 'lib: syntax error' >&2; exit 2");
    write(&fixture.dist("review"), &[("stale.html", "stale")]);

    let result = fixture.build("review", 4).await;

    assert_eq!(result.exit_code(), 1);
    assert_eq!(result.run_state, RunState::Aborted);
    assert_eq!(result.failed_stage.as_deref(), Some("upstream:lib"));
    match &result.cause {
        Some(BuildError::UpstreamBuild { output, .. }) => {
            assert!(output.contains("syntax error"))
        }
        other => panic!("unexpected cause: {other:?}"),
    }
    assert_eq!(result.state_of("assets"), Some(StageState::Pending));
    assert_eq!(result.state_of("templates"), Some(StageState::Pending));
    assert!(snapshot(&fixture.dist("review")).is_empty());
}

#[tokio::test]
async fn missing_required_asset_skips_templates() {
    let fixture = Fixture::new("true");
    // lib was never built, so lib.css does not exist

    let result = fixture.build("review", 2).await;

    assert_eq!(result.failed_stage.as_deref(), Some("assets"));
    assert!(matches!(
        &result.cause,
        Some(BuildError::MissingAsset(path)) if path.ends_with("lib.css")
    ));
    assert_eq!(result.state_of("templates"), Some(StageState::Pending));
    assert!(!fixture.dist("review").join("index.html").exists());
}

#[tokio::test]
async fn sources_and_vendor_output_are_untouched() {
    let fixture = Fixture::new("true");
    let vendor_before = snapshot(&fixture.root().join("packages/vendor"));
    let sources_before = snapshot(&fixture.root().join("packages/review/src"));

    assert!(fixture.build("lib", 1).await.is_success());
    assert!(fixture.build("review", 1).await.is_success());

    assert_eq!(snapshot(&fixture.root().join("packages/vendor")), vendor_before);
    assert_eq!(
        snapshot(&fixture.root().join("packages/review/src")),
        sources_before
    );
}
