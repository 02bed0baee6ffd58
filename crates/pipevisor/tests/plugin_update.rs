#![cfg(unix)]

use pipevisor::plugin::{
    CommandResolver, PluginManifest, PluginUpdateCoordinator, SkipReason, UpdateError,
    UpdateOptions, UpdateOutcome,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const MANIFEST: &str = "\
sources:
  - https://plugins.example.org
plugins:
  - name: input-beats
    version: 6.1.0
    constraint: \"~> 6.0\"
  - name: output-s3
    version: 4.0.0
  - name: filter-custom
    version: 0.1.0
    local: true
";

/// Resolver that records its arguments and answers with canned JSON.
fn write_resolver(dir: &Path) -> PathBuf {
    let log = dir.join("calls.txt");
    let script = format!(
        r#"#!/bin/sh
echo "$*" >> '{log}'
case "$1" in
  outdated)
    echo '{{"input-beats": {{"version": "6.2.0", "service_plugin": true}}, "output-s3": {{"version": "4.0.0", "service_plugin": true}}}}'
    ;;
  update)
    echo '{{"input-beats": "6.2.0", "output-s3": "4.0.0"}}'
    ;;
  *)
    exit 64
    ;;
esac
"#,
        log = log.display()
    );
    let path = dir.join("resolver.sh");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls.txt"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn minor_conservative_update_through_external_resolver() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("plugins.yml");
    std::fs::write(&manifest, MANIFEST).unwrap();
    let coordinator = PluginUpdateCoordinator::new(CommandResolver::new(write_resolver(dir.path())));

    let report = coordinator
        .update_file(&manifest, &[], &UpdateOptions::default())
        .await
        .unwrap();

    assert_eq!(
        report.get("input-beats"),
        Some(&UpdateOutcome::Updated {
            from: "6.1.0".into(),
            to: "6.2.0".into()
        })
    );
    assert_eq!(
        report.get("output-s3"),
        Some(&UpdateOutcome::Skipped(SkipReason::AlreadyCurrent))
    );
    assert_eq!(
        report.get("filter-custom"),
        Some(&UpdateOutcome::Skipped(SkipReason::LocallyModified))
    );

    let saved = PluginManifest::load(&manifest).unwrap();
    assert_eq!(saved.find("input-beats").unwrap().version, "6.2.0");
    assert_eq!(saved.find("input-beats").unwrap().constraint.as_deref(), Some("~> 6.0"));

    let calls = calls(dir.path());
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0],
        "outdated --json --source https://plugins.example.org input-beats output-s3"
    );
    assert_eq!(
        calls[1],
        "update --minor --conservative --source https://plugins.example.org input-beats:~> 6.0 output-s3"
    );
}

#[tokio::test]
async fn unsupported_level_is_rejected_before_the_resolver_runs() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("plugins.yml");
    std::fs::write(&manifest, MANIFEST).unwrap();
    let coordinator = PluginUpdateCoordinator::new(CommandResolver::new(write_resolver(dir.path())));

    let options = UpdateOptions {
        level: "eVeRyThInG".into(),
        ..Default::default()
    };
    let err = coordinator
        .update_file(&manifest, &[], &options)
        .await
        .unwrap_err();

    assert!(matches!(err, UpdateError::UnsupportedLevel(_)));
    assert!(calls(dir.path()).is_empty());
    assert_eq!(std::fs::read_to_string(&manifest).unwrap(), MANIFEST);
}

#[tokio::test]
async fn missing_resolver_fails_every_target() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("plugins.yml");
    std::fs::write(&manifest, MANIFEST).unwrap();
    let coordinator =
        PluginUpdateCoordinator::new(CommandResolver::new(dir.path().join("no-such-resolver")));

    let report = coordinator
        .update_file(&manifest, &["input-beats".to_string()], &UpdateOptions::default())
        .await
        .unwrap();

    assert!(matches!(report.get("input-beats"), Some(UpdateOutcome::Failed(_))));
    assert_eq!(std::fs::read_to_string(&manifest).unwrap(), MANIFEST);
}
