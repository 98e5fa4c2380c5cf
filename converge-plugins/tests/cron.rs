//! `cron` plugin against cron.d-style files.

use std::fs;
use std::path::PathBuf;

use converge_plugins::Outcome;
use converge_plugins::clients::CronFile;
use converge_plugins::plugins::cron::{self, CronOutput};
use serde_json::{Value, json};
use tempfile::TempDir;

const HAND_WRITTEN: &str = "SHELL=/bin/sh\n\
                            # keep this comment\n\
                            15 1 * * * root  /usr/bin/rotate\n";

fn setup(initial: Option<&str>) -> (PathBuf, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app");
    if let Some(content) = initial {
        fs::write(&path, content).unwrap();
    }
    (path, dir)
}

fn run(path: &PathBuf, params: Value) -> Outcome<CronOutput> {
    cron::run(
        &mut CronFile::new(path),
        serde_json::from_value(params).unwrap(),
        false,
    )
}

fn jobs() -> Value {
    json!({
        "jobs": [
            {"name": "backup", "job": "/usr/local/bin/backup", "minute": "0", "hour": "3"},
            {"name": "warm", "job": "/usr/local/bin/warm", "special_time": "reboot", "disabled": true}
        ]
    })
}

#[test]
fn adds_jobs_and_preserves_foreign_lines() {
    let (path, _dir) = setup(Some(HAND_WRITTEN));

    let first = run(&path, jobs());
    assert!(first.error.is_none(), "{:?}", first.error);
    assert!(first.changed);
    assert_eq!(first.data.jobs.len(), 2);
    assert_eq!(first.data.jobs[0].schedule, "0 3 * * *");
    assert!(first.data.jobs[1].disabled);

    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(
        content,
        format!(
            "{}#converge: backup\n0 3 * * * root /usr/local/bin/backup\n\
             #converge: warm\n#@reboot root /usr/local/bin/warm\n",
            HAND_WRITTEN
        )
    );

    let second = run(&path, jobs());
    assert!(second.error.is_none());
    assert!(!second.changed);
    assert_eq!(fs::read_to_string(&path).unwrap(), content);
}

#[test]
fn rewrites_changed_job_in_place() {
    let (path, _dir) = setup(Some(HAND_WRITTEN));
    run(&path, jobs());

    let mut params = jobs();
    params["jobs"][0]["hour"] = json!("4");
    params["jobs"][1]["disabled"] = json!(false);
    let outcome = run(&path, params);
    assert!(outcome.changed);

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.starts_with(HAND_WRITTEN));
    assert!(content.contains("#converge: backup\n0 4 * * * root /usr/local/bin/backup\n"));
    assert!(content.contains("#converge: warm\n@reboot root /usr/local/bin/warm\n"));
}

#[test]
fn exclusive_prunes_unlisted_jobs_only() {
    let (path, _dir) = setup(Some(HAND_WRITTEN));
    run(&path, jobs());

    let only_backup = json!({
        "jobs": [{"name": "backup", "job": "/usr/local/bin/backup", "minute": "0", "hour": "3"}]
    });
    let outcome = run(&path, only_backup.clone());
    assert!(!outcome.changed);
    assert!(fs::read_to_string(&path).unwrap().contains("warm"));

    let mut exclusive = only_backup;
    exclusive["exclusive"] = json!(true);
    let outcome = run(&path, exclusive);
    assert!(outcome.changed);
    let content = fs::read_to_string(&path).unwrap();
    assert!(!content.contains("warm"));
    assert!(content.starts_with(HAND_WRITTEN));
}

#[test]
fn absent_job_is_removed() {
    let (path, _dir) = setup(None);
    run(&path, jobs());

    let outcome = run(
        &path,
        json!({"jobs": [
            {"name": "backup", "state": "absent"},
            {"name": "warm", "state": "absent"}
        ]}),
    );
    assert!(outcome.error.is_none());
    assert!(outcome.changed);
    // Nothing left, so the file goes away.
    assert!(!path.exists());
}

const NOTE_AFTER_MARKER: &str = "#converge: backup\n\
                                 # ops: keep this note\n\
                                 30 2 * * * root /usr/bin/cleanup\n";

#[test]
fn foreign_line_below_marker_is_not_adopted() {
    let (path, _dir) = setup(Some(NOTE_AFTER_MARKER));
    let backup = json!({
        "jobs": [{"name": "backup", "job": "/bin/backup", "minute": "0", "hour": "3"}]
    });

    let outcome = run(&path, backup.clone());
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert!(outcome.changed);
    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(
        content,
        "#converge: backup\n\
         0 3 * * * root /bin/backup\n\
         # ops: keep this note\n\
         30 2 * * * root /usr/bin/cleanup\n"
    );

    let again = run(&path, backup);
    assert!(!again.changed);
    assert_eq!(fs::read_to_string(&path).unwrap(), content);
}

#[test]
fn absent_job_without_line_drops_only_the_marker() {
    let (path, _dir) = setup(Some(NOTE_AFTER_MARKER));

    let outcome = run(&path, json!({"jobs": [{"name": "backup", "state": "absent"}]}));
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert!(outcome.changed);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "# ops: keep this note\n30 2 * * * root /usr/bin/cleanup\n"
    );
}

#[test]
fn duplicate_markers_are_a_precondition() {
    let (path, _dir) = setup(Some(
        "#converge: backup\n0 3 * * * root a\n#converge: backup\n0 4 * * * root b\n",
    ));

    let outcome = run(&path, jobs());
    assert!(!outcome.changed);
    let info = outcome.error.unwrap().info();
    assert_eq!(info.kind, "precondition");
    assert_eq!(info.key.as_deref(), Some("backup"));
}

#[test]
fn check_mode_leaves_file_alone() {
    let (path, _dir) = setup(Some(HAND_WRITTEN));
    let outcome = cron::run(
        &mut CronFile::new(&path),
        serde_json::from_value(jobs()).unwrap(),
        true,
    );
    assert!(outcome.changed);
    assert_eq!(fs::read_to_string(&path).unwrap(), HAND_WRITTEN);
}

#[test]
fn custom_user_column() {
    let (path, _dir) = setup(None);
    let outcome = run(
        &path,
        json!({"user": "www", "jobs": [{"name": "a", "job": "/bin/a"}]}),
    );
    assert!(outcome.error.is_none());
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "#converge: a\n* * * * * www /bin/a\n"
    );
}
