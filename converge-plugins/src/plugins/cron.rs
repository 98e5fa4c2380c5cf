//! `cron` plugin: named jobs in a crontab.
//!
//! Each managed job is a marker comment followed by the job line:
//!
//! ```text
//! #converge: backup
//! 0 3 * * * /usr/local/bin/backup
//! ```
//!
//! Every other line belongs to someone else and is written back untouched.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, anyhow};
use converge_core::{Accessor, DesiredState, ReconcileError, ResourceKind};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clients::crontab::CrontabStore;
use crate::error::Result;
use crate::output::Outcome;
use crate::params::State;
use crate::plugins::Run;
use crate::validation::{self, ValidationError};

/// Prefix of the marker comment that names a managed job.
pub const MARKER: &str = "#converge: ";

/// User column value in cron.d files when none is given.
pub const DEFAULT_FILE_USER: &str = "root";

// =============================================================================
// Parameters
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CronParams {
    /// Whose crontab to manage; in `cron_file` mode, the user column.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub cron_file: Option<PathBuf>,
    /// Remove every managed job that is not listed.
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub jobs: Vec<JobParams>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobParams {
    pub name: String,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default = "any")]
    pub minute: String,
    #[serde(default = "any")]
    pub hour: String,
    #[serde(default = "any")]
    pub day: String,
    #[serde(default = "any")]
    pub month: String,
    #[serde(default = "any")]
    pub weekday: String,
    #[serde(default)]
    pub special_time: Option<SpecialTime>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub state: State,
}

fn any() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialTime {
    Reboot,
    Yearly,
    Annually,
    Monthly,
    Weekly,
    Daily,
    Hourly,
}

impl SpecialTime {
    const ALL: [SpecialTime; 7] = [
        Self::Reboot,
        Self::Yearly,
        Self::Annually,
        Self::Monthly,
        Self::Weekly,
        Self::Daily,
        Self::Hourly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reboot => "@reboot",
            Self::Yearly => "@yearly",
            Self::Annually => "@annually",
            Self::Monthly => "@monthly",
            Self::Weekly => "@weekly",
            Self::Daily => "@daily",
            Self::Hourly => "@hourly",
        }
    }
}

// =============================================================================
// Result
// =============================================================================

#[derive(Debug, Default, Serialize)]
pub struct CronOutput {
    pub jobs: Vec<JobInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    pub name: String,
    pub schedule: String,
    pub job: String,
    pub disabled: bool,
}

impl From<&CronJob> for JobInfo {
    fn from(job: &CronJob) -> Self {
        Self {
            name: job.name.clone(),
            schedule: job.schedule.clone(),
            job: job.job.clone(),
            disabled: job.disabled,
        }
    }
}

// =============================================================================
// Crontab document
// =============================================================================

/// A crontab split into lines, written back exactly as read apart from the
/// managed entries.
#[derive(Debug, Clone, PartialEq)]
struct Crontab {
    lines: Vec<String>,
    trailing_newline: bool,
    /// cron.d layout: a user column between schedule and command.
    user_column: bool,
}

fn marker_name(line: &str) -> Option<&str> {
    line.strip_prefix(MARKER).map(str::trim_end)
}

/// Whether `line` is shaped like a job: five schedule fields or an `@`
/// keyword, the user column when the file has one, then a command. A single
/// leading `#` marks the job disabled.
fn is_job_line(line: &str, user_column: bool) -> bool {
    let body = line.strip_prefix('#').map_or(line, str::trim_start);
    let mut rest = body;

    if body.starts_with('@') {
        let (keyword, tail) = split_token(rest);
        if !SpecialTime::ALL.iter().any(|t| t.as_str() == keyword) {
            return false;
        }
        rest = tail;
    } else {
        for _ in 0..5 {
            let (field, tail) = split_token(rest);
            if !validation::is_schedule_field(field) {
                return false;
            }
            rest = tail;
        }
    }

    if user_column {
        let (user, tail) = split_token(rest);
        if user.is_empty() {
            return false;
        }
        rest = tail;
    }
    !rest.trim().is_empty()
}

impl Crontab {
    fn parse(content: &str, user_column: bool) -> Self {
        if content.is_empty() {
            return Self {
                lines: Vec::new(),
                trailing_newline: true,
                user_column,
            };
        }
        let body = content.strip_suffix('\n').unwrap_or(content);
        Self {
            lines: body.split('\n').map(str::to_string).collect(),
            trailing_newline: content.ends_with('\n'),
            user_column,
        }
    }

    fn render(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut out = self.lines.join("\n");
        if self.trailing_newline {
            out.push('\n');
        }
        out
    }

    /// The line below the marker at `marker`, if it is a job line. Anything
    /// else there is a foreign line and stays untouched.
    fn job_line(&self, marker: usize) -> Option<&str> {
        self.lines
            .get(marker + 1)
            .map(String::as_str)
            .filter(|line| marker_name(line).is_none() && is_job_line(line, self.user_column))
    }

    /// Every managed entry as (name, job line).
    fn entries(&self) -> Vec<(&str, Option<&str>)> {
        let mut entries = Vec::new();
        let mut i = 0;
        while i < self.lines.len() {
            match marker_name(&self.lines[i]) {
                Some(name) => {
                    let line = self.job_line(i);
                    entries.push((name, line));
                    i += if line.is_some() { 2 } else { 1 };
                }
                None => i += 1,
            }
        }
        entries
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.lines.iter().position(|l| marker_name(l) == Some(name))
    }

    fn insert(&mut self, name: &str, line: String) {
        self.lines.push(format!("{}{}", MARKER, name));
        self.lines.push(line);
        self.trailing_newline = true;
    }

    fn replace(&mut self, name: &str, line: String) -> anyhow::Result<()> {
        let marker = self
            .position(name)
            .ok_or_else(|| anyhow!("job {} not found in crontab", name))?;
        if self.job_line(marker).is_some() {
            self.lines[marker + 1] = line;
        } else {
            self.lines.insert(marker + 1, line);
        }
        Ok(())
    }

    fn remove(&mut self, name: &str) -> anyhow::Result<()> {
        let marker = self
            .position(name)
            .ok_or_else(|| anyhow!("job {} not found in crontab", name))?;
        if self.job_line(marker).is_some() {
            self.lines.remove(marker + 1);
        }
        self.lines.remove(marker);
        Ok(())
    }
}

/// Split off the first whitespace-delimited token.
fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

// =============================================================================
// Resource kinds
// =============================================================================

/// A managed job as found in the crontab.
#[derive(Debug, Clone, PartialEq)]
pub struct CronJob {
    pub name: String,
    pub schedule: String,
    pub user: Option<String>,
    pub job: String,
    pub disabled: bool,
    /// The raw job line; `None` when the marker has no line below it.
    pub line: Option<String>,
}

impl CronJob {
    fn parse(name: &str, line: Option<&str>, user_column: bool) -> Self {
        let mut job = Self {
            name: name.to_string(),
            schedule: String::new(),
            user: None,
            job: String::new(),
            disabled: false,
            line: line.map(str::to_string),
        };
        let Some(line) = line else {
            return job;
        };

        let body = match line.strip_prefix('#') {
            Some(rest) => {
                job.disabled = true;
                rest.trim_start()
            }
            None => line,
        };

        let field_count = if body.starts_with('@') { 1 } else { 5 };
        let mut fields = Vec::with_capacity(field_count);
        let mut rest = body;
        for _ in 0..field_count {
            let (field, tail) = split_token(rest);
            fields.push(field);
            rest = tail;
        }
        job.schedule = fields.join(" ");

        if user_column {
            let (user, tail) = split_token(rest);
            job.user = Some(user.to_string());
            rest = tail;
        }
        job.job = rest.to_string();
        job
    }
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub schedule: String,
    pub user: Option<String>,
    pub job: String,
    pub disabled: bool,
}

impl JobSpec {
    fn render(&self) -> String {
        let mut line = String::new();
        if self.disabled {
            line.push('#');
        }
        line.push_str(&self.schedule);
        line.push(' ');
        if let Some(user) = &self.user {
            line.push_str(user);
            line.push(' ');
        }
        line.push_str(&self.job);
        line
    }
}

pub struct JobKind;

impl ResourceKind for JobKind {
    type Key = String;
    type Spec = JobSpec;
    type Observed = CronJob;

    const NAME: &'static str = "cron job";

    fn spec_key(spec: &JobSpec) -> String {
        spec.name.clone()
    }

    fn observed_key(observed: &CronJob) -> String {
        observed.name.clone()
    }

    fn needs_update(spec: &JobSpec, observed: &CronJob) -> bool {
        observed.line.as_deref() != Some(spec.render().as_str())
    }
}

/// Which managed jobs a pass may see, and therefore remove.
#[derive(Debug, Clone)]
pub enum JobScope {
    All,
    Names(BTreeSet<String>),
}

struct CrontabAccessor<'a, S> {
    store: &'a mut S,
}

impl<S: CrontabStore> CrontabAccessor<'_, S> {
    fn load(&mut self) -> anyhow::Result<Crontab> {
        Ok(Crontab::parse(
            &self.store.read()?,
            self.store.has_user_column(),
        ))
    }

    fn save(&mut self, crontab: &Crontab) -> anyhow::Result<()> {
        self.store.write(&crontab.render())
    }
}

impl<S: CrontabStore> Accessor<JobKind> for CrontabAccessor<'_, S> {
    type Filter = JobScope;

    fn list(&mut self, scope: &JobScope) -> anyhow::Result<Vec<CronJob>> {
        let user_column = self.store.has_user_column();
        let crontab = self.load()?;
        Ok(crontab
            .entries()
            .into_iter()
            .filter(|(name, _)| match scope {
                JobScope::All => true,
                JobScope::Names(names) => names.contains(*name),
            })
            .map(|(name, line)| CronJob::parse(name, line, user_column))
            .collect())
    }

    fn create(&mut self, spec: &JobSpec) -> anyhow::Result<CronJob> {
        let mut crontab = self.load()?;
        let line = spec.render();
        info!(job = %spec.name, "Adding cron job");
        crontab.insert(&spec.name, line.clone());
        self.save(&crontab)
            .with_context(|| format!("Failed to add job {}", spec.name))?;
        Ok(CronJob {
            name: spec.name.clone(),
            schedule: spec.schedule.clone(),
            user: spec.user.clone(),
            job: spec.job.clone(),
            disabled: spec.disabled,
            line: Some(line),
        })
    }

    fn update(&mut self, existing: &CronJob, desired: &JobSpec) -> anyhow::Result<()> {
        let mut crontab = self.load()?;
        info!(job = %existing.name, "Rewriting cron job");
        crontab.replace(&existing.name, desired.render())?;
        self.save(&crontab)
            .with_context(|| format!("Failed to update job {}", existing.name))
    }

    fn delete(&mut self, existing: &CronJob) -> anyhow::Result<()> {
        let mut crontab = self.load()?;
        info!(job = %existing.name, "Removing cron job");
        crontab.remove(&existing.name)?;
        self.save(&crontab)
            .with_context(|| format!("Failed to remove job {}", existing.name))
    }
}

// =============================================================================
// Plugin
// =============================================================================

fn declare(params: &CronParams, user_column: bool) -> Result<(Vec<JobSpec>, JobScope)> {
    let user = user_column.then(|| {
        params
            .user
            .clone()
            .unwrap_or_else(|| DEFAULT_FILE_USER.to_string())
    });

    let mut present = Vec::new();
    let mut absent = BTreeSet::new();
    for job in &params.jobs {
        let name = job.name.trim();
        if name.is_empty() || name.contains(['\n', '\r']) {
            return Err(ValidationError::InvalidJobName(job.name.clone()).into());
        }

        if job.state == State::Absent {
            absent.insert(name.to_string());
            continue;
        }

        let command = job.job.as_deref().map(str::trim).unwrap_or_default();
        if command.is_empty() || command.contains(['\n', '\r']) {
            return Err(ValidationError::JobCommandRequired(name.to_string()).into());
        }

        let schedule = match job.special_time {
            Some(special) => special.as_str().to_string(),
            None => {
                let fields = [
                    ("minute", &job.minute),
                    ("hour", &job.hour),
                    ("day", &job.day),
                    ("month", &job.month),
                    ("weekday", &job.weekday),
                ];
                for (field, value) in fields {
                    validation::validate_schedule_field(name, field, value)?;
                }
                fields.map(|(_, value)| value.as_str()).join(" ")
            }
        };

        present.push(JobSpec {
            name: name.to_string(),
            schedule,
            user: user.clone(),
            job: command.to_string(),
            disabled: job.disabled,
        });
    }

    if let Some(spec) = present.iter().find(|s| absent.contains(&s.name)) {
        return Err(ReconcileError::precondition_for(
            &spec.name,
            "job is declared both present and absent",
        )
        .into());
    }

    let scope = if params.exclusive {
        JobScope::All
    } else {
        let mut names = absent;
        names.extend(present.iter().map(|s| s.name.clone()));
        JobScope::Names(names)
    };
    Ok((present, scope))
}

/// Ensure the jobs described by `params` in `store`.
pub fn run<S: CrontabStore>(
    store: &mut S,
    params: CronParams,
    check_mode: bool,
) -> Outcome<CronOutput> {
    let mut run = Run::new(check_mode);
    let mut out = CronOutput::default();
    let status = ensure(store, &params, &mut run, &mut out);
    run.finish(out, status)
}

fn ensure<S: CrontabStore>(
    store: &mut S,
    params: &CronParams,
    run: &mut Run,
    out: &mut CronOutput,
) -> Result<()> {
    let (jobs, scope) = declare(params, store.has_user_column())?;

    let result = run.reconciler(true, None).converge(
        &DesiredState::<JobKind>::new(jobs)?,
        &mut CrontabAccessor { store },
        &scope,
    );
    out.jobs = result.final_state().iter().map(JobInfo::from).collect();
    run.absorb(result)?;

    Ok(())
}
