use std::path::Path;

use crate::config::{HISTORY_PAGE_LIMIT, Settings, resolve_path};
use crate::config_store::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CheckResult {
    pub name: &'static str,
    pub severity: Severity,
    pub passed: bool,
    pub message: String,
}

impl CheckResult {
    fn pass(name: &'static str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            name,
            severity,
            passed: true,
            message: message.into(),
        }
    }

    fn fail(name: &'static str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            name,
            severity,
            passed: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CheckReport {
    pub results: Vec<CheckResult>,
}

impl CheckReport {
    fn push(&mut self, result: CheckResult) {
        self.results.push(result);
    }

    pub(crate) fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    fn count(&self, severity: Severity) -> usize {
        self.results
            .iter()
            .filter(|r| r.severity == severity && !r.passed)
            .count()
    }

    fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn format_result(r: &CheckResult) -> String {
        let icon = match (r.severity, r.passed) {
            (Severity::Info, _) => "·",
            (_, true) => "✓",
            (Severity::Warning, false) => "⚠",
            (Severity::Error, false) => "✗",
        };
        format!("{icon} {}", r.message)
    }

    pub(crate) fn to_summary_string(&self) -> String {
        let mut lines: Vec<String> = self.results.iter().map(Self::format_result).collect();
        let errors = self.error_count();
        let warnings = self.warning_count();
        if errors == 0 && warnings == 0 {
            lines.push("\nall checks passed".to_owned());
        } else {
            lines.push(format!("\n{errors} error(s), {warnings} warning(s)"));
        }
        lines.join("\n")
    }

    pub(crate) fn print_human(&self) {
        println!("{}", self.to_summary_string());
    }

    pub(crate) fn print_json(&self) {
        println!(
            "{}",
            serde_json::to_string_pretty(&self.to_json_value()).unwrap_or_default()
        );
    }

    pub(crate) fn to_json_value(&self) -> serde_json::Value {
        let checks: Vec<serde_json::Value> = self
            .results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "name": r.name,
                    "severity": r.severity.as_str(),
                    "passed": r.passed,
                    "message": r.message,
                })
            })
            .collect();

        serde_json::json!({
            "passed": !self.has_errors(),
            "errors": self.error_count(),
            "warnings": self.warning_count(),
            "checks": checks,
        })
    }
}

/// Validate operator settings, the stored ticket config, and the bot token
/// without connecting to anything.
pub(crate) fn validate(config_path: &Path, config_dir: &Path, token: Option<&str>) -> CheckReport {
    let mut report = CheckReport::default();

    let settings = match Settings::load(config_path) {
        Ok(settings) => {
            let message = if config_path.exists() {
                format!("{} parsed", config_path.display())
            } else {
                format!("{} not found, using defaults", config_path.display())
            };
            report.push(CheckResult::pass("settings_parse", Severity::Error, message));
            settings
        }
        Err(error) => {
            report.push(CheckResult::fail(
                "settings_parse",
                Severity::Error,
                format!("{error:#}"),
            ));
            return report;
        }
    };

    report.push(match settings.health.bind_addr() {
        Ok(addr) => CheckResult::pass("health_bind", Severity::Error, format!("health server on {addr}")),
        Err(error) => CheckResult::fail("health_bind", Severity::Error, format!("{error:#}")),
    });

    report.push(match token.map(str::trim) {
        Some(token) if !token.is_empty() => {
            CheckResult::pass("token", Severity::Error, "DISCORD_TOKEN is set")
        }
        _ => CheckResult::fail("token", Severity::Error, "DISCORD_TOKEN is not set"),
    });

    let state_path = resolve_path(config_dir, &settings.state.path);
    let config = check_state(&mut report, &state_path);
    if let Some(config) = config {
        let missing: Vec<&str> = [
            ("products category", config.products_category_id.is_none()),
            ("partnerships category", config.partnerships_category_id.is_none()),
        ]
        .into_iter()
        .filter_map(|(label, unset)| unset.then_some(label))
        .collect();
        report.push(if missing.is_empty() {
            CheckResult::pass("categories", Severity::Warning, "ticket categories configured")
        } else {
            CheckResult::fail(
                "categories",
                Severity::Warning,
                format!("{} not set; run the set commands in the server", missing.join(" and ")),
            )
        });
    }

    let history_limit = settings.transcripts.history_limit;
    if history_limit > HISTORY_PAGE_LIMIT {
        report.push(CheckResult::fail(
            "history_limit",
            Severity::Warning,
            format!(
                "transcripts.history_limit = {history_limit} exceeds what Discord returns; \
                 only the last {HISTORY_PAGE_LIMIT} messages are archived"
            ),
        ));
    }

    let transcripts = resolve_path(config_dir, &settings.transcripts.dir);
    report.push(CheckResult::pass(
        "transcripts_dir",
        Severity::Info,
        format!(
            "transcripts in {} (last {} messages)",
            transcripts.display(),
            history_limit.min(HISTORY_PAGE_LIMIT)
        ),
    ));

    report
}

fn check_state(report: &mut CheckReport, path: &Path) -> Option<Config> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            report.push(CheckResult::pass(
                "state_document",
                Severity::Warning,
                format!("{} not found, starting fresh", path.display()),
            ));
            return Some(Config::default());
        }
        Err(error) => {
            report.push(CheckResult::fail(
                "state_document",
                Severity::Warning,
                format!("cannot read {}: {error}", path.display()),
            ));
            return None;
        }
    };

    match serde_json::from_str::<Config>(&content) {
        Ok(config) => {
            report.push(CheckResult::pass(
                "state_document",
                Severity::Warning,
                format!(
                    "{} loaded, next ticket #{}",
                    path.display(),
                    config.ticket_counter.max(1)
                ),
            ));
            Some(config)
        }
        Err(error) => {
            report.push(CheckResult::fail(
                "state_document",
                Severity::Warning,
                format!("{} is malformed and will be reset: {error}", path.display()),
            ));
            None
        }
    }
}
