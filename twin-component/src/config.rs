use chrono::Duration;
use serde::{Deserialize, Serialize};

use twin_core::{TwinError, TwinResult};

/// Configuration shared by every component variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Unique per variant; doubles as the table name for record-bearing
    /// components.
    pub name: String,
    pub content_type: String,
    /// Path segment the component's endpoints mount under.
    pub endpoint: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

impl ComponentConfig {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            endpoint: name.clone(),
            name,
            content_type: content_type.into(),
            description: None,
            tags: Vec::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// How a harvester gets triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerMode {
    /// Run when the source collector completes (debounced).
    OnSource,
    /// Run on the configured cron schedule.
    Scheduled,
    /// Both: registered like `Scheduled`, wired to source events like
    /// `OnSource`.
    Both,
}

impl TriggerMode {
    pub fn listens_to_source(&self) -> bool {
        matches!(self, TriggerMode::OnSource | TriggerMode::Both)
    }

    pub fn uses_schedule(&self) -> bool {
        matches!(self, TriggerMode::Scheduled | TriggerMode::Both)
    }
}

/// Units accepted by the time-window form of a source range. `m` is
/// minutes; the parser dispatches on the suffix so there is no
/// ambiguity with cron minute fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl RangeUnit {
    fn from_suffix(c: char) -> Option<Self> {
        match c {
            'd' => Some(RangeUnit::Days),
            'h' => Some(RangeUnit::Hours),
            'm' => Some(RangeUnit::Minutes),
            's' => Some(RangeUnit::Seconds),
            _ => None,
        }
    }
}

/// The time-window-or-count specifier a harvester uses to select
/// source records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceRange {
    /// Count mode: up to N records after the cursor.
    Count(usize),
    /// Time mode: records inside `(cursor, cursor + window]`.
    Window { amount: i64, unit: RangeUnit },
}

impl SourceRange {
    /// Parse the merged-config value: a number, a numeric string, or a
    /// `N{d|h|m|s}` window. Absent means "the single latest".
    pub fn parse(value: Option<&serde_json::Value>) -> TwinResult<SourceRange> {
        let Some(value) = value else {
            return Ok(SourceRange::Count(1));
        };

        match value {
            serde_json::Value::Number(n) => {
                let n = n
                    .as_u64()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| invalid(value))?;
                Ok(SourceRange::Count(n as usize))
            }
            serde_json::Value::String(s) => {
                let s = s.trim();
                if let Ok(n) = s.parse::<u64>() {
                    if n == 0 {
                        return Err(invalid(value));
                    }
                    return Ok(SourceRange::Count(n as usize));
                }
                let mut chars = s.chars();
                let suffix = chars.next_back().ok_or_else(|| invalid(value))?;
                let unit = RangeUnit::from_suffix(suffix).ok_or_else(|| invalid(value))?;
                let amount = chars
                    .as_str()
                    .parse::<i64>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| invalid(value))?;
                Ok(SourceRange::Window { amount, unit })
            }
            _ => Err(invalid(value)),
        }
    }

    /// The window length in time mode, None in count mode.
    pub fn window(&self) -> Option<Duration> {
        match self {
            SourceRange::Count(_) => None,
            SourceRange::Window { amount, unit } => Some(match unit {
                RangeUnit::Days => Duration::days(*amount),
                RangeUnit::Hours => Duration::hours(*amount),
                RangeUnit::Minutes => Duration::minutes(*amount),
                RangeUnit::Seconds => Duration::seconds(*amount),
            }),
        }
    }

    pub fn count_limit(&self) -> Option<usize> {
        match self {
            SourceRange::Count(n) => Some(*n),
            SourceRange::Window { .. } => None,
        }
    }
}

fn invalid(value: &serde_json::Value) -> anyhow::Error {
    TwinError::configuration(format!(
        "invalid source range {value} (expected a positive count or N[d|h|m|s])"
    ))
    .into_anyhow()
}

/// Harvester-specific configuration. Defaults follow the framework's
/// merged-config rules: trigger on source, single latest record, one
/// result, 1000 ms debounce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvesterConfig {
    /// Name of the collector this harvester derives from.
    pub source: Option<String>,
    /// Raw source-range value; parsed lazily so a host can pass
    /// numbers or strings as its config format prefers.
    pub source_range: Option<serde_json::Value>,
    pub trigger_mode: TriggerMode,
    /// Cron pattern for `Scheduled` / `Both`.
    pub schedule: Option<String>,
    pub debounce_ms: u64,
    pub dependencies: Vec<String>,
    /// Per-dependency record limits, parallel to `dependencies`.
    /// Missing entries default to 1.
    pub dependencies_limit: Vec<usize>,
    pub multiple_results: bool,
    /// When true, a count-mode run with fewer source records than the
    /// limit is skipped.
    pub source_range_min: bool,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            source: None,
            source_range: None,
            trigger_mode: TriggerMode::OnSource,
            schedule: None,
            debounce_ms: 1000,
            dependencies: Vec::new(),
            dependencies_limit: Vec::new(),
            multiple_results: false,
            source_range_min: false,
        }
    }
}

impl HarvesterConfig {
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_source_range(mut self, value: serde_json::Value) -> Self {
        self.source_range = Some(value);
        self
    }

    pub fn with_trigger_mode(mut self, mode: TriggerMode) -> Self {
        self.trigger_mode = mode;
        self
    }

    pub fn with_schedule(mut self, pattern: impl Into<String>) -> Self {
        self.schedule = Some(pattern.into());
        self
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>, limit: usize) -> Self {
        self.dependencies.push(name.into());
        self.dependencies_limit.push(limit);
        self
    }

    pub fn with_multiple_results(mut self) -> Self {
        self.multiple_results = true;
        self
    }

    pub fn with_source_range_min(mut self) -> Self {
        self.source_range_min = true;
        self
    }

    pub fn parsed_source_range(&self) -> TwinResult<SourceRange> {
        SourceRange::parse(self.source_range.as_ref())
    }

    /// `(name, limit)` pairs; limits default to 1 when the parallel
    /// list is shorter.
    pub fn dependency_pairs(&self) -> Vec<(String, usize)> {
        self.dependencies
            .iter()
            .enumerate()
            .map(|(i, name)| {
                (
                    name.clone(),
                    self.dependencies_limit.get(i).copied().unwrap_or(1),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use twin_core::ErrorKind;

    #[test]
    fn absent_range_means_single_latest() {
        assert_eq!(SourceRange::parse(None).unwrap(), SourceRange::Count(1));
    }

    #[test]
    fn numbers_and_numeric_strings_are_count_mode() {
        assert_eq!(
            SourceRange::parse(Some(&json!(3))).unwrap(),
            SourceRange::Count(3)
        );
        assert_eq!(
            SourceRange::parse(Some(&json!("12"))).unwrap(),
            SourceRange::Count(12)
        );
    }

    #[test]
    fn suffixed_strings_are_time_mode() {
        assert_eq!(
            SourceRange::parse(Some(&json!("1h"))).unwrap(),
            SourceRange::Window {
                amount: 1,
                unit: RangeUnit::Hours
            }
        );
        assert_eq!(
            SourceRange::parse(Some(&json!("30m")))
                .unwrap()
                .window()
                .unwrap(),
            Duration::minutes(30)
        );
        assert_eq!(
            SourceRange::parse(Some(&json!("7d")))
                .unwrap()
                .window()
                .unwrap(),
            Duration::days(7)
        );
    }

    #[test]
    fn anything_else_is_a_configuration_error() {
        for bad in [json!("1w"), json!("h"), json!(0), json!("0"), json!(true), json!(-2)] {
            let err = SourceRange::parse(Some(&bad)).unwrap_err();
            let twin = twin_core::TwinError::from_anyhow(&err).unwrap();
            assert_eq!(twin.kind, ErrorKind::Configuration, "for {bad}");
        }
    }

    #[test]
    fn dependency_limits_default_to_one() {
        let config = HarvesterConfig {
            dependencies: vec!["a".to_string(), "b".to_string()],
            dependencies_limit: vec![5],
            ..HarvesterConfig::default()
        };
        assert_eq!(
            config.dependency_pairs(),
            vec![("a".to_string(), 5), ("b".to_string(), 1)]
        );
    }

    #[test]
    fn trigger_mode_both_is_the_union() {
        assert!(TriggerMode::Both.listens_to_source());
        assert!(TriggerMode::Both.uses_schedule());
        assert!(!TriggerMode::Scheduled.listens_to_source());
        assert!(!TriggerMode::OnSource.uses_schedule());
    }
}
