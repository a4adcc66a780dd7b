//! Display normalization for incident records returned by the upstream.
//!
//! Records arrive as loose JSON objects. Normalizing one coerces every log
//! field to text, orders the canonical logs chronologically, blanks out the
//! escalation tiers the incident has not reached yet and projects the
//! current tier (technician, SLA deadline, breach follow-up) into dedicated
//! fields. Applying the normalizer to its own output is a no-op.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::util::{parse_timestamp, value_to_text};

/// Placeholder the automation backend's templates render for "no value".
pub const EMPTY_SENTINEL: &str = "{{emptystring}}";

/// Display status for incidents whose current-tier SLA has expired.
pub const FOLLOW_UP_STATUS: &str = "seguimiento";

/// SLA deadline field for each escalation level, indexed by level.
pub const SLA_KEYS: [&str; 4] = [
    "sla_l0_end",
    "sla_l1_backup_end",
    "sla_l2_equipo_end",
    "sla_l3_responsable_end",
];

/// Canonical log fields that get sorted, with the spreadsheet-style column
/// names they may arrive under instead.
const CANONICAL_LOGS: [(&str, &str); 2] = [
    ("solicitudes_log", "Solicitudes (log)"),
    ("respuestas_log", "Respuestas (log)"),
];

const MAX_LEVEL: i64 = 3;

static LOG_TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[(.+?)\]").unwrap());

pub type IncidentRecord = Map<String, Value>;

/// Full normalization of one incident, evaluated against `now`.
pub fn normalize_incident(mut record: IncidentRecord, now: DateTime<Utc>) -> IncidentRecord {
    normalize_logs(&mut record);
    let level = escalation_level(record.get("escalation_level"));
    redact_unreached_tiers(&mut record, level);
    project_current_level(&mut record, level, now);
    record
}

/// Coerce every field whose name mentions "log" to text, then sort the
/// canonical log fields chronologically.
pub fn normalize_logs(record: &mut IncidentRecord) {
    for (key, value) in record.iter_mut() {
        if key.to_lowercase().contains("log") {
            *value = Value::String(coerce_log_value(value));
        }
    }
    for (canonical, column) in CANONICAL_LOGS {
        if !record.contains_key(canonical) {
            if let Some(v) = record.get(column).filter(|v| has_content(v)).cloned() {
                record.insert(canonical.to_string(), v);
            }
        }
        let text = record
            .get(canonical)
            .map(coerce_log_value)
            .unwrap_or_else(|| EMPTY_SENTINEL.to_string());
        let sorted = if text == EMPTY_SENTINEL {
            text
        } else {
            sort_log_chronologically(&text)
        };
        record.insert(canonical.to_string(), Value::String(sorted));
    }
}

fn coerce_log_value(value: &Value) -> String {
    let text = match value {
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(_) => serde_json::to_string_pretty(value).unwrap_or_default(),
        other => value_to_text(other),
    };
    if text.is_empty() {
        EMPTY_SENTINEL.to_string()
    } else {
        text
    }
}

/// Stable ascending sort of non-blank lines by their `[timestamp]` prefix.
/// Lines without a parseable prefix sort as the Unix epoch.
pub fn sort_log_chronologically(log: &str) -> String {
    let mut lines: Vec<(i64, &str)> = log
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| (line_timestamp_millis(line), line))
        .collect();
    lines.sort_by_key(|(ts, _)| *ts);
    lines
        .into_iter()
        .map(|(_, line)| line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn line_timestamp_millis(line: &str) -> i64 {
    LOG_TIMESTAMP_RE
        .captures(line)
        .and_then(|caps| parse_timestamp(&caps[1]))
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0)
}

/// Leading-integer parse of `escalation_level`; anything unusable or outside
/// `0..=3` is level 0.
pub fn escalation_level(value: Option<&Value>) -> i64 {
    let parsed = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => {
            let s = s.trim();
            let digits_end = s
                .char_indices()
                .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+'))))
                .map(|(i, _)| i)
                .unwrap_or(s.len());
            s[..digits_end].parse().ok()
        }
        _ => None,
    };
    parsed.filter(|lvl| (0..=MAX_LEVEL).contains(lvl)).unwrap_or(0)
}

/// Blank every `lN_` field of tiers beyond the next one (`N > level + 1`).
/// The next tier is left intact so the upcoming assignee stays visible.
pub fn redact_unreached_tiers(record: &mut IncidentRecord, level: i64) {
    for tier in 1..=MAX_LEVEL {
        if level.saturating_add(1) >= tier {
            continue;
        }
        let prefix = format!("l{}_", tier);
        for (key, value) in record.iter_mut() {
            if key.starts_with(&prefix) {
                *value = Value::String(EMPTY_SENTINEL.to_string());
            }
        }
    }
}

/// Level 2 is staffed by a team, every other tier by one technician.
pub fn technician_key(level: i64) -> String {
    if level == 2 {
        "l2_technicians".to_string()
    } else {
        format!("l{}_technician", level)
    }
}

pub fn sla_key(level: i64) -> Option<&'static str> {
    usize::try_from(level).ok().and_then(|idx| SLA_KEYS.get(idx).copied())
}

/// Set `current_level` / `current_technician` and, when the current tier's
/// SLA has passed, switch to follow-up display with the next tier attached.
/// Unparseable deadlines never count as a breach.
pub fn project_current_level(record: &mut IncidentRecord, level: i64, now: DateTime<Utc>) {
    record.insert("current_level".to_string(), json!(level));

    let technician = record.get(&technician_key(level)).cloned();
    if let Some(tech) = &technician {
        record.insert("current_technician".to_string(), tech.clone());
    }

    let deadline = sla_key(level).and_then(|key| record.get(key).cloned());
    let breached = deadline
        .as_ref()
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .map(|end| now > end)
        .unwrap_or(false);
    if !breached {
        return;
    }

    record.insert("status".to_string(), json!(FOLLOW_UP_STATUS));
    record.insert(
        "current_technician".to_string(),
        json!({ "email": technician, "sla_end": deadline }),
    );
    let upper = level.saturating_add(1);
    if upper <= MAX_LEVEL {
        let upper_technician = record.get(&technician_key(upper)).cloned();
        let upper_sla = sla_key(upper).and_then(|key| record.get(key).cloned());
        record.insert(
            "upper_level".to_string(),
            json!({
                "level": upper,
                "technician": upper_technician,
                "sla_end": upper_sla,
            }),
        );
    }
}

fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty() && s != EMPTY_SENTINEL,
        _ => true,
    }
}

/// Sample incidents covering every status and level, for dashboard demos.
pub fn demo_incidents(now: DateTime<Utc>) -> Vec<IncidentRecord> {
    const STATUSES: [(&str, i64); 3] = [
        ("Trabajando", -30),
        ("Pendiente", 45),
        ("En seguimiento", -90),
    ];
    let at = |minutes: i64| (now + Duration::minutes(minutes)).to_rfc3339();

    let mut incidents = Vec::with_capacity(STATUSES.len() * 4);
    for (status, offset) in STATUSES {
        let slug = status.replace(' ', "-").to_lowercase();
        for level in 0..=MAX_LEVEL {
            let base = offset + level * 5;
            let mut record = json!({
                "id": format!("INC-{}-L{}", status.replace(' ', "").to_uppercase(), level),
                "status": status,
                "priority": "MEDIA",
                "equipment": format!("Equipo {}", level),
                "zone": format!("Zona {}", level),
                "description": format!("Ejemplo {} nivel {}", status, level),
                "report_date": at(base),
                "escalation_level": level,
                "l1_technician": "tecnico@empresa.com",
                "l1_response": "✅ Acepto",
                "sla_l1_backup_end": at(base + 60),
                "materials": format!("Pieza-{} ({}); Herramienta-{} ({})", level, level + 1, level, level + 2),
                "notes": format!("Nota ejemplo L{}", level),
                "solicitudes_log": format!("[{}] Solicitud de reinicio", at(base)),
                "respuestas_log": format!("[{}] L0 reporta éxito", at(base + 30)),
                "materials_url": format!("https://example.com/materials/{}-l{}", slug, level),
                "history_url": format!("https://example.com/history/{}-l{}", slug, level),
            });
            if let Some(map) = record.as_object_mut() {
                normalize_logs(map);
                incidents.push(std::mem::take(map));
            }
        }
    }
    incidents
}
