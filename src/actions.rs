//! Technician action table and outbound payload construction.
//!
//! Every action the technician dashboard can send is described by one
//! `ActionSpec`: its wire name (plus legacy aliases), the fields it cannot do
//! without, a shaping function that copies and derives its specific fields,
//! and whether it lists incidents (which changes how undecodable upstream
//! replies are treated). Unknown actions are forwarded with all their fields.

use serde_json::{json, Map, Value};

use crate::error::{RelayError, Result};
use crate::util::{display_name_from_email, is_present, value_to_text, RequestMeta};

type Shaper = fn(&Map<String, Value>, &mut Map<String, Value>) -> Result<()>;

#[derive(Debug)]
pub struct ActionSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub required: &'static [&'static str],
    shape: Shaper,
    /// Listing actions fail loudly when the upstream reply is unusable.
    pub listing: bool,
}

pub const ACCEPT: &str = "acepto";
pub const REJECT: &str = "rechazo";
pub const RESOLVE: &str = "resolver";
pub const REQUEST_MATERIALS: &str = "solicitar_materiales";
pub const DERIVE_DEPARTMENT: &str = "derivar_departamento";
pub const REQUEST_HELP: &str = "ayuda";
pub const REQUEST_ASSIGNMENT: &str = "solicitar_asignacion";
pub const CONTRIBUTE_INFORMATION: &str = "aportar_informacion";
pub const VALIDATE_PIN: &str = "validate_pin";
pub const LIST_ASSIGNED: &str = "get_assigned_incidents";

pub static ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        name: ACCEPT,
        aliases: &[],
        required: &[],
        shape: shape_response,
        listing: false,
    },
    ActionSpec {
        name: REJECT,
        aliases: &[],
        required: &[],
        shape: shape_response,
        listing: false,
    },
    ActionSpec {
        name: RESOLVE,
        aliases: &[],
        required: &["solution_description", "time_invested"],
        shape: shape_resolve,
        listing: false,
    },
    ActionSpec {
        name: REQUEST_MATERIALS,
        aliases: &[],
        required: &[],
        shape: shape_request_materials,
        listing: false,
    },
    ActionSpec {
        name: DERIVE_DEPARTMENT,
        aliases: &[],
        required: &["target_department", "derivation_reason"],
        shape: shape_derive_department,
        listing: false,
    },
    ActionSpec {
        name: REQUEST_HELP,
        aliases: &[],
        required: &["help_type", "help_description"],
        shape: shape_request_help,
        listing: false,
    },
    ActionSpec {
        name: REQUEST_ASSIGNMENT,
        aliases: &[],
        required: &[],
        shape: shape_request_assignment,
        listing: false,
    },
    ActionSpec {
        name: CONTRIBUTE_INFORMATION,
        aliases: &["notes"],
        required: &[],
        shape: shape_contribute_information,
        listing: false,
    },
    ActionSpec {
        name: VALIDATE_PIN,
        aliases: &[],
        required: &[],
        shape: shape_pin_only,
        listing: false,
    },
    ActionSpec {
        name: LIST_ASSIGNED,
        aliases: &[],
        required: &[],
        shape: shape_list_assigned,
        listing: true,
    },
];

impl ActionSpec {
    pub fn lookup(action: &str) -> Option<&'static ActionSpec> {
        ACTIONS
            .iter()
            .find(|spec| spec.name == action || spec.aliases.contains(&action))
    }

    fn missing_required_fields(&self, data: &Map<String, Value>) -> Vec<String> {
        self.required
            .iter()
            .filter(|field| !is_present(data.get(**field)))
            .map(|field| field.to_string())
            .collect()
    }
}

/// Canonical request for the upstream webhook. Built once per inbound
/// request and read-only afterwards.
#[derive(Debug, Clone)]
pub struct OutboundPayload {
    action: String,
    spec: Option<&'static ActionSpec>,
    body: Map<String, Value>,
}

impl OutboundPayload {
    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn spec(&self) -> Option<&'static ActionSpec> {
        self.spec
    }

    pub fn is_listing(&self) -> bool {
        self.spec.map(|s| s.listing).unwrap_or(false)
    }

    pub fn incident_id(&self) -> Option<&Value> {
        self.body.get("incident_id")
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.body.clone())
    }
}

/// Read the `action` tag of a raw request, if any.
pub fn action_name(raw: &Map<String, Value>) -> Option<String> {
    raw.get("action")
        .map(value_to_text)
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
}

/// Translate a raw technician request into the canonical upstream payload.
pub fn build_outbound(
    raw: Map<String, Value>,
    meta: &RequestMeta,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<OutboundPayload> {
    let action = action_name(&raw).ok_or(RelayError::MissingAction)?;
    let data = pre_normalize(raw);

    let technician_email = data.get("technician_email").cloned().unwrap_or(Value::Null);
    let technician_name = match data.get("technician_name") {
        Some(name) if is_present(Some(name)) => name.clone(),
        _ => json!(display_name_from_email(
            technician_email.as_str().unwrap_or_default()
        )),
    };
    let level = match data.get("level") {
        Some(level) if is_present(Some(level)) => level.clone(),
        _ => json!("L0"),
    };

    let mut body = Map::new();
    body.insert("timestamp".into(), json!(now.to_rfc3339()));
    body.insert("action".into(), json!(action));
    body.insert(
        "incident_id".into(),
        data.get("incident_id").cloned().unwrap_or(Value::Null),
    );
    body.insert("technician_email".into(), technician_email);
    body.insert("technician_name".into(), technician_name);
    body.insert("level".into(), level);
    body.insert("user_agent".into(), json!(meta.user_agent));
    body.insert("ip_address".into(), json!(meta.ip_address));

    let spec = ActionSpec::lookup(&action);
    match spec {
        Some(spec) => {
            let missing = spec.missing_required_fields(&data);
            if !missing.is_empty() {
                return Err(RelayError::MissingRequiredFields { fields: missing });
            }
            (spec.shape)(&data, &mut body)?;
        }
        None => {
            tracing::warn!(action = %action, "unknown action, forwarding all fields");
            for (key, value) in data {
                body.insert(key, value);
            }
        }
    }

    Ok(OutboundPayload { action, spec, body })
}

/// Harmonize legacy and loosely typed inputs before shaping.
fn pre_normalize(mut data: Map<String, Value>) -> Map<String, Value> {
    let has_requested =
        matches!(data.get("materials_requested"), Some(Value::Array(items)) if !items.is_empty());
    if !has_requested {
        if let Some(Value::Array(legacy)) = data.get("materiales") {
            let mapped: Vec<Value> = legacy.iter().map(legacy_material).collect();
            data.insert("materials_requested".into(), Value::Array(mapped));
        }
    }
    if let Some(Value::String(list)) = data.get("materials_used") {
        let items: Vec<Value> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|name| json!({ "materialName": name, "quantity": 1 }))
            .collect();
        data.insert("materials_used".into(), Value::Array(items));
    }
    if let Some(description) = data.get("description").filter(|d| is_present(Some(d))).cloned() {
        for target in ["help_description", "information_content"] {
            if !is_present(data.get(target)) {
                data.insert(target.into(), description.clone());
            }
        }
    }
    for flag in ["read_only", "work_can_continue"] {
        if let Some(Value::String(s)) = data.get(flag) {
            let b = s == "true";
            data.insert(flag.into(), Value::Bool(b));
        }
    }
    data
}

fn legacy_material(item: &Value) -> Value {
    let quantity = item
        .get("cantidad")
        .and_then(number_like)
        .filter(|q| *q != 0.0)
        .unwrap_or(1.0);
    json!({
        "name": item.get("nombre").cloned().unwrap_or(Value::Null),
        "quantity": json_number(quantity),
        "type": item.get("tipo").cloned().unwrap_or(Value::Null),
        "urgency": text_or(item.get("urgencia"), "normal"),
        "justification": text_or(item.get("justificacion"), ""),
    })
}

fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

fn text_or(value: Option<&Value>, default: &str) -> Value {
    match value {
        Some(v) if is_present(Some(v)) => v.clone(),
        _ => json!(default),
    }
}

fn first_present<'a>(data: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .map(|k| data.get(*k))
        .find(|v| is_present(*v))
        .flatten()
}

fn field(data: &Map<String, Value>, key: &str) -> Value {
    data.get(key).cloned().unwrap_or(Value::Null)
}

fn copy_or(data: &Map<String, Value>, body: &mut Map<String, Value>, key: &str, default: &str) {
    body.insert(key.into(), text_or(data.get(key), default));
}

fn insert_pin(data: &Map<String, Value>, body: &mut Map<String, Value>) {
    copy_or(data, body, "pin", "");
}

fn shape_response(data: &Map<String, Value>, body: &mut Map<String, Value>) -> Result<()> {
    insert_pin(data, body);
    body.insert(
        "reason".into(),
        first_present(data, &["reason", "reject_reason"])
            .cloned()
            .unwrap_or(Value::Null),
    );
    let level = data
        .get("escalation_level")
        .and_then(number_like)
        .filter(|n| n.is_finite())
        .unwrap_or(0.0);
    body.insert("escalation_level".into(), json_number(level));
    if let Some(notify) = data.get("notify_next") {
        body.insert("notify_next".into(), notify.clone());
    }
    Ok(())
}

fn shape_resolve(data: &Map<String, Value>, body: &mut Map<String, Value>) -> Result<()> {
    insert_pin(data, body);
    body.insert("solution_description".into(), field(data, "solution_description"));
    body.insert("time_invested".into(), field(data, "time_invested"));
    copy_or(data, body, "preventive_actions", "");

    let materials = match data.get("materials_used") {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(RelayError::InvalidField {
                field: "materials_used".into(),
                reason: format!("se esperaba lista o texto, no {}", other),
            })
        }
    };
    let summary = materials
        .iter()
        .map(|m| {
            let name = first_present_value(m, &["materialName", "nombre"])
                .map(value_to_text)
                .unwrap_or_else(|| "Material".to_string());
            let qty = first_present_value(m, &["quantity", "cantidad"])
                .map(value_to_text)
                .unwrap_or_else(|| "1".to_string());
            format!("{} ({})", name, qty)
        })
        .collect::<Vec<_>>()
        .join(", ");
    body.insert("materials_count".into(), json!(materials.len()));
    body.insert("materials_summary".into(), json!(summary));
    body.insert("materials_used".into(), Value::Array(materials));
    Ok(())
}

fn first_present_value<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().map(|k| item.get(*k)).find(|v| is_present(*v)).flatten()
}

fn shape_request_materials(data: &Map<String, Value>, body: &mut Map<String, Value>) -> Result<()> {
    let list = match data.get("materials_requested") {
        Some(Value::Array(items)) if !items.is_empty() => items.clone(),
        _ => {
            return Err(RelayError::MissingRequiredFields {
                fields: vec!["materials_requested".into()],
            })
        }
    };
    insert_pin(data, body);
    let urgency_levels = list
        .iter()
        .map(|m| {
            first_present_value(m, &["urgencia", "urgency"])
                .map(value_to_text)
                .unwrap_or_else(|| "normal".to_string())
        })
        .collect::<Vec<_>>()
        .join(",");
    body.insert(
        "work_can_continue".into(),
        json!(is_present(data.get("work_can_continue"))),
    );
    copy_or(data, body, "impact_if_delayed", "Sin impacto especificado");
    body.insert("materials_count".into(), json!(list.len()));
    body.insert("urgency_levels".into(), json!(urgency_levels));
    body.insert("materials_requested".into(), Value::Array(list));
    Ok(())
}

fn shape_derive_department(data: &Map<String, Value>, body: &mut Map<String, Value>) -> Result<()> {
    insert_pin(data, body);
    copy_or(data, body, "current_department", "");
    body.insert("target_department".into(), field(data, "target_department"));
    body.insert("derivation_reason".into(), field(data, "derivation_reason"));
    copy_or(data, body, "technical_notes", "");
    Ok(())
}

fn shape_request_help(data: &Map<String, Value>, body: &mut Map<String, Value>) -> Result<()> {
    insert_pin(data, body);
    body.insert("help_type".into(), field(data, "help_type"));
    body.insert("help_description".into(), field(data, "help_description"));
    copy_or(data, body, "urgency", "media");
    Ok(())
}

fn shape_request_assignment(data: &Map<String, Value>, body: &mut Map<String, Value>) -> Result<()> {
    insert_pin(data, body);
    copy_or(data, body, "request_reason", "");
    copy_or(data, body, "request_justification", "");
    Ok(())
}

fn shape_contribute_information(
    data: &Map<String, Value>,
    body: &mut Map<String, Value>,
) -> Result<()> {
    insert_pin(data, body);
    copy_or(data, body, "information_content", "");
    copy_or(data, body, "description", "");
    Ok(())
}

fn shape_pin_only(data: &Map<String, Value>, body: &mut Map<String, Value>) -> Result<()> {
    insert_pin(data, body);
    Ok(())
}

fn shape_list_assigned(data: &Map<String, Value>, body: &mut Map<String, Value>) -> Result<()> {
    insert_pin(data, body);
    let read_only = matches!(data.get("read_only"), Some(Value::Bool(true)))
        || matches!(data.get("read_only"), Some(Value::String(s)) if s == "true");
    body.insert("read_only".into(), json!(read_only));
    Ok(())
}
