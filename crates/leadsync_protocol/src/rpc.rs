//! Sharpspring JSON-RPC wire format.
//!
//! Every call is a POST of `{"method", "params", "id"}`; every response is
//! `{"result", "error", "id"}`. Batched writes report one
//! `{"success", "error", "id"}` object per input record, in input order.

use crate::error::{ProtocolError, ProtocolResult};
use crate::field_map::FieldMap;
use crate::lead::{LeadRecord, LeadStatus, RemoteId, REMOTE_TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Remote error code for "entry already exists".
pub const DUPLICATE_ENTRY: i64 = 301;

/// Remote error code for "no rows affected".
pub const NO_ROWS_AFFECTED: i64 = 302;

const KEY_ID: &str = "id";
const KEY_EMAIL: &str = "emailAddress";
const KEY_ACTIVE: &str = "active";
const KEY_STATUS: &str = "leadStatus";
const KEY_UPDATED: &str = "updateTimestamp";
const KEY_CREATED: &str = "createTimestamp";

/// A per-record failure reported by a batched write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectError {
    /// Remote error code.
    pub code: i64,
    /// Remote error message.
    pub message: String,
}

/// Known categories of [`ObjectError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectErrorKind {
    /// The record (or its email) already exists.
    DuplicateEntry,
    /// The update matched nothing or changed nothing.
    NoRowsAffected,
    /// Anything else.
    Other,
}

impl ObjectError {
    /// Creates an object error.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Creates a duplicate-entry error.
    pub fn duplicate_entry() -> Self {
        Self::new(DUPLICATE_ENTRY, "Entry already exists")
    }

    /// Creates a no-rows-affected error.
    pub fn no_rows_affected() -> Self {
        Self::new(NO_ROWS_AFFECTED, "No rows affected")
    }

    /// Classifies the error by code, falling back to the message text.
    pub fn kind(&self) -> ObjectErrorKind {
        let message = self.message.to_lowercase();
        if self.code == DUPLICATE_ENTRY || message.contains("already exists") {
            ObjectErrorKind::DuplicateEntry
        } else if self.code == NO_ROWS_AFFECTED || message.contains("no rows affected") {
            ObjectErrorKind::NoRowsAffected
        } else {
            ObjectErrorKind::Other
        }
    }

    /// Returns true if a live re-check may show the write already happened.
    pub fn warrants_recheck(&self) -> bool {
        self.kind() != ObjectErrorKind::Other
    }
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Outcome of one record in a batched write: the remote id on success
/// (creates always report one, updates may not).
pub type RecordOutcome = Result<Option<RemoteId>, ObjectError>;

/// A JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcRequest {
    /// Remote method name.
    pub method: String,
    /// Method parameters.
    pub params: Value,
    /// Request id, echoed by the remote.
    pub id: String,
}

impl RpcRequest {
    /// Creates a request.
    pub fn new(method: impl Into<String>, params: Value, id: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params,
            id: id.into(),
        }
    }

    /// `createLeads` with the given records.
    pub fn create_leads(leads: &[LeadRecord], map: &FieldMap, id: impl Into<String>) -> Self {
        Self::new("createLeads", objects_param(leads, map), id)
    }

    /// `updateLeads` with the given records.
    pub fn update_leads(leads: &[LeadRecord], map: &FieldMap, id: impl Into<String>) -> Self {
        Self::new("updateLeads", objects_param(leads, map), id)
    }

    /// `getLeadsDateRange` for leads whose `timestamp` field lies in `[from, to]`.
    pub fn leads_date_range(
        from: NaiveDateTime,
        to: NaiveDateTime,
        timestamp: &str,
        limit: usize,
        id: impl Into<String>,
    ) -> Self {
        let params = serde_json::json!({
            "startDate": from.format(REMOTE_TIMESTAMP_FORMAT).to_string(),
            "endDate": to.format(REMOTE_TIMESTAMP_FORMAT).to_string(),
            "timestamp": timestamp,
            "limit": limit,
        });
        Self::new("getLeadsDateRange", params, id)
    }

    /// `getLead` by remote id.
    pub fn lead(remote_id: &RemoteId, id: impl Into<String>) -> Self {
        Self::new("getLead", serde_json::json!({ "id": id_value(remote_id) }), id)
    }

    /// `getLeads` filtered on one field.
    pub fn leads_where(system_field: &str, value: &str, id: impl Into<String>) -> Self {
        let mut filter = Map::new();
        filter.insert(system_field.to_string(), Value::String(value.to_string()));
        Self::new("getLeads", serde_json::json!({ "where": filter }), id)
    }

    /// Encodes the request body.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON encoding fails.
    pub fn to_bytes(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn objects_param(leads: &[LeadRecord], map: &FieldMap) -> Value {
    let objects: Vec<Value> = leads
        .iter()
        .map(|lead| Value::Object(lead_to_wire(lead, map)))
        .collect();
    serde_json::json!({ "objects": objects })
}

fn id_value(id: &RemoteId) -> Value {
    match id.as_str().parse::<u64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::String(id.to_string()),
    }
}

/// Converts a lead to its wire object, translating custom field names.
///
/// Undefined attributes are left out.
pub fn lead_to_wire(lead: &LeadRecord, map: &FieldMap) -> Map<String, Value> {
    let mut object = Map::new();
    if let Some(id) = &lead.id {
        object.insert(KEY_ID.into(), id_value(id));
    }
    if let Some(fk) = &lead.foreign_key {
        object.insert(map.foreign_key_system_name().to_string(), Value::String(fk.clone()));
    }
    if let Some(email) = &lead.email {
        object.insert(KEY_EMAIL.into(), Value::String(email.clone()));
    }
    if let Some(active) = lead.active {
        object.insert(KEY_ACTIVE.into(), Value::from(u8::from(active)));
    }
    if let Some(status) = &lead.status {
        object.insert(KEY_STATUS.into(), Value::String(status.as_str().to_string()));
    }
    for (name, value) in &lead.fields {
        object.insert(map.system_name(name).to_string(), Value::String(value.clone()));
    }
    object
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        other => Some(other.to_string()),
    }
}

fn parse_active(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim() {
            "1" | "true" => Some(true),
            "0" | "false" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Converts a wire object to a lead, translating custom field names.
///
/// Null values are treated as undefined.
///
/// # Errors
///
/// Returns an error if the timestamp is present but unparsable.
pub fn lead_from_wire(object: &Map<String, Value>, map: &FieldMap) -> ProtocolResult<LeadRecord> {
    let fk_system = map.foreign_key_system_name();
    let mut lead = LeadRecord::default();

    for (key, value) in object {
        match key.as_str() {
            KEY_ID => lead.id = scalar_to_string(value).map(RemoteId::new),
            KEY_EMAIL => lead.email = scalar_to_string(value),
            KEY_ACTIVE => lead.active = parse_active(value),
            KEY_STATUS => lead.status = scalar_to_string(value).map(LeadStatus::from),
            KEY_UPDATED => {
                if let Some(raw) = scalar_to_string(value) {
                    let parsed = NaiveDateTime::parse_from_str(&raw, REMOTE_TIMESTAMP_FORMAT)
                        .map_err(|e| {
                            ProtocolError::invalid(format!("bad {} {:?}: {}", KEY_UPDATED, raw, e))
                        })?;
                    lead.updated_at = Some(parsed);
                }
            }
            KEY_CREATED => {}
            k if k == fk_system => lead.foreign_key = scalar_to_string(value),
            k => {
                if let Some(v) = scalar_to_string(value) {
                    lead.fields.insert(map.property_name(k).to_string(), v);
                }
            }
        }
    }

    Ok(lead)
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

fn object_error(value: &Value) -> Option<ObjectError> {
    match value {
        Value::Null => None,
        Value::Array(items) => items.iter().find_map(object_error),
        Value::Object(fields) => {
            let code = fields.get("code").and_then(|c| match c {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })?;
            let message = fields
                .get("message")
                .and_then(scalar_to_string)
                .unwrap_or_default();
            Some(ObjectError::new(code, message))
        }
        _ => None,
    }
}

/// Keys under which the write methods report per-record outcomes.
const WRITE_RESULT_KEYS: [&str; 2] = ["creates", "updates"];

fn has_write_results(result: &Value) -> bool {
    WRITE_RESULT_KEYS
        .iter()
        .any(|key| result.get(key).is_some_and(Value::is_array))
}

/// Decodes a response body and returns its `result` member.
///
/// The write methods repeat per-record failures in the top-level `error`
/// member; when `result` carries a per-record array that array wins and
/// the failures surface through [`decode_write_results`].
///
/// # Errors
///
/// Returns [`ProtocolError::Api`] if the remote reported a call-level error,
/// or an invalid payload error if there is no result.
pub fn decode_response(body: &[u8]) -> ProtocolResult<Value> {
    let response: RpcResponse = serde_json::from_slice(body)?;
    if let Some(result) = response.result.as_ref().filter(|r| has_write_results(r)) {
        return Ok(result.clone());
    }
    if let Some(err) = response.error.as_ref().and_then(object_error) {
        return Err(ProtocolError::Api {
            code: err.code,
            message: err.message,
        });
    }
    match response.result {
        Some(Value::Null) | None => Err(ProtocolError::invalid("response has no result")),
        Some(result) => Ok(result),
    }
}

/// Decodes the per-record outcomes of `createLeads` (`key = "creates"`) or
/// `updateLeads` (`key = "updates"`).
///
/// # Errors
///
/// Returns an error if the result does not contain an array under `key`.
pub fn decode_write_results(result: &Value, key: &str) -> ProtocolResult<Vec<RecordOutcome>> {
    let items = result
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| ProtocolError::invalid(format!("missing '{}' array", key)))?;

    Ok(items
        .iter()
        .map(|item| {
            let success = item.get("success").and_then(parse_active).unwrap_or(false);
            if success {
                Ok(item.get(KEY_ID).and_then(scalar_to_string).map(RemoteId::new))
            } else {
                Err(item
                    .get("error")
                    .and_then(object_error)
                    .unwrap_or_else(|| ObjectError::new(0, "unspecified failure")))
            }
        })
        .collect())
}

/// Decodes the `lead` array returned by the read methods.
///
/// # Errors
///
/// Returns an error if an entry is not an object or has a bad timestamp.
pub fn decode_leads(result: &Value, map: &FieldMap) -> ProtocolResult<Vec<LeadRecord>> {
    let items = match result.get("lead") {
        Some(Value::Array(items)) => items.as_slice(),
        Some(Value::Null) | None => return Ok(Vec::new()),
        Some(_) => return Err(ProtocolError::invalid("'lead' is not an array")),
    };

    items
        .iter()
        .map(|item| match item {
            Value::Object(object) => lead_from_wire(object, map),
            _ => Err(ProtocolError::invalid("lead entry is not an object")),
        })
        .collect()
}
