//! JSON-RPC remote store.
//!
//! The actual HTTP client is abstracted via a trait so any HTTP library (or a
//! scripted client in tests) can carry the requests.

use crate::error::{EngineError, EngineResult};
use crate::transport::{RemoteStore, TimestampField};
use chrono::NaiveDateTime;
use leadsync_protocol::rpc::{decode_leads, decode_response, decode_write_results, RpcRequest};
use leadsync_protocol::{FieldKey, FieldMap, LeadRecord, ProtocolError, RecordOutcome, RemoteId};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

/// Default API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.sharpspring.com/pubapi/v1/";

/// Remote error codes that mean the credentials are wrong.
const AUTH_ERROR_CODES: [i64; 2] = [101, 102];

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;
}

/// Account credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account id.
    pub account_id: String,
    /// Secret key.
    pub secret_key: String,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(account_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            secret_key: secret_key.into(),
        }
    }
}

/// Remote store speaking the Sharpspring JSON-RPC API.
pub struct RpcRemoteStore<C: HttpClient> {
    endpoint: String,
    credentials: Credentials,
    field_map: FieldMap,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> RpcRemoteStore<C> {
    /// Creates a store using the default endpoint.
    pub fn new(credentials: Credentials, field_map: FieldMap, client: C) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            credentials,
            field_map,
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Overrides the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Returns the request URL (endpoint plus credentials).
    pub fn url(&self) -> String {
        format!(
            "{}?accountID={}&secretKey={}",
            self.endpoint, self.credentials.account_id, self.credentials.secret_key
        )
    }

    /// Returns the field map.
    pub fn field_map(&self) -> &FieldMap {
        &self.field_map
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn request_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn call(&self, request: RpcRequest) -> EngineResult<Value> {
        debug!(method = %request.method, id = %request.id, "remote call");
        let body = request.to_bytes()?;

        let response = self.client.post(&self.url(), body).map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            EngineError::transport_retryable(e)
        })?;
        *self.last_error.write() = None;

        match decode_response(&response) {
            Err(ProtocolError::Api { code, message }) if AUTH_ERROR_CODES.contains(&code) => {
                Err(EngineError::transport_fatal(format!("{} ({})", message, code)))
            }
            other => Ok(other?),
        }
    }

    fn write(
        &self,
        request: RpcRequest,
        key: &str,
        expected: usize,
    ) -> EngineResult<Vec<RecordOutcome>> {
        let result = self.call(request)?;
        let outcomes = decode_write_results(&result, key)?;
        if outcomes.len() != expected {
            return Err(ProtocolError::invalid(format!(
                "expected {} '{}' results, got {}",
                expected,
                key,
                outcomes.len()
            ))
            .into());
        }
        Ok(outcomes)
    }

    fn system_field(&self, field: &FieldKey) -> String {
        match field {
            FieldKey::Id => "id".to_string(),
            FieldKey::ForeignKey => self.field_map.foreign_key_system_name().to_string(),
            FieldKey::Email => "emailAddress".to_string(),
            FieldKey::Active => "active".to_string(),
            FieldKey::Status => "leadStatus".to_string(),
            FieldKey::Field(name) => self.field_map.system_name(name).to_string(),
        }
    }
}

impl<C: HttpClient> RemoteStore for RpcRemoteStore<C> {
    fn create_records(&self, records: &[LeadRecord]) -> EngineResult<Vec<RecordOutcome>> {
        let request = RpcRequest::create_leads(records, &self.field_map, Self::request_id());
        self.write(request, "creates", records.len())
    }

    fn update_records(&self, records: &[LeadRecord]) -> EngineResult<Vec<RecordOutcome>> {
        let request = RpcRequest::update_leads(records, &self.field_map, Self::request_id());
        self.write(request, "updates", records.len())
    }

    fn get_records_changed_in_range(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        field: TimestampField,
        limit: usize,
    ) -> EngineResult<Vec<LeadRecord>> {
        let request =
            RpcRequest::leads_date_range(from, to, field.as_str(), limit, Self::request_id());
        let result = self.call(request)?;
        Ok(decode_leads(&result, &self.field_map)?)
    }

    fn get_record_by_id(&self, id: &RemoteId) -> EngineResult<Option<LeadRecord>> {
        let request = RpcRequest::lead(id, Self::request_id());
        let result = self.call(request)?;
        Ok(decode_leads(&result, &self.field_map)?.into_iter().next())
    }

    fn get_records_by_field(&self, field: &FieldKey, value: &str) -> EngineResult<Vec<LeadRecord>> {
        let request = RpcRequest::leads_where(&self.system_field(field), value, Self::request_id());
        let result = self.call(request)?;
        Ok(decode_leads(&result, &self.field_map)?)
    }
}
