use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cmsync::api::client::{ApiError, RemoteApi, RequestBody};
use cmsync::resource::definitions::{self, UpdateMode};
use cmsync::resource::model::{DesiredConfig, PlanAction, ResourceIdentity, ResourceKind};
use cmsync::resource::store::{ConfigStore, MemoryStore};
use cmsync::resource::synchronizer::{Action, SyncError, Synchronizer};

#[derive(Debug, Clone)]
struct Call {
    method: Method,
    path: String,
    body: Option<RequestBody>,
}

/// In-memory stand-in for Central Manager
struct FakeCentralManager {
    item_prefix: String,
    nested_identity: bool,
    records: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<Call>>,
    next_id: Mutex<u32>,
    fail_next: Mutex<Option<ApiError>>,
    fail_next_read: Mutex<Option<ApiError>>,
    /// Body served by the next get or in-place update instead of the stored one
    respond_next: Mutex<Option<Value>>,
    /// Fields dropped from stored records, to simulate partial responses
    hidden_fields: Vec<&'static str>,
}

impl FakeCentralManager {
    fn new(item_prefix: &str) -> Self {
        Self {
            item_prefix: item_prefix.to_string(),
            nested_identity: false,
            records: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
            fail_next: Mutex::new(None),
            fail_next_read: Mutex::new(None),
            respond_next: Mutex::new(None),
            hidden_fields: Vec::new(),
        }
    }

    fn for_kind(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::WafPolicy => Self::new("/api/v1/spaces/default/security/waf-policies"),
            ResourceKind::WafReport => Self::new("/api/v1/spaces/default/security/waf/reports"),
            ResourceKind::WafPolicyImport => Self {
                nested_identity: true,
                ..Self::new("/api/v1/spaces/default/security/waf-policies")
            },
            ResourceKind::DeviceProvider => Self {
                hidden_fields: vec!["password"],
                ..Self::new("/api/device/v1/providers")
            },
        }
    }

    fn fail_next(&self, error: ApiError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    fn fail_next_read(&self, error: ApiError) {
        *self.fail_next_read.lock().unwrap() = Some(error);
    }

    fn respond_next(&self, body: Value) {
        *self.respond_next.lock().unwrap() = Some(body);
    }

    fn take_response(&self) -> Option<Value> {
        self.respond_next.lock().unwrap().take()
    }

    fn count(&self, method: Method) -> usize {
        self.calls().iter().filter(|c| c.method == method).count()
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, method: Method, path: &str, body: Option<&RequestBody>) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(Call {
            method,
            path: path.to_string(),
            body: body.cloned(),
        });
        match self.fail_next.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn put_record(&self, path: &str, value: Value) {
        self.records.lock().unwrap().insert(path.to_string(), value);
    }

    fn stored(&self, id: &str, body: &RequestBody) -> Value {
        let mut fields = body.fields().cloned().unwrap_or_default();
        strip(&mut fields, &self.hidden_fields);
        fields.insert("id".to_string(), json!(id));
        Value::Object(fields)
    }

    fn identity_response(&self, id: &str) -> Value {
        if self.nested_identity {
            json!({"policy": {"id": id}})
        } else {
            json!({"id": id})
        }
    }
}

fn strip(fields: &mut Map<String, Value>, hidden: &[&str]) {
    for value in fields.values_mut() {
        if let Value::Object(nested) = value {
            strip(nested, hidden);
        }
    }
    for key in hidden {
        fields.remove(*key);
    }
}

#[async_trait]
impl RemoteApi for FakeCentralManager {
    async fn create(&self, path: &str, body: RequestBody) -> Result<Value, ApiError> {
        self.record(Method::POST, path, Some(&body))?;
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("id-{}", next)
        };
        let record = self.stored(&id, &body);
        self.put_record(&format!("{}/{}", self.item_prefix, id), record);
        Ok(self.identity_response(&id))
    }

    async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.record(Method::GET, path, None)?;
        if let Some(error) = self.fail_next_read.lock().unwrap().take() {
            return Err(error);
        }
        if let Some(body) = self.take_response() {
            return Ok(body);
        }
        self.records
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(path.to_string()))
    }

    async fn update(&self, method: Method, path: &str, body: RequestBody) -> Result<Value, ApiError> {
        self.record(method.clone(), path, Some(&body))?;
        if method == Method::POST {
            // re-import: overwrite the policy carrying the same name
            let name = body.fields().and_then(|f| f.get("name")).cloned();
            let mut records = self.records.lock().unwrap();
            let existing = records
                .iter()
                .find(|(_, r)| r.get("name") == name.as_ref())
                .map(|(k, r)| (k.clone(), r["id"].as_str().unwrap_or_default().to_string()));
            let (key, id) = existing.ok_or_else(|| ApiError::Status {
                status: 409,
                message: "no policy to override".to_string(),
            })?;
            records.insert(key, self.stored(&id, &body));
            return Ok(self.identity_response(&id));
        }

        let mut records = self.records.lock().unwrap();
        let Some(existing) = records.get(path) else {
            return Err(ApiError::NotFound(path.to_string()));
        };
        let id = existing["id"].as_str().unwrap_or_default().to_string();
        records.insert(path.to_string(), self.stored(&id, &body));
        Ok(self.take_response().unwrap_or(Value::Null))
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.record(Method::DELETE, path, None)?;
        self.records
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(path.to_string()))
    }
}

fn desired(value: Value) -> DesiredConfig {
    DesiredConfig::from_value(value).unwrap()
}

fn setup(kind: ResourceKind) -> (Arc<FakeCentralManager>, Synchronizer) {
    let api = Arc::new(FakeCentralManager::for_kind(kind));
    let sync = Synchronizer::for_kind(kind, api.clone());
    (api, sync)
}

fn policy_config() -> DesiredConfig {
    desired(json!({
        "name": "p1",
        "enforcement_mode": "blocking",
        "application_language": "utf-8",
        "template_name": "Fundamental-Template"
    }))
}

fn report_config() -> DesiredConfig {
    desired(json!({
        "name": "weekly report",
        "description": "attacks this week",
        "time_frame_in_days": 7,
        "top_level": 10,
        "request_type": "illegal",
        "scope": {"entity": "policies", "all": false, "names": ["p1", "p2"]},
        "categories": [{"name": "Top Alerted URLs"}, {"name": "Top Alerted IPs"}]
    }))
}

fn provider_config() -> DesiredConfig {
    desired(json!({
        "type": "VSPHERE",
        "name": "vcenter",
        "address": "10.1.1.10:443",
        "username": "admin@vsphere.local",
        "password": "s3cret"
    }))
}

fn import_config(file_path: &str) -> DesiredConfig {
    desired(json!({
        "name": "imported",
        "description": "from file",
        "file_path": file_path,
        "file_md5": "0cc175b9c0f1b6a831c399e269772661"
    }))
}

fn body_of(call: &Call) -> Value {
    Value::Object(call.body.as_ref().and_then(|b| b.fields()).cloned().unwrap())
}

#[tokio::test]
async fn test_policy_create_applies_toggle_defaults() {
    let (api, sync) = setup(ResourceKind::WafPolicy);

    let identity = sync.create(&policy_config()).await.unwrap();
    assert_eq!(identity.as_str(), "id-1");

    let calls = api.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, "/api/v1/spaces/default/security/waf-policies");
    let body = body_of(&calls[0]);
    assert_eq!(body["bot_defense"]["enabled"], true);
    assert_eq!(body["ip_intelligence"]["enabled"], true);
    assert_eq!(body["dos_protection"]["enabled"], false);
    assert_eq!(body["blocking_settings"]["enabled"], true);
    assert_eq!(
        body["declaration"]["policy"]["blocking-settings"]["violations"],
        json!([{"name": "VIOL_THREAT_CAMPAIGN", "alarm": true, "block": true}])
    );
}

#[tokio::test]
async fn test_policy_explicit_toggles_override_defaults() {
    let (api, sync) = setup(ResourceKind::WafPolicy);
    let mut config = policy_config();
    config.attributes.insert("bot_defense".into(), json!({"enabled": false}));
    config.attributes.insert("dos_protection".into(), json!({"enabled": true}));
    config.attributes.insert("blocking_settings".into(), json!({"enabled": false}));

    let identity = sync.create(&config).await.unwrap();
    let body = body_of(&api.calls()[0]);
    assert_eq!(body["bot_defense"]["enabled"], false);
    assert_eq!(body["ip_intelligence"]["enabled"], true);
    assert_eq!(body["dos_protection"]["enabled"], true);
    assert_eq!(
        body["declaration"]["policy"]["blocking-settings"]["violations"][0]["block"],
        false
    );

    let observed = sync.read(&identity, None).await.unwrap();
    assert_eq!(observed.get(&["bot_defense", "enabled"]), Some(&json!(false)));
    assert_eq!(observed.get(&["dos_protection", "enabled"]), Some(&json!(true)));
}

#[tokio::test]
async fn test_policy_round_trip() {
    let (_api, sync) = setup(ResourceKind::WafPolicy);
    let mut config = policy_config();
    config.attributes.insert("description".into(), json!("edge policy"));
    config.attributes.insert("tags".into(), json!(["prod", "edge"]));

    let identity = sync.create(&config).await.unwrap();
    let observed = sync.read(&identity, None).await.unwrap();

    assert_eq!(observed.identity, Some(identity.clone()));
    assert_eq!(observed.str("id"), Some("id-1"));
    for field in ["name", "description", "enforcement_mode", "application_language", "template_name"] {
        assert_eq!(observed.str(field), config.str(field), "field {}", field);
    }
    assert_eq!(observed.get(&["tags"]), Some(&json!(["prod", "edge"])));
    assert_eq!(observed.get(&["ip_intelligence", "enabled"]), Some(&json!(true)));
}

#[tokio::test]
async fn test_report_scope_order_preserved() {
    let (api, sync) = setup(ResourceKind::WafReport);

    let identity = sync.create(&report_config()).await.unwrap();
    let body = body_of(&api.calls()[0]);
    assert_eq!(body["scope"]["names"], json!(["p1", "p2"]));
    assert_eq!(body["time_frame_in_days"], 7);

    let observed = sync.read(&identity, None).await.unwrap();
    assert_eq!(observed.get(&["scope", "names"]), Some(&json!(["p1", "p2"])));
    assert_eq!(observed.get(&["scope", "all"]), Some(&json!(false)));
    assert_eq!(
        observed.get(&["categories"]),
        Some(&json!([{"name": "Top Alerted URLs"}, {"name": "Top Alerted IPs"}]))
    );
    assert_eq!(observed.str("name"), Some("weekly report"));
}

#[tokio::test]
async fn test_report_read_rebuilds_categories_from_server_record() {
    let (api, sync) = setup(ResourceKind::WafReport);
    let path = "/api/v1/spaces/default/security/waf/reports/r-9";
    api.put_record(
        path,
        json!({
            "id": "r-9",
            "name": "builtin",
            "created_by": "system",
            "user_defined": false,
            "categories": [{"name": "Top Alerted Countries", "order": 1}],
            "scope": {"entity": "applications", "all": true}
        }),
    );

    let identity = ResourceIdentity::new("r-9").unwrap();
    let observed = sync.read(&identity, None).await.unwrap();
    assert_eq!(observed.str("created_by"), Some("system"));
    assert_eq!(observed.get(&["user_defined"]), Some(&json!(false)));
    assert_eq!(
        observed.get(&["categories"]),
        Some(&json!([{"name": "Top Alerted Countries"}]))
    );
    assert!(observed.get(&["scope", "names"]).is_none());
}

#[tokio::test]
async fn test_invalid_name_rejected_before_any_call() {
    for kind in [
        ResourceKind::WafPolicy,
        ResourceKind::WafReport,
        ResourceKind::WafPolicyImport,
    ] {
        let (api, sync) = setup(kind);
        let mut config = match kind {
            ResourceKind::WafPolicy => policy_config(),
            ResourceKind::WafReport => report_config(),
            _ => import_config("/tmp/policy.json"),
        };
        config.attributes.insert("name".into(), json!("bad name!"));

        let err = sync.create(&config).await.unwrap_err();
        match err {
            SyncError::Validation { errors, .. } => {
                assert!(errors.iter().any(|e| e.attribute == "name"), "{:?}", errors)
            }
            other => panic!("expected validation error for {}, got {:?}", kind, other),
        }
        assert!(api.calls().is_empty());
    }
}

#[tokio::test]
async fn test_validation_rejects_enum_and_length_violations() {
    let (api, sync) = setup(ResourceKind::WafReport);
    let mut config = report_config();
    config.attributes.insert("request_type".into(), json!("everything"));
    config.attributes.insert("description".into(), json!("x".repeat(256)));
    config.attributes.insert("id".into(), json!("forged"));

    let err = sync.create(&config).await.unwrap_err();
    let SyncError::Validation { errors, .. } = err else {
        panic!("expected validation error");
    };
    let attributes: Vec<&str> = errors.iter().map(|e| e.attribute.as_str()).collect();
    assert!(attributes.contains(&"request_type"));
    assert!(attributes.contains(&"description"));
    assert!(attributes.contains(&"id"));
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_policy_import_update_forces_override() {
    let (api, sync) = setup(ResourceKind::WafPolicyImport);
    let config = import_config("/tmp/exported-policy.json");

    let identity = sync.create(&config).await.unwrap();
    assert_eq!(identity.as_str(), "id-1");
    let create = &api.calls()[0];
    assert_eq!(create.path, "/api/v1/spaces/default/security/waf-policies/import");
    match create.body.as_ref().unwrap() {
        RequestBody::Upload { file_path, fields } => {
            assert_eq!(file_path.to_str(), Some("/tmp/exported-policy.json"));
            assert_eq!(fields["override"], false);
            assert!(!fields.contains_key("file_md5"));
        }
        other => panic!("expected multipart upload, got {:?}", other),
    }

    let mut changed = config.clone();
    changed.attributes.insert("file_md5".into(), json!("92eb5ffee6ae2fec3ad71c777531578f"));
    changed.attributes.insert("override".into(), json!("false"));
    let updated = sync.update(&identity, &changed).await.unwrap();
    assert_eq!(updated, identity);

    let update = api.calls().last().cloned().unwrap();
    assert_eq!(update.method, Method::POST);
    assert_eq!(update.path, "/api/v1/spaces/default/security/waf-policies/import");
    assert_eq!(body_of(&update)["override"], true);
}

#[tokio::test]
async fn test_policy_import_read_keeps_local_fields() {
    let (_api, sync) = setup(ResourceKind::WafPolicyImport);
    let config = sync.validate(&import_config("/tmp/p.json")).unwrap();
    assert_eq!(config.str("override"), Some("false"));

    let identity = sync.create(&config).await.unwrap();
    let observed = sync.read(&identity, Some(&config.attributes)).await.unwrap();
    assert_eq!(observed.str("name"), Some("imported"));
    assert_eq!(observed.str("file_path"), Some("/tmp/p.json"));
    assert_eq!(observed.str("file_md5"), config.str("file_md5"));
    assert_eq!(observed.str("override"), Some("false"));
}

#[tokio::test]
async fn test_import_support_per_kind() {
    for kind in [ResourceKind::WafPolicy, ResourceKind::WafReport] {
        let (api, sync) = setup(kind);
        let err = sync.import("some-id").await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Unsupported {
                action: Action::Import,
                ..
            }
        ));
        assert!(api.calls().is_empty());
    }

    let (api, sync) = setup(ResourceKind::DeviceProvider);
    api.put_record(
        "/api/device/v1/providers/prov-7",
        json!({
            "id": "prov-7",
            "name": "velos-a",
            "type": "VELOS",
            "connection": {"host": "10.0.0.7", "authentication": {"type": "basic", "username": "admin"}}
        }),
    );
    let observed = sync.import("prov-7").await.unwrap();
    assert_eq!(observed.str("name"), Some("velos-a"));
    assert_eq!(observed.str("address"), Some("10.0.0.7"));
    assert_eq!(observed.str("username"), Some("admin"));
    assert!(observed.get(&["password"]).is_none());

    assert!(matches!(
        sync.import("  ").await,
        Err(SyncError::MissingIdentity { .. })
    ));
}

#[tokio::test]
async fn test_device_provider_lifecycle() {
    let (api, sync) = setup(ResourceKind::DeviceProvider);
    let config = provider_config();

    let identity = sync.create(&config).await.unwrap();
    let create = &api.calls()[0];
    assert_eq!(create.path, "/api/device/v1/providers/vsphere");
    let body = body_of(create);
    assert_eq!(body["connection"]["host"], "10.1.1.10:443");
    assert_eq!(body["connection"]["authentication"]["type"], "basic");
    assert_eq!(body["connection"]["authentication"]["password"], "s3cret");

    let observed = sync.read(&identity, Some(&config.attributes)).await.unwrap();
    assert_eq!(observed.str("password"), Some("s3cret"));
    assert_eq!(observed.str("type"), Some("VSPHERE"));

    let mut changed = config.clone();
    changed.attributes.insert("address".into(), json!("10.1.1.11"));
    let updated = sync.update(&identity, &changed).await.unwrap();
    assert_eq!(updated, identity);
    let update = api.calls().last().cloned().unwrap();
    assert_eq!(update.method, Method::PUT);
    assert_eq!(update.path, format!("/api/device/v1/providers/{}", identity));
    assert_eq!(body_of(&update)["id"], identity.as_str());

    let refreshed = sync.read(&identity, Some(&changed.attributes)).await.unwrap();
    assert_eq!(refreshed.str("address"), Some("10.1.1.11"));
}

#[tokio::test]
async fn test_delete_then_read_fails() {
    let (_api, sync) = setup(ResourceKind::WafPolicy);
    let identity = sync.create(&policy_config()).await.unwrap();

    sync.delete(&identity).await.unwrap();
    let err = sync.read(&identity, None).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().starts_with("Failed to Read WAF policy"));
}

#[tokio::test]
async fn test_api_errors_are_wrapped_with_operation() {
    let (api, sync) = setup(ResourceKind::WafPolicy);
    api.fail_next(ApiError::Status {
        status: 400,
        message: "policy name already exists".to_string(),
    });

    let err = sync.create(&policy_config()).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Failed to Create WAF policy: Central Manager returned HTTP 400: policy name already exists"
    );
    // nothing is retried
    assert_eq!(api.calls().len(), 1);
}

#[tokio::test]
async fn test_malformed_records_are_typed_errors() {
    let (api, sync) = setup(ResourceKind::WafPolicy);
    let path = "/api/v1/spaces/default/security/waf-policies/bad";
    let identity = ResourceIdentity::new("bad").unwrap();

    api.put_record(path, json!({"description": "no name here"}));
    let err = sync.read(&identity, None).await.unwrap_err();
    assert!(matches!(err, SyncError::Malformed { action: Action::Read, .. }));

    api.put_record(path, json!({"name": "p1", "tags": "not-a-list"}));
    let err = sync.read(&identity, None).await.unwrap_err();
    assert!(err.to_string().contains("tags"));

    // absent optional sub-objects are fine
    api.put_record(path, json!({"name": "p1", "bot_defense": null, "declaration": {}}));
    let observed = sync.read(&identity, None).await.unwrap();
    assert!(observed.get(&["bot_defense"]).is_none());
}

#[tokio::test]
async fn test_update_unsupported_is_passthrough() {
    let api = Arc::new(FakeCentralManager::for_kind(ResourceKind::WafReport));
    let mut definition = definitions::waf_report();
    definition.update = UpdateMode::Unsupported;
    let sync = Synchronizer::new(definition, api.clone());

    let identity = ResourceIdentity::new("r-1").unwrap();
    let result = sync.update(&identity, &report_config()).await.unwrap();
    assert_eq!(result, identity);
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_apply_plans_create_update_and_replace() {
    let (api, sync) = setup(ResourceKind::WafPolicy);
    let store = MemoryStore::new();
    let address = "bigipnext_cm_waf_policy.main";

    store.set_desired(address, policy_config()).await;
    let outcome = sync.apply(&store, address).await.unwrap();
    assert_eq!(outcome.action, PlanAction::Create);
    let first_id = outcome.state.identity.clone().unwrap();

    let outcome = sync.apply(&store, address).await.unwrap();
    assert_eq!(outcome.action, PlanAction::NoChange);

    let mut changed = policy_config();
    changed.attributes.insert("enforcement_mode".into(), json!("transparent"));
    store.set_desired(address, changed.clone()).await;
    let outcome = sync.apply(&store, address).await.unwrap();
    assert_eq!(outcome.action, PlanAction::Update);
    assert_eq!(outcome.state.identity.as_ref(), Some(&first_id));
    assert_eq!(outcome.state.str("enforcement_mode"), Some("transparent"));

    changed.attributes.insert("name".into(), json!("p2"));
    store.set_desired(address, changed).await;
    let outcome = sync.apply(&store, address).await.unwrap();
    assert_eq!(outcome.action, PlanAction::Replace);
    assert_ne!(outcome.state.identity.as_ref(), Some(&first_id));
    assert!(api
        .calls()
        .iter()
        .any(|c| c.method == Method::DELETE && c.path.ends_with(first_id.as_str())));

    let stored = store.observed(address).await.unwrap().unwrap();
    assert_eq!(stored.str("name"), Some("p2"));
}

#[tokio::test]
async fn test_destroy_clears_identity_only_after_remote_success() {
    let (api, sync) = setup(ResourceKind::WafPolicy);
    let store = MemoryStore::new();
    let address = "bigipnext_cm_waf_policy.main";
    store.set_desired(address, policy_config()).await;
    let created = sync.apply(&store, address).await.unwrap().state;

    api.fail_next(ApiError::Http("connection reset".to_string()));
    let err = sync.destroy(&store, address).await.unwrap_err();
    assert!(err.to_string().starts_with("Failed to Delete WAF policy"));
    assert_eq!(store.observed(address).await.unwrap(), Some(created.clone()));

    assert!(sync.destroy(&store, address).await.unwrap());
    let cleared = store.observed(address).await.unwrap().unwrap();
    assert!(cleared.identity.is_none());
    assert_eq!(cleared.str("id"), Some(""));

    // nothing left to delete, and no identity comes back
    assert!(!sync.destroy(&store, address).await.unwrap());
    assert!(store.observed(address).await.unwrap().unwrap().identity.is_none());
    assert_eq!(sync.refresh(&store, address).await.unwrap(), None);
}

#[tokio::test]
async fn test_apply_keeps_identity_when_read_back_fails() {
    let (api, sync) = setup(ResourceKind::WafPolicy);
    let store = MemoryStore::new();
    let address = "bigipnext_cm_waf_policy.main";
    store.set_desired(address, policy_config()).await;

    api.respond_next(json!({"name": 7}));
    let err = sync.apply(&store, address).await.unwrap_err();
    assert!(matches!(err, SyncError::Malformed { action: Action::Read, .. }));

    let stored = store.observed(address).await.unwrap().unwrap();
    assert_eq!(stored.identity.as_ref().map(|id| id.as_str()), Some("id-1"));
    assert_eq!(stored.str("id"), Some("id-1"));

    let outcome = sync.apply(&store, address).await.unwrap();
    assert_eq!(outcome.action, PlanAction::NoChange);
    assert_eq!(api.count(Method::POST), 1);

    let refreshed = sync.refresh(&store, address).await.unwrap().unwrap();
    assert_eq!(refreshed.str("name"), Some("p1"));
}

#[tokio::test]
async fn test_apply_update_records_result_when_read_back_fails() {
    let (api, sync) = setup(ResourceKind::WafPolicy);
    let store = MemoryStore::new();
    let address = "bigipnext_cm_waf_policy.main";
    store.set_desired(address, policy_config()).await;
    sync.apply(&store, address).await.unwrap();

    let mut changed = policy_config();
    changed.attributes.insert("description".into(), json!("tightened"));
    store.set_desired(address, changed).await;

    api.fail_next_read(ApiError::Http("connection reset".to_string()));
    assert!(sync.apply(&store, address).await.is_err());

    let stored = store.observed(address).await.unwrap().unwrap();
    assert_eq!(stored.identity.as_ref().map(|id| id.as_str()), Some("id-1"));
    assert_eq!(stored.str("description"), Some("tightened"));
    assert_eq!(
        sync.apply(&store, address).await.unwrap().action,
        PlanAction::NoChange
    );
}

#[tokio::test]
async fn test_in_place_update_rejects_malformed_identity() {
    let (api, sync) = setup(ResourceKind::WafReport);
    let identity = sync.create(&report_config()).await.unwrap();

    api.respond_next(json!({"id": 42}));
    let err = sync.update(&identity, &report_config()).await.unwrap_err();
    assert!(matches!(err, SyncError::Malformed { action: Action::Update, .. }));

    // an empty body keeps the identity that was sent
    let updated = sync.update(&identity, &report_config()).await.unwrap();
    assert_eq!(updated, identity);
}

#[tokio::test]
async fn test_refresh_drops_resources_deleted_remotely() {
    let (api, sync) = setup(ResourceKind::WafPolicy);
    let store = MemoryStore::new();
    let address = "bigipnext_cm_waf_policy.main";
    store.set_desired(address, policy_config()).await;
    let created = sync.apply(&store, address).await.unwrap().state;

    let refreshed = sync.refresh(&store, address).await.unwrap();
    assert_eq!(refreshed, Some(created.clone()));

    let identity = created.identity.unwrap();
    api.delete(&format!("/api/v1/spaces/default/security/waf-policies/{}", identity))
        .await
        .unwrap();
    assert_eq!(sync.refresh(&store, address).await.unwrap(), None);
    assert!(!store.observed(address).await.unwrap().unwrap().is_present());
}

#[tokio::test]
async fn test_synchronizers_share_one_client_concurrently() {
    let api = Arc::new(FakeCentralManager::for_kind(ResourceKind::WafPolicy));
    let first = Synchronizer::for_kind(ResourceKind::WafPolicy, api.clone());
    let second = Synchronizer::for_kind(ResourceKind::WafPolicy, api.clone());

    let config = policy_config();
    let mut other = policy_config();
    other.attributes.insert("name".into(), json!("p2"));
    let (a, b) = tokio::join!(first.create(&config), second.create(&other));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a, b);

    let (ra, rb) = tokio::join!(first.read(&a, None), second.read(&b, None));
    let names = [
        ra.unwrap().str("name").map(str::to_string),
        rb.unwrap().str("name").map(str::to_string),
    ];
    let mut names: Vec<String> = names.into_iter().flatten().collect();
    names.sort();
    assert_eq!(names, vec!["p1", "p2"]);
}
