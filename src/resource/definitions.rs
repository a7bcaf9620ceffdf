//! Per-kind schemas, field tables and endpoint conventions.
//!
//! The identity of a freshly created record sits at a different place in
//! each response body; `identity_path` records where.

use crate::resource::mapping::{Coercion, FieldMapping, MalformedRecord, ReadBack, Scalar};
use crate::resource::model::{ResourceIdentity, ResourceKind};
use crate::resource::schema::{
    AttrType, Attribute, Validator, OBJECT_NAME_REGEX, REPORT_NAME_REGEX,
};
use crate::shared::record::{RecordExt, RemoteRecord};
use reqwest::Method;
use serde_json::{json, Map, Value};

const WAF_POLICIES_PATH: &str = "/api/v1/spaces/default/security/waf-policies";
const WAF_REPORTS_PATH: &str = "/api/v1/spaces/default/security/waf/reports";
const PROVIDERS_PATH: &str = "/api/device/v1/providers";

pub const THREAT_CAMPAIGN_VIOLATION: &str = "VIOL_THREAT_CAMPAIGN";

pub const ENFORCEMENT_MODES: &[&str] = &["blocking", "transparent"];

pub const POLICY_TEMPLATES: &[&str] = &[
    "Fundamental-Template",
    "Rating-Based-Template",
    "Comprehensive-Template",
    "RAPID-Template",
];

pub const APPLICATION_LANGUAGES: &[&str] = &[
    "auto-detect",
    "big5",
    "euc-jp",
    "euc-kr",
    "gb18030",
    "gb2312",
    "gbk",
    "iso-8859-1",
    "iso-8859-2",
    "iso-8859-3",
    "iso-8859-4",
    "iso-8859-5",
    "iso-8859-6",
    "iso-8859-7",
    "iso-8859-8",
    "iso-8859-9",
    "iso-8859-10",
    "iso-8859-11",
    "iso-8859-13",
    "iso-8859-14",
    "iso-8859-15",
    "iso-8859-16",
    "koi8-r",
    "shift_jis",
    "utf-8",
    "windows-1250",
    "windows-1251",
    "windows-1252",
    "windows-1253",
    "windows-1254",
    "windows-1255",
    "windows-1256",
    "windows-1257",
    "windows-1258",
    "windows-874",
];

pub const REPORT_REQUEST_TYPES: &[&str] = &["illegal", "alerted", "blocked"];

pub const REPORT_SCOPE_ENTITIES: &[&str] = &["policies", "applications"];

pub const REPORT_CATEGORIES: &[&str] = &[
    "Top Alerted URLs",
    "Top Alerted IPs",
    "Top Alerted Policies",
    "Top Alerted Signatures",
    "Top Alerted Violations",
    "Top Alerted Threat Campaigns",
    "Top Alerted Countries",
    "Top Alerted Attack Types",
];

pub const PROVIDER_TYPES: &[&str] = &["RSERIES", "VELOS", "VSPHERE"];

/// How an existing record is changed in place
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateMode {
    /// Send the full body with the identity embedded to the item path
    InPlace { method: Method },
    /// Re-submit to the collection path with the given wire flag forced on
    Reimport { force_flag: &'static [&'static str] },
    /// The remote API has no update; the call is a passthrough
    Unsupported,
}

/// Everything the generic synchronizer needs to know about one kind
#[derive(Debug, Clone)]
pub struct ResourceDefinition {
    pub kind: ResourceKind,
    pub schema: Vec<Attribute>,
    pub mappings: Vec<FieldMapping>,
    pub collection_path: fn(&Map<String, Value>) -> String,
    pub item_path: fn(&ResourceIdentity) -> String,
    /// Location of the server-assigned id in a create response
    pub identity_path: &'static [&'static str],
    pub update: UpdateMode,
    /// Whether an existing record can be adopted by identity
    pub importable: bool,
    /// Attribute naming a local file sent as a multipart upload
    pub upload_attr: Option<&'static str>,
}

impl ResourceDefinition {
    pub fn for_kind(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::WafPolicy => waf_policy(),
            ResourceKind::WafReport => waf_report(),
            ResourceKind::WafPolicyImport => waf_policy_import(),
            ResourceKind::DeviceProvider => device_provider(),
        }
    }

    /// Pull the typed identity out of a create or update response
    pub fn extract_identity(&self, record: &RemoteRecord) -> Result<ResourceIdentity, MalformedRecord> {
        record
            .str_at(self.identity_path)
            .and_then(ResourceIdentity::new)
            .ok_or_else(|| MalformedRecord::missing(self.identity_path))
    }
}

fn toggle(name: &'static str, default: bool, description: &'static str) -> Attribute {
    Attribute::optional(
        name,
        AttrType::Object(vec![
            Attribute::optional("enabled", AttrType::Bool).with_default(json!(default))
        ]),
    )
    .describe(description)
}

fn waf_policy_item_path(id: &ResourceIdentity) -> String {
    format!("{}/{}", WAF_POLICIES_PATH, id)
}

pub fn waf_policy() -> ResourceDefinition {
    let schema = vec![
        Attribute::required("name", AttrType::String)
            .force_new()
            .validate(Validator::Pattern(&OBJECT_NAME_REGEX))
            .describe("Unique name of the WAF policy"),
        Attribute::optional("description", AttrType::String),
        Attribute::optional("tags", AttrType::StringList),
        Attribute::required("enforcement_mode", AttrType::String)
            .validate(Validator::OneOf(ENFORCEMENT_MODES)),
        Attribute::required("application_language", AttrType::String)
            .validate(Validator::OneOf(APPLICATION_LANGUAGES)),
        Attribute::required("template_name", AttrType::String)
            .validate(Validator::OneOf(POLICY_TEMPLATES)),
        toggle("bot_defense", true, "Bot defense protection"),
        toggle("ip_intelligence", true, "IP intelligence protection"),
        toggle("dos_protection", false, "Denial of service protection"),
        toggle("blocking_settings", true, "Block threat campaign violations"),
        Attribute::computed("id", AttrType::String),
    ];

    let mappings = vec![
        FieldMapping::same(&["name"], Coercion::Direct(Scalar::String)).required_in_response(),
        FieldMapping::new(
            &["name"],
            &["declaration", "policy", "name"],
            Coercion::Direct(Scalar::String),
        )
        .read_back(ReadBack::Skip),
        FieldMapping::same(&["description"], Coercion::Direct(Scalar::String)),
        FieldMapping::same(&["tags"], Coercion::StringList),
        FieldMapping::same(&["enforcement_mode"], Coercion::Direct(Scalar::String)),
        FieldMapping::same(&["application_language"], Coercion::Direct(Scalar::String)),
        FieldMapping::same(&["template_name"], Coercion::Direct(Scalar::String)),
        FieldMapping::new(
            &["bot_defense"],
            &["bot_defense", "enabled"],
            Coercion::Toggle { default: true },
        ),
        FieldMapping::new(
            &["ip_intelligence"],
            &["ip_intelligence", "enabled"],
            Coercion::Toggle { default: true },
        ),
        FieldMapping::new(
            &["dos_protection"],
            &["dos_protection", "enabled"],
            Coercion::Toggle { default: false },
        ),
        FieldMapping::new(
            &["blocking_settings"],
            &["blocking_settings", "enabled"],
            Coercion::Toggle { default: true },
        ),
        FieldMapping::new(
            &["blocking_settings"],
            &["declaration", "policy", "blocking-settings", "violations"],
            Coercion::Violation {
                name: THREAT_CAMPAIGN_VIOLATION,
                default: true,
            },
        )
        .read_back(ReadBack::Skip),
    ];

    ResourceDefinition {
        kind: ResourceKind::WafPolicy,
        schema,
        mappings,
        collection_path: |_| WAF_POLICIES_PATH.to_string(),
        item_path: waf_policy_item_path,
        identity_path: &["id"],
        update: UpdateMode::InPlace { method: Method::PUT },
        importable: false,
        upload_attr: None,
    }
}

pub fn waf_report() -> ResourceDefinition {
    let schema = vec![
        Attribute::required("name", AttrType::String)
            .force_new()
            .validate(Validator::Pattern(&REPORT_NAME_REGEX)),
        Attribute::optional("description", AttrType::String).validate(Validator::MaxLength(255)),
        Attribute::required("time_frame_in_days", AttrType::Int).validate(Validator::MinInt(1)),
        Attribute::required("top_level", AttrType::Int).validate(Validator::MinInt(1)),
        Attribute::required("request_type", AttrType::String)
            .validate(Validator::OneOf(REPORT_REQUEST_TYPES)),
        Attribute::computed("created_by", AttrType::String),
        Attribute::required(
            "scope",
            AttrType::Object(vec![
                Attribute::required("entity", AttrType::String)
                    .validate(Validator::OneOf(REPORT_SCOPE_ENTITIES)),
                Attribute::required("all", AttrType::Bool),
                Attribute::optional("names", AttrType::StringList),
            ]),
        ),
        Attribute::optional(
            "categories",
            AttrType::ObjectList(vec![Attribute::required("name", AttrType::String)
                .validate(Validator::OneOf(REPORT_CATEGORIES))]),
        ),
        Attribute::computed("user_defined", AttrType::Bool),
        Attribute::computed("id", AttrType::String),
    ];

    let mappings = vec![
        FieldMapping::same(&["name"], Coercion::Direct(Scalar::String)).required_in_response(),
        FieldMapping::same(&["description"], Coercion::Direct(Scalar::String)),
        FieldMapping::same(&["time_frame_in_days"], Coercion::Direct(Scalar::Int)),
        FieldMapping::same(&["top_level"], Coercion::Direct(Scalar::Int)),
        FieldMapping::same(&["request_type"], Coercion::Direct(Scalar::String)),
        FieldMapping::same(&["created_by"], Coercion::Direct(Scalar::String)),
        FieldMapping::same(&["scope", "entity"], Coercion::Direct(Scalar::String)),
        FieldMapping::same(&["scope", "all"], Coercion::Direct(Scalar::Bool)),
        FieldMapping::same(&["scope", "names"], Coercion::StringList),
        FieldMapping::same(&["categories"], Coercion::ObjectList { keys: &["name"] }),
        FieldMapping::same(&["user_defined"], Coercion::Direct(Scalar::Bool)),
    ];

    ResourceDefinition {
        kind: ResourceKind::WafReport,
        schema,
        mappings,
        collection_path: |_| WAF_REPORTS_PATH.to_string(),
        item_path: |id| format!("{}/{}", WAF_REPORTS_PATH, id),
        identity_path: &["id"],
        update: UpdateMode::InPlace { method: Method::PUT },
        importable: false,
        upload_attr: None,
    }
}

pub fn waf_policy_import() -> ResourceDefinition {
    let schema = vec![
        Attribute::required("name", AttrType::String)
            .force_new()
            .validate(Validator::Pattern(&OBJECT_NAME_REGEX)),
        Attribute::optional("description", AttrType::String).validate(Validator::MaxLength(255)),
        Attribute::required("file_path", AttrType::String)
            .describe("Local path of the exported policy file to upload"),
        Attribute::required("file_md5", AttrType::String)
            .describe("Checksum of the policy file; a change triggers a re-import"),
        Attribute::optional("override", AttrType::String)
            .with_default(json!("false"))
            .validate(Validator::OneOf(&["true", "false"])),
        Attribute::computed("id", AttrType::String),
    ];

    let mappings = vec![
        FieldMapping::same(&["name"], Coercion::Direct(Scalar::String)).required_in_response(),
        FieldMapping::same(&["description"], Coercion::Direct(Scalar::String)),
        FieldMapping::same(&["override"], Coercion::BoolString).read_back(ReadBack::KeepPrior),
        FieldMapping::same(&["file_path"], Coercion::Direct(Scalar::String)).local_only(),
        FieldMapping::same(&["file_md5"], Coercion::Direct(Scalar::String)).local_only(),
    ];

    ResourceDefinition {
        kind: ResourceKind::WafPolicyImport,
        schema,
        mappings,
        collection_path: |_| format!("{}/import", WAF_POLICIES_PATH),
        // imported policies are ordinary WAF policies once created
        item_path: waf_policy_item_path,
        identity_path: &["policy", "id"],
        update: UpdateMode::Reimport {
            force_flag: &["override"],
        },
        importable: true,
        upload_attr: Some("file_path"),
    }
}

pub fn device_provider() -> ResourceDefinition {
    let schema = vec![
        Attribute::required("type", AttrType::String)
            .force_new()
            .validate(Validator::OneOf(PROVIDER_TYPES)),
        Attribute::required("name", AttrType::String),
        Attribute::required("address", AttrType::String)
            .describe("Host or host:port of the provider's management endpoint"),
        Attribute::required("username", AttrType::String),
        Attribute::required("password", AttrType::String).sensitive(),
        Attribute::computed("id", AttrType::String),
    ];

    let mappings = vec![
        FieldMapping::same(&["name"], Coercion::Direct(Scalar::String)).required_in_response(),
        FieldMapping::same(&["type"], Coercion::Direct(Scalar::String)),
        FieldMapping::new(&["address"], &["connection", "host"], Coercion::Direct(Scalar::String)),
        FieldMapping::new(
            &["username"],
            &["connection", "authentication", "username"],
            Coercion::Direct(Scalar::String),
        ),
        FieldMapping::new(
            &["password"],
            &["connection", "authentication", "password"],
            Coercion::Direct(Scalar::String),
        )
        .read_back(ReadBack::KeepPrior),
        FieldMapping::constant(&["connection", "authentication", "type"], json!("basic")),
    ];

    ResourceDefinition {
        kind: ResourceKind::DeviceProvider,
        schema,
        mappings,
        collection_path: |attrs| {
            let provider_type = attrs.str_at(&["type"]).unwrap_or_default();
            format!("{}/{}", PROVIDERS_PATH, provider_type.to_lowercase())
        },
        item_path: |id| format!("{}/{}", PROVIDERS_PATH, id),
        identity_path: &["id"],
        update: UpdateMode::InPlace { method: Method::PUT },
        importable: true,
        upload_attr: None,
    }
}
