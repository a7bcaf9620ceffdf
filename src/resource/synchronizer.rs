use crate::api::client::{ApiError, RemoteApi, RequestBody};
use crate::resource::definitions::{ResourceDefinition, UpdateMode};
use crate::resource::mapping::{build_request, observe, MalformedRecord};
use crate::resource::model::{DesiredConfig, ObservedState, PlanAction, ResourceIdentity, ResourceKind};
use crate::resource::schema::{apply_defaults, replacement_triggers, validate, Presence, ValidationError};
use crate::resource::store::{ConfigStore, StoreError};
use crate::shared::record::set_path;
use reqwest::Method;
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Import,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Create => "Create",
            Action::Read => "Read",
            Action::Update => "Update",
            Action::Delete => "Delete",
            Action::Import => "Import",
        };
        f.write_str(name)
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid {kind} configuration: {}", join_errors(.errors))]
    Validation {
        kind: ResourceKind,
        errors: Vec<ValidationError>,
    },

    #[error("Failed to {action} {kind}: {source}")]
    Api {
        action: Action,
        kind: ResourceKind,
        source: ApiError,
    },

    #[error("Failed to {action} {kind}: malformed response, {detail}")]
    Malformed {
        action: Action,
        kind: ResourceKind,
        detail: MalformedRecord,
    },

    #[error("{kind} has no identity; create or import it first")]
    MissingIdentity { kind: ResourceKind },

    #[error("{action} is not supported for {kind}")]
    Unsupported { action: Action, kind: ResourceKind },

    #[error("No configuration found for '{0}'")]
    NoConfiguration(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// The remote record no longer exists
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::Api {
                source: ApiError::NotFound(_),
                ..
            }
        )
    }
}

/// Whether `observed` already satisfies `desired`. Keys left out of a
/// desired object are not compared.
fn converged(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .filter(|(_, v)| !v.is_null())
            .all(|(k, v)| have.get(k).is_some_and(|h| converged(v, h))),
        _ => desired == observed,
    }
}

/// Outcome of converging one stored resource
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub action: PlanAction,
    pub state: ObservedState,
}

/// Drives the lifecycle of one resource kind against the remote API
pub struct Synchronizer {
    definition: ResourceDefinition,
    api: Arc<dyn RemoteApi>,
}

impl Synchronizer {
    pub fn new(definition: ResourceDefinition, api: Arc<dyn RemoteApi>) -> Self {
        Self { definition, api }
    }

    pub fn for_kind(kind: ResourceKind, api: Arc<dyn RemoteApi>) -> Self {
        Self::new(ResourceDefinition::for_kind(kind), api)
    }

    pub fn kind(&self) -> ResourceKind {
        self.definition.kind
    }

    pub fn definition(&self) -> &ResourceDefinition {
        &self.definition
    }

    /// Validate `desired` and fill in defaults. Nothing is sent anywhere.
    pub fn validate(&self, desired: &DesiredConfig) -> Result<DesiredConfig, SyncError> {
        let errors = validate(&self.definition.schema, &desired.attributes);
        if !errors.is_empty() {
            debug!("{} configuration rejected: {}", self.kind(), join_errors(&errors));
            return Err(SyncError::Validation {
                kind: self.kind(),
                errors,
            });
        }
        let mut normalized = desired.clone();
        apply_defaults(&self.definition.schema, &mut normalized.attributes);
        Ok(normalized)
    }

    /// Decide what converging `desired` requires given the last known state
    pub fn plan(
        &self,
        prior: Option<&ObservedState>,
        desired: &DesiredConfig,
    ) -> Result<PlanAction, SyncError> {
        let desired = self.validate(desired)?;
        let Some(prior) = prior.filter(|p| p.is_present()) else {
            return Ok(PlanAction::Create);
        };

        let triggers = replacement_triggers(&self.definition.schema, &prior.attributes, &desired.attributes);
        if !triggers.is_empty() {
            info!("{} requires replacement: {} changed", self.kind(), triggers.join(", "));
            return Ok(PlanAction::Replace);
        }

        let drifted = self
            .definition
            .schema
            .iter()
            .filter(|attr| attr.presence != Presence::Computed)
            .any(|attr| match desired.attributes.get(attr.name) {
                Some(value) if !value.is_null() => prior
                    .attributes
                    .get(attr.name)
                    .map_or(true, |observed| !converged(value, observed)),
                _ => false,
            });

        Ok(if drifted {
            PlanAction::Update
        } else {
            PlanAction::NoChange
        })
    }

    fn request_body(&self, desired: &DesiredConfig) -> RequestBody {
        let fields = build_request(&self.definition.mappings, &desired.attributes);
        match self.definition.upload_attr {
            Some(attr) => RequestBody::Upload {
                file_path: PathBuf::from(desired.str(attr).unwrap_or_default()),
                fields,
            },
            None => RequestBody::Json(Value::Object(fields)),
        }
    }

    fn api_error(&self, action: Action, source: ApiError) -> SyncError {
        warn!("{} {} failed: {}", action, self.kind(), source);
        SyncError::Api {
            action,
            kind: self.kind(),
            source,
        }
    }

    fn malformed(&self, action: Action, detail: MalformedRecord) -> SyncError {
        warn!("{} {} returned a malformed record: {}", action, self.kind(), detail);
        SyncError::Malformed {
            action,
            kind: self.kind(),
            detail,
        }
    }

    /// Create the remote record and return its server-assigned identity
    pub async fn create(&self, desired: &DesiredConfig) -> Result<ResourceIdentity, SyncError> {
        let desired = self.validate(desired)?;
        let path = (self.definition.collection_path)(&desired.attributes);
        info!("Creating {} '{}'", self.kind(), desired.str("name").unwrap_or_default());

        let record = self
            .api
            .create(&path, self.request_body(&desired))
            .await
            .map_err(|e| self.api_error(Action::Create, e))?;

        let identity = self
            .definition
            .extract_identity(&record)
            .map_err(|e| self.malformed(Action::Create, e))?;
        info!("Created {} with id {}", self.kind(), identity);
        Ok(identity)
    }

    /// Fetch the remote record and rebuild the observed state from it.
    /// `last_known` supplies values the API never echoes back.
    pub async fn read(
        &self,
        identity: &ResourceIdentity,
        last_known: Option<&Map<String, Value>>,
    ) -> Result<ObservedState, SyncError> {
        let path = (self.definition.item_path)(identity);
        debug!("Reading {} {} from {}", self.kind(), identity, path);

        let record = self
            .api
            .get(&path)
            .await
            .map_err(|e| self.api_error(Action::Read, e))?;

        let mut attributes = observe(&self.definition.mappings, &record, last_known)
            .map_err(|e| self.malformed(Action::Read, e))?;
        attributes.insert("id".to_string(), Value::String(identity.to_string()));

        Ok(ObservedState {
            identity: Some(identity.clone()),
            attributes,
        })
    }

    /// Replace the remote record in place according to the kind's update mode
    pub async fn update(
        &self,
        identity: &ResourceIdentity,
        desired: &DesiredConfig,
    ) -> Result<ResourceIdentity, SyncError> {
        let desired = self.validate(desired)?;

        match &self.definition.update {
            UpdateMode::Unsupported => {
                info!("{} does not support in-place updates; leaving {} untouched", self.kind(), identity);
                Ok(identity.clone())
            }
            UpdateMode::InPlace { method } => {
                let mut body = self.request_body(&desired);
                if let RequestBody::Json(Value::Object(fields)) = &mut body {
                    fields.insert("id".to_string(), Value::String(identity.to_string()));
                }
                let path = (self.definition.item_path)(identity);
                info!("Updating {} {}", self.kind(), identity);

                let record = self
                    .api
                    .update(method.clone(), &path, body)
                    .await
                    .map_err(|e| self.api_error(Action::Update, e))?;

                match self.definition.extract_identity(&record) {
                    Ok(updated) => Ok(updated),
                    // some endpoints answer with an empty body
                    Err(_) if record.is_null() => Ok(identity.clone()),
                    Err(e) => Err(self.malformed(Action::Update, e)),
                }
            }
            UpdateMode::Reimport { force_flag } => {
                let mut body = self.request_body(&desired);
                match &mut body {
                    RequestBody::Upload { fields, .. } => set_path(fields, force_flag, Value::Bool(true)),
                    RequestBody::Json(Value::Object(fields)) => set_path(fields, force_flag, Value::Bool(true)),
                    RequestBody::Json(_) => {}
                }
                let path = (self.definition.collection_path)(&desired.attributes);
                info!("Re-importing {} {} with override", self.kind(), identity);

                let record = self
                    .api
                    .update(Method::POST, &path, body)
                    .await
                    .map_err(|e| self.api_error(Action::Update, e))?;

                self.definition
                    .extract_identity(&record)
                    .map_err(|e| self.malformed(Action::Update, e))
            }
        }
    }

    /// Delete the remote record. The caller clears its copy of the
    /// identity only when this succeeds.
    pub async fn delete(&self, identity: &ResourceIdentity) -> Result<(), SyncError> {
        let path = (self.definition.item_path)(identity);
        info!("Deleting {} {}", self.kind(), identity);
        self.api
            .delete(&path)
            .await
            .map_err(|e| self.api_error(Action::Delete, e))
    }

    /// Adopt an existing remote record by its identity
    pub async fn import(&self, id: &str) -> Result<ObservedState, SyncError> {
        if !self.definition.importable {
            return Err(SyncError::Unsupported {
                action: Action::Import,
                kind: self.kind(),
            });
        }
        let identity = ResourceIdentity::new(id).ok_or(SyncError::MissingIdentity { kind: self.kind() })?;
        info!("Importing {} {}", self.kind(), identity);
        self.read(&identity, None).await
    }

    /// Converge the resource stored under `address` and persist the result
    pub async fn apply(
        &self,
        store: &dyn ConfigStore,
        address: &str,
    ) -> Result<ApplyOutcome, SyncError> {
        let desired = store
            .desired(address)
            .await?
            .ok_or_else(|| SyncError::NoConfiguration(address.to_string()))?;
        let prior = store.observed(address).await?;
        let action = self.plan(prior.as_ref(), &desired)?;
        let normalized = self.validate(&desired)?;
        info!("Plan for {}: {:?}", address, action);

        let state = match (action, prior) {
            (PlanAction::NoChange, Some(prior)) => prior,
            (PlanAction::Update, Some(prior)) => {
                let current = prior.identity.clone().ok_or(SyncError::MissingIdentity { kind: self.kind() })?;
                let identity = self.update(&current, &desired).await?;
                self.record_and_read(store, address, identity, &normalized).await?
            }
            (PlanAction::Replace, Some(mut prior)) => {
                if let Some(old) = prior.identity.clone() {
                    self.delete(&old).await?;
                    prior.clear();
                    store.set_observed(address, prior).await?;
                }
                let identity = self.create(&desired).await?;
                self.record_and_read(store, address, identity, &normalized).await?
            }
            _ => {
                let identity = self.create(&desired).await?;
                self.record_and_read(store, address, identity, &normalized).await?
            }
        };

        store.set_observed(address, state.clone()).await?;
        Ok(ApplyOutcome { action, state })
    }

    /// Persist `identity` as soon as the remote call succeeded, then read
    /// the record back. A failed read leaves the identity stored so the
    /// next apply does not create a duplicate.
    async fn record_and_read(
        &self,
        store: &dyn ConfigStore,
        address: &str,
        identity: ResourceIdentity,
        normalized: &DesiredConfig,
    ) -> Result<ObservedState, SyncError> {
        let mut attributes = normalized.attributes.clone();
        attributes.insert("id".to_string(), Value::String(identity.to_string()));
        store
            .set_observed(
                address,
                ObservedState {
                    identity: Some(identity.clone()),
                    attributes,
                },
            )
            .await?;

        self.read(&identity, Some(&normalized.attributes)).await
    }

    /// Refresh the stored state from the remote record. A record that has
    /// disappeared remotely is dropped from the store.
    pub async fn refresh(
        &self,
        store: &dyn ConfigStore,
        address: &str,
    ) -> Result<Option<ObservedState>, SyncError> {
        let Some(prior) = store.observed(address).await? else {
            return Ok(None);
        };
        let Some(identity) = prior.identity.clone() else {
            return Ok(None);
        };

        match self.read(&identity, Some(&prior.attributes)).await {
            Ok(state) => {
                store.set_observed(address, state.clone()).await?;
                Ok(Some(state))
            }
            Err(e) if e.is_not_found() => {
                warn!("{} {} no longer exists remotely", self.kind(), identity);
                let mut gone = prior;
                gone.clear();
                store.set_observed(address, gone).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Import by identity and record the result under `address`
    pub async fn import_into(
        &self,
        store: &dyn ConfigStore,
        address: &str,
        id: &str,
    ) -> Result<ObservedState, SyncError> {
        let state = self.import(id).await?;
        store.set_observed(address, state.clone()).await?;
        Ok(state)
    }

    /// Delete the stored resource; its identity is cleared only after the
    /// remote delete succeeded
    pub async fn destroy(&self, store: &dyn ConfigStore, address: &str) -> Result<bool, SyncError> {
        let Some(mut state) = store.observed(address).await? else {
            return Ok(false);
        };
        let Some(identity) = state.identity.clone() else {
            return Ok(false);
        };
        self.delete(&identity).await?;
        state.clear();
        store.set_observed(address, state).await?;
        Ok(true)
    }
}
