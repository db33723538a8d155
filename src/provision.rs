//! Reconciles a [`SchemaManifest`] against a live database.
//!
//! Collections and indexes are created through the store's own
//! create-if-absent commands, so several provisioners may run at the same
//! time against the same database. An "already exists" answer is success
//! unless the existing index enforces different uniqueness than declared,
//! or enforces it on only part of the collection.
use mongodb::{bson::Document, Collection, Database};
use tracing::{debug, info, instrument, warn};

use crate::{
    reconcile::{self, ExistingIndex, IndexAction},
    schema::{IndexSpec, ManifestError, SchemaManifest},
    utils::db::{self, INDEX_KEY_SPECS_CONFLICT, INDEX_OPTIONS_CONFLICT},
};

#[derive(thiserror::Error, Debug)]
pub enum ProvisionError {
    #[error("failed to connect to database")]
    ConnectionError(#[source] mongodb::error::Error),
    #[error(
        "index on {collection} ({fields}) conflicts with existing index {existing} \
         (declared unique: {declared_unique}, existing unique: {existing_unique})"
    )]
    IndexConflict {
        collection: String,
        fields: String,
        existing: String,
        declared_unique: bool,
        existing_unique: bool,
    },
    #[error("invalid schema manifest")]
    InvalidManifestError(#[from] ManifestError),
    #[error("database command failed")]
    DatabaseError(#[source] mongodb::error::Error),
}

impl From<mongodb::error::Error> for ProvisionError {
    fn from(error: mongodb::error::Error) -> Self {
        if db::is_connection_error(&error) {
            ProvisionError::ConnectionError(error)
        } else {
            ProvisionError::DatabaseError(error)
        }
    }
}

impl ProvisionError {
    fn conflict(spec: &IndexSpec, existing: &ExistingIndex) -> Self {
        ProvisionError::IndexConflict {
            collection: spec.collection.clone(),
            fields: spec.field_set(),
            existing: existing.describe(),
            declared_unique: spec.unique,
            existing_unique: existing.unique,
        }
    }
}

/// What a provisioning run did. Index entries read `collection.index_name`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub collections_created: Vec<String>,
    pub collections_existing: Vec<String>,
    pub indexes_created: Vec<String>,
    pub indexes_existing: Vec<String>,
}

/// Checks the connection before anything else, so an unreachable server is
/// reported as such instead of as a failed command.
pub async fn ping(db: &Database) -> Result<(), ProvisionError> {
    db::ping(db)
        .await
        .map_err(ProvisionError::ConnectionError)
}

#[instrument(skip_all, fields(database = db.name()), err)]
pub async fn provision(
    db: &Database,
    manifest: &SchemaManifest,
) -> Result<ProvisionReport, ProvisionError> {
    manifest.validate()?;

    let mut report = ProvisionReport::default();

    // some deployments answer `create` on an existing collection with ok
    // instead of NamespaceExists, so only the snapshot can tell them apart
    let present = db.list_collection_names().await?;

    for collection in &manifest.collections {
        let created = db::create_collection(db, &collection.name).await?;
        if created && !present.contains(&collection.name) {
            info!(collection = %collection.name, "created collection");
            report.collections_created.push(collection.name.clone());
        } else {
            debug!(collection = %collection.name, "collection already exists");
            report.collections_existing.push(collection.name.clone());
        }
    }

    for collection in &manifest.collections {
        let handle: Collection<Document> = db.collection(&collection.name);
        ensure_indexes(&handle, manifest.indexes_for(&collection.name), &mut report).await?;
    }

    Ok(report)
}

#[instrument(skip_all, fields(collection = collection.name()), err)]
async fn ensure_indexes<'a>(
    collection: &Collection<Document>,
    specs: impl Iterator<Item = &'a IndexSpec>,
    report: &mut ProvisionReport,
) -> Result<(), ProvisionError> {
    let catalog = db::list_indexes(collection).await?;
    let actions = reconcile::plan(specs, &catalog);

    // refuse to touch a collection whose catalog already contradicts us
    for action in &actions {
        if let IndexAction::Conflict { spec, existing } = action {
            return Err(ProvisionError::conflict(spec, existing));
        }
    }

    for action in actions {
        match action {
            IndexAction::Existing { spec, name } => {
                debug!(index = %name, fields = %spec.field_set(), "index already exists");
                report
                    .indexes_existing
                    .push(format!("{}.{}", collection.name(), name));
            }
            IndexAction::Create(spec) => match create_index(collection, spec).await? {
                IndexOutcome::Created(name) => {
                    report
                        .indexes_created
                        .push(format!("{}.{}", collection.name(), name));
                }
                IndexOutcome::Existing(name) => {
                    report
                        .indexes_existing
                        .push(format!("{}.{}", collection.name(), name));
                }
            },
            IndexAction::Conflict { spec, existing } => {
                return Err(ProvisionError::conflict(spec, &existing));
            }
        }
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Created(String),
    /// A compatible index turned up after the catalog was read.
    Existing(String),
}

/// Creates an index the plan found missing. If another provisioner created
/// an index on the same keys or under the same name in the meantime, the
/// store answers IndexOptionsConflict or IndexKeySpecsConflict and the
/// catalog is read again to decide whether what it built is compatible.
#[instrument(skip_all, fields(collection = collection.name(), fields = %spec.field_set()), err)]
pub async fn create_index(
    collection: &Collection<Document>,
    spec: &IndexSpec,
) -> Result<IndexOutcome, ProvisionError> {
    match db::create_index(collection, spec).await {
        Ok(name) => {
            info!(index = %name, unique = spec.unique, "created index");
            Ok(IndexOutcome::Created(name))
        }
        Err(e) if is_index_race(&e) => {
            warn!("index changed while provisioning, re-reading catalog");
            let catalog = db::list_indexes(collection).await?;
            match reconcile::classify(spec, &catalog) {
                IndexAction::Existing { name, .. } => Ok(IndexOutcome::Existing(name)),
                IndexAction::Conflict { existing, .. } => {
                    Err(ProvisionError::conflict(spec, &existing))
                }
                IndexAction::Create(_) => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn is_index_race(error: &mongodb::error::Error) -> bool {
    matches!(
        db::command_error_code(error),
        Some(INDEX_OPTIONS_CONFLICT) | Some(INDEX_KEY_SPECS_CONFLICT)
    )
}

/// Printed by the provisioner once the run succeeded.
pub fn success_message(news: &str, bulletin: &str) -> String {
    format!(
        "Database initialized successfully with {} and {} collections!",
        news, bulletin
    )
}
