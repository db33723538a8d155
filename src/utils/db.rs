use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    error::ErrorKind,
    Collection, Database,
};
use tracing::instrument;

use crate::{reconcile::ExistingIndex, schema::IndexSpec};

// server error codes, see src/mongo/base/error_codes.yml in the server repo
pub const NAMESPACE_NOT_FOUND: i32 = 26;
pub const NAMESPACE_EXISTS: i32 = 48;
pub const INDEX_OPTIONS_CONFLICT: i32 = 85;
pub const INDEX_KEY_SPECS_CONFLICT: i32 = 86;
pub const DUPLICATE_KEY: i32 = 11000;

/// Server error code of a failed command, if the error came from one.
pub fn command_error_code(error: &mongodb::error::Error) -> Option<i32> {
    match error.kind.as_ref() {
        ErrorKind::Command(command_error) => Some(command_error.code),
        _ => None,
    }
}

/// Whether the error means the server could not be reached or would not let
/// us in, as opposed to the server rejecting a command.
pub fn is_connection_error(error: &mongodb::error::Error) -> bool {
    matches!(
        error.kind.as_ref(),
        ErrorKind::ServerSelection { .. }
            | ErrorKind::Authentication { .. }
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::Io(_)
            | ErrorKind::ConnectionPoolCleared { .. }
    )
}

pub fn is_duplicate_key_error(error: &mongodb::error::Error) -> bool {
    match error.kind.as_ref() {
        ErrorKind::Write(mongodb::error::WriteFailure::WriteError(write_error)) => {
            write_error.code == DUPLICATE_KEY
        }
        _ => command_error_code(error) == Some(DUPLICATE_KEY),
    }
}

#[instrument(skip(db), fields(database = db.name()), err)]
pub async fn ping(db: &Database) -> Result<(), mongodb::error::Error> {
    db.run_command(doc! { "ping": 1 }).await?;
    Ok(())
}

/// Creates the collection, returning false if it was already there.
#[instrument(skip(db), fields(database = db.name()), err)]
pub async fn create_collection(db: &Database, name: &str) -> Result<bool, mongodb::error::Error> {
    match db.create_collection(name).await {
        Ok(()) => Ok(true),
        Err(e) if command_error_code(&e) == Some(NAMESPACE_EXISTS) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Returns the name the server gave the index.
#[instrument(skip(collection, spec), fields(collection = collection.name(), fields = %spec.field_set()), err)]
pub async fn create_index(
    collection: &Collection<Document>,
    spec: &IndexSpec,
) -> Result<String, mongodb::error::Error> {
    let result = collection.create_index(spec.to_index_model()).await?;
    Ok(result.index_name)
}

#[instrument(skip(collection), fields(collection = collection.name()), err)]
pub async fn list_indexes(
    collection: &Collection<Document>,
) -> Result<Vec<ExistingIndex>, mongodb::error::Error> {
    let cursor = match collection.list_indexes().await {
        Ok(cursor) => cursor,
        Err(e) if command_error_code(&e) == Some(NAMESPACE_NOT_FOUND) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let models: Vec<mongodb::IndexModel> = cursor.try_collect().await?;
    Ok(models.into_iter().map(ExistingIndex::from).collect())
}
