// Utility for integration tests
use crate::conf::AppConfig;

use mongodb::{
    bson::{doc, Document},
    Database, IndexModel,
};
use tracing::error;

pub const TEST_CONFIG_FILE: &str = "tests/config.test.yaml";

/// A database named after the configured one plus a random suffix, so tests
/// can run in parallel. Drop it with [`drop_test_database`] when done.
pub async fn fresh_test_database() -> (AppConfig, Database) {
    let mut config = AppConfig::from_path(TEST_CONFIG_FILE).expect("could not load test config");
    config.database.name = format!(
        "{}_{}",
        config.database.name,
        uuid::Uuid::new_v4().simple()
    );
    let db = config.build_db().await.expect("could not build test db");
    (config, db)
}

pub async fn drop_test_database(db: &Database) {
    if let Err(e) = db.drop().await {
        error!("error dropping test database {}: {}", db.name(), e);
    }
}

/// Index catalog of a collection as the server lists it.
pub async fn index_catalog(db: &Database, collection: &str) -> Vec<IndexModel> {
    use futures::TryStreamExt;

    db.collection::<Document>(collection)
        .list_indexes()
        .await
        .expect("could not list indexes")
        .try_collect()
        .await
        .expect("could not read index cursor")
}

pub fn find_index<'a>(catalog: &'a [IndexModel], name: &str) -> Option<&'a IndexModel> {
    catalog.iter().find(|model| {
        model
            .options
            .as_ref()
            .and_then(|options| options.name.as_deref())
            == Some(name)
    })
}

pub async fn create_plain_index(db: &Database, collection: &str, keys: Document) {
    db.collection::<Document>(collection)
        .create_index(IndexModel::builder().keys(keys).build())
        .await
        .expect("could not create index");
}

pub fn news_article(url: &str) -> Document {
    doc! {
        "url": url,
        "title": "Bitcoin climbs past resistance",
        "source": "coindesk",
        "published_time": "2025-01-01T00:00:00Z",
    }
}
