//! Declarative description of the collections and indexes the news database
//! is expected to have.
//!
//! Nothing in here talks to the database: a [`SchemaManifest`] is plain data
//! that [`crate::provision`] reconciles against the live catalog.
use std::collections::HashSet;
use std::fmt;

use mongodb::{
    bson::{Bson, Document},
    options::IndexOptions,
    IndexModel,
};
use serde::{Deserialize, Serialize};

pub const NEWS_COLLECTION: &str = "news";
pub const BULLETIN_COLLECTION: &str = "bulletin";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ManifestError {
    #[error("collection name must not be empty")]
    EmptyCollectionNameError,
    #[error("collection {0} is declared more than once")]
    DuplicateCollectionError(String),
    #[error("index on {collection} targets an undeclared collection")]
    UnknownCollectionError { collection: String },
    #[error("index on {collection} has no fields")]
    EmptyIndexError { collection: String },
    #[error("index on {collection} ({fields}) repeats field {field}")]
    RepeatedFieldError {
        collection: String,
        fields: String,
        field: String,
    },
    #[error("more than one index on {collection} covers ({fields})")]
    DuplicateIndexError { collection: String, fields: String },
    #[error("more than one index on {collection} is named {name}")]
    DuplicateIndexNameError { collection: String, name: String },
}

/// Sort order of a single indexed field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "asc")]
    Ascending,
    #[serde(alias = "desc")]
    Descending,
}

impl Direction {
    pub fn as_i32(&self) -> i32 {
        match self {
            Direction::Ascending => 1,
            Direction::Descending => -1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ascending => write!(f, "asc"),
            Direction::Descending => write!(f, "desc"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexField {
    pub name: String,
    pub direction: Direction,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
}

impl CollectionSpec {
    pub fn new(name: &str) -> Self {
        CollectionSpec {
            name: name.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub collection: String,
    pub fields: Vec<IndexField>,
    pub unique: bool,
    pub name: Option<String>,
}

impl IndexSpec {
    pub fn new(collection: &str, fields: &[(&str, Direction)]) -> Self {
        IndexSpec {
            collection: collection.to_string(),
            fields: fields
                .iter()
                .map(|(name, direction)| IndexField {
                    name: name.to_string(),
                    direction: *direction,
                })
                .collect(),
            unique: false,
            name: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// The key document handed to `createIndexes`, in declaration order.
    pub fn keys(&self) -> Document {
        let mut keys = Document::new();
        for field in &self.fields {
            keys.insert(field.name.clone(), Bson::Int32(field.direction.as_i32()));
        }
        keys
    }

    /// Human readable ordered field set, e.g. `source: asc, published_time: desc`.
    pub fn field_set(&self) -> String {
        self.fields
            .iter()
            .map(|field| format!("{}: {}", field.name, field.direction))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn to_index_model(&self) -> IndexModel {
        IndexModel::builder()
            .keys(self.keys())
            .options(
                IndexOptions::builder()
                    .unique(self.unique.then_some(true))
                    .name(self.name.clone())
                    .build(),
            )
            .build()
    }
}

/// The full set of collections and indexes to provision.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaManifest {
    pub collections: Vec<CollectionSpec>,
    pub indexes: Vec<IndexSpec>,
}

impl SchemaManifest {
    /// Articles live in `news` (one document per url), generated summaries
    /// live in `bulletin` (one document per bulletin_id).
    pub fn crypto_news(news: &str, bulletin: &str) -> Self {
        use Direction::{Ascending, Descending};

        SchemaManifest {
            collections: vec![CollectionSpec::new(news), CollectionSpec::new(bulletin)],
            indexes: vec![
                IndexSpec::new(news, &[("url", Ascending)])
                    .unique()
                    .named("uniq_url"),
                IndexSpec::new(news, &[("source", Ascending)]).named("idx_source"),
                IndexSpec::new(news, &[("published_time", Descending)])
                    .named("idx_published_time_desc"),
                IndexSpec::new(news, &[("source", Ascending), ("published_time", Descending)])
                    .named("idx_source_pubtime"),
                IndexSpec::new(bulletin, &[("bulletin_id", Ascending)])
                    .unique()
                    .named("uniq_bulletin_id"),
                IndexSpec::new(bulletin, &[("created_at", Descending)])
                    .named("idx_created_at_desc"),
            ],
        }
    }

    pub fn indexes_for<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = &'a IndexSpec> {
        self.indexes
            .iter()
            .filter(move |index| index.collection == collection)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut collections = HashSet::new();
        for collection in &self.collections {
            if collection.name.is_empty() {
                return Err(ManifestError::EmptyCollectionNameError);
            }
            if !collections.insert(collection.name.as_str()) {
                return Err(ManifestError::DuplicateCollectionError(
                    collection.name.clone(),
                ));
            }
        }

        let mut field_sets = HashSet::new();
        let mut names = HashSet::new();
        for index in &self.indexes {
            if !collections.contains(index.collection.as_str()) {
                return Err(ManifestError::UnknownCollectionError {
                    collection: index.collection.clone(),
                });
            }
            if index.fields.is_empty() {
                return Err(ManifestError::EmptyIndexError {
                    collection: index.collection.clone(),
                });
            }

            let mut seen = HashSet::new();
            for field in &index.fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(ManifestError::RepeatedFieldError {
                        collection: index.collection.clone(),
                        fields: index.field_set(),
                        field: field.name.clone(),
                    });
                }
            }

            if !field_sets.insert((index.collection.as_str(), &index.fields)) {
                return Err(ManifestError::DuplicateIndexError {
                    collection: index.collection.clone(),
                    fields: index.field_set(),
                });
            }

            if let Some(name) = &index.name {
                if !names.insert((index.collection.as_str(), name.as_str())) {
                    return Err(ManifestError::DuplicateIndexNameError {
                        collection: index.collection.clone(),
                        name: name.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_news_manifest_is_valid() {
        let manifest = SchemaManifest::crypto_news(NEWS_COLLECTION, BULLETIN_COLLECTION);
        assert_eq!(manifest.collections.len(), 2);
        assert_eq!(manifest.indexes.len(), 6);
        assert_eq!(manifest.indexes_for(NEWS_COLLECTION).count(), 4);
        assert_eq!(manifest.indexes_for(BULLETIN_COLLECTION).count(), 2);
        assert!(manifest.validate().is_ok());

        let unique: Vec<_> = manifest
            .indexes
            .iter()
            .filter(|index| index.unique)
            .map(|index| index.field_set())
            .collect();
        assert_eq!(unique, vec!["url: asc", "bulletin_id: asc"]);
    }

    #[test]
    fn test_keys_preserve_declared_order() {
        let spec = IndexSpec::new(
            "news",
            &[
                ("source", Direction::Ascending),
                ("published_time", Direction::Descending),
            ],
        );
        let keys: Vec<(String, Bson)> = spec.keys().into_iter().collect();
        assert_eq!(
            keys,
            vec![
                ("source".to_string(), Bson::Int32(1)),
                ("published_time".to_string(), Bson::Int32(-1)),
            ]
        );
        assert_eq!(spec.field_set(), "source: asc, published_time: desc");
    }

    #[test]
    fn test_index_model_options() {
        let model = IndexSpec::new("news", &[("url", Direction::Ascending)])
            .unique()
            .named("uniq_url")
            .to_index_model();
        let options = model.options.unwrap();
        assert_eq!(options.unique, Some(true));
        assert_eq!(options.name.as_deref(), Some("uniq_url"));

        let model = IndexSpec::new("news", &[("source", Direction::Ascending)]).to_index_model();
        let options = model.options.unwrap();
        assert_eq!(options.unique, None);
        assert_eq!(options.name, None);
    }

    #[test]
    fn test_direction_deserialize_aliases() {
        #[derive(Deserialize)]
        struct Wrapper {
            direction: Direction,
        }
        for (raw, expected) in [
            ("asc", Direction::Ascending),
            ("ascending", Direction::Ascending),
            ("desc", Direction::Descending),
            ("descending", Direction::Descending),
        ] {
            let doc = mongodb::bson::doc! { "direction": raw };
            let wrapper: Wrapper = mongodb::bson::from_document(doc).unwrap();
            assert_eq!(wrapper.direction, expected);
        }
    }

    #[test]
    fn test_validate_rejects_duplicate_field_set() {
        let mut manifest = SchemaManifest::crypto_news("news", "bulletin");
        // same fields as uniq_url, only the uniqueness differs
        manifest
            .indexes
            .push(IndexSpec::new("news", &[("url", Direction::Ascending)]));
        assert_eq!(
            manifest.validate(),
            Err(ManifestError::DuplicateIndexError {
                collection: "news".to_string(),
                fields: "url: asc".to_string(),
            })
        );
    }

    #[test]
    fn test_validate_allows_same_fields_in_other_order() {
        let mut manifest = SchemaManifest::crypto_news("news", "bulletin");
        manifest.indexes.push(IndexSpec::new(
            "news",
            &[
                ("published_time", Direction::Descending),
                ("source", Direction::Ascending),
            ],
        ));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_declarations() {
        let mut manifest = SchemaManifest::crypto_news("news", "bulletin");
        manifest
            .indexes
            .push(IndexSpec::new("comments", &[("url", Direction::Ascending)]));
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::UnknownCollectionError { .. })
        ));

        let mut manifest = SchemaManifest::crypto_news("news", "bulletin");
        manifest.indexes.push(IndexSpec::new("news", &[]));
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::EmptyIndexError { .. })
        ));

        let mut manifest = SchemaManifest::crypto_news("news", "bulletin");
        manifest.indexes.push(IndexSpec::new(
            "news",
            &[("author", Direction::Ascending), ("author", Direction::Descending)],
        ));
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::RepeatedFieldError { .. })
        ));

        let mut manifest = SchemaManifest::crypto_news("news", "bulletin");
        manifest.indexes.push(
            IndexSpec::new("news", &[("author", Direction::Ascending)]).named("idx_source"),
        );
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::DuplicateIndexNameError { .. })
        ));

        let manifest = SchemaManifest::crypto_news("news", "news");
        assert_eq!(
            manifest.validate(),
            Err(ManifestError::DuplicateCollectionError("news".to_string()))
        );

        let manifest = SchemaManifest::crypto_news("", "bulletin");
        assert_eq!(
            manifest.validate(),
            Err(ManifestError::EmptyCollectionNameError)
        );
    }
}
