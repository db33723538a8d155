//! Compares declared indexes against a snapshot of a collection's index
//! catalog.
use mongodb::{
    bson::{Bson, Document},
    IndexModel,
};

use crate::schema::{Direction, IndexSpec};

const ID_INDEX_NAME: &str = "_id_";

/// Per-field order as stored in the catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyOrder {
    Direction(Direction),
    /// `text`, `2dsphere`, `hashed`, ...
    Special(String),
}

/// Numeric key values may come back as int32, int64 or double depending on
/// who created the index, only the sign matters.
pub fn normalize_keys(keys: &Document) -> Vec<(String, KeyOrder)> {
    keys.iter()
        .map(|(field, value)| {
            let order = match value {
                Bson::Int32(v) => numeric_order(*v as f64),
                Bson::Int64(v) => numeric_order(*v as f64),
                Bson::Double(v) => numeric_order(*v),
                Bson::String(kind) => KeyOrder::Special(kind.clone()),
                other => KeyOrder::Special(other.to_string()),
            };
            (field.clone(), order)
        })
        .collect()
}

fn numeric_order(value: f64) -> KeyOrder {
    if value < 0.0 {
        KeyOrder::Direction(Direction::Descending)
    } else {
        KeyOrder::Direction(Direction::Ascending)
    }
}

fn declared_keys(spec: &IndexSpec) -> Vec<(String, KeyOrder)> {
    spec.fields
        .iter()
        .map(|field| (field.name.clone(), KeyOrder::Direction(field.direction)))
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExistingIndex {
    pub name: String,
    pub keys: Document,
    pub unique: bool,
    pub sparse: bool,
    pub partial_filter: Option<Document>,
    /// Collation locale, `simple` is stored as none.
    pub collation: Option<String>,
}

impl ExistingIndex {
    pub fn field_set(&self) -> String {
        normalize_keys(&self.keys)
            .into_iter()
            .map(|(field, order)| match order {
                KeyOrder::Direction(direction) => format!("{}: {}", field, direction),
                KeyOrder::Special(kind) => format!("{}: {}", field, kind),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Whether the index covers only part of the collection, or compares
    /// values other than byte for byte. Declared indexes never do.
    pub fn is_scoped(&self) -> bool {
        self.sparse || self.partial_filter.is_some() || self.collation.is_some()
    }

    /// Name, fields and any scope restriction, for error messages.
    pub fn describe(&self) -> String {
        let mut description = format!("{} ({})", self.name, self.field_set());
        if self.sparse {
            description.push_str(" sparse");
        }
        if let Some(filter) = &self.partial_filter {
            description.push_str(&format!(" partial {}", filter));
        }
        if let Some(locale) = &self.collation {
            description.push_str(&format!(" collation {}", locale));
        }
        description
    }

    fn satisfies(&self, spec: &IndexSpec) -> bool {
        self.unique == spec.unique && !self.is_scoped()
    }
}

impl From<IndexModel> for ExistingIndex {
    fn from(model: IndexModel) -> Self {
        let options = model.options.unwrap_or_default();
        ExistingIndex {
            name: options.name.unwrap_or_default(),
            keys: model.keys,
            unique: options.unique.unwrap_or(false),
            sparse: options.sparse.unwrap_or(false),
            partial_filter: options.partial_filter_expression,
            collation: options
                .collation
                .map(|collation| collation.locale)
                .filter(|locale| locale != "simple"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum IndexAction<'a> {
    Create(&'a IndexSpec),
    Existing {
        spec: &'a IndexSpec,
        name: String,
    },
    Conflict {
        spec: &'a IndexSpec,
        existing: ExistingIndex,
    },
}

pub fn classify<'a>(spec: &'a IndexSpec, existing: &[ExistingIndex]) -> IndexAction<'a> {
    let declared = declared_keys(spec);

    let same_keys: Vec<&ExistingIndex> = existing
        .iter()
        .filter(|index| index.name != ID_INDEX_NAME)
        .filter(|index| normalize_keys(&index.keys) == declared)
        .collect();
    // a partial or sparse twin may sit next to a full one
    if let Some(index) = same_keys.iter().find(|index| index.satisfies(spec)) {
        return IndexAction::Existing {
            spec,
            name: index.name.clone(),
        };
    }
    if let Some(index) = same_keys.first() {
        return IndexAction::Conflict {
            spec,
            existing: (*index).clone(),
        };
    }

    // the store refuses to reuse a name for a different key set
    if let Some(name) = &spec.name {
        if let Some(index) = existing.iter().find(|index| &index.name == name) {
            return IndexAction::Conflict {
                spec,
                existing: index.clone(),
            };
        }
    }

    IndexAction::Create(spec)
}

pub fn plan<'a>(
    specs: impl IntoIterator<Item = &'a IndexSpec>,
    existing: &[ExistingIndex],
) -> Vec<IndexAction<'a>> {
    specs
        .into_iter()
        .map(|spec| classify(spec, existing))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::{bson::doc, options::IndexOptions};

    fn existing(name: &str, keys: Document, unique: bool) -> ExistingIndex {
        ExistingIndex {
            name: name.to_string(),
            keys,
            unique,
            ..Default::default()
        }
    }

    fn url_spec() -> IndexSpec {
        IndexSpec::new("news", &[("url", Direction::Ascending)])
            .unique()
            .named("uniq_url")
    }

    #[test]
    fn test_normalize_keys_accepts_any_numeric_type() {
        let keys = doc! { "a": 1, "b": -1_i64, "c": -1.0, "d": 1.0, "e": "text" };
        assert_eq!(
            normalize_keys(&keys),
            vec![
                ("a".to_string(), KeyOrder::Direction(Direction::Ascending)),
                ("b".to_string(), KeyOrder::Direction(Direction::Descending)),
                ("c".to_string(), KeyOrder::Direction(Direction::Descending)),
                ("d".to_string(), KeyOrder::Direction(Direction::Ascending)),
                ("e".to_string(), KeyOrder::Special("text".to_string())),
            ]
        );
    }

    #[test]
    fn test_classify_absent_index_is_created() {
        let spec = url_spec();
        let catalog = vec![existing("_id_", doc! { "_id": 1 }, false)];
        assert_eq!(classify(&spec, &catalog), IndexAction::Create(&spec));
    }

    #[test]
    fn test_classify_matching_index_is_existing_whatever_its_name() {
        let spec = url_spec();
        let catalog = vec![
            existing("_id_", doc! { "_id": 1 }, false),
            existing("url_1", doc! { "url": 1.0 }, true),
        ];
        assert_eq!(
            classify(&spec, &catalog),
            IndexAction::Existing {
                spec: &spec,
                name: "url_1".to_string()
            }
        );
    }

    #[test]
    fn test_classify_uniqueness_mismatch_is_conflict() {
        let spec = url_spec();
        let weaker = existing("url_1", doc! { "url": 1 }, false);
        let catalog = vec![weaker.clone()];
        assert_eq!(
            classify(&spec, &catalog),
            IndexAction::Conflict {
                spec: &spec,
                existing: weaker
            }
        );

        // and the other way around
        let spec = IndexSpec::new("news", &[("source", Direction::Ascending)]);
        let stronger = existing("source_1", doc! { "source": 1 }, true);
        assert!(matches!(
            classify(&spec, &[stronger]),
            IndexAction::Conflict { .. }
        ));
    }

    #[test]
    fn test_classify_field_order_matters() {
        let spec = IndexSpec::new(
            "news",
            &[
                ("source", Direction::Ascending),
                ("published_time", Direction::Descending),
            ],
        );
        let reversed = existing(
            "published_time_-1_source_1",
            doc! { "published_time": -1, "source": 1 },
            false,
        );
        assert_eq!(classify(&spec, &[reversed]), IndexAction::Create(&spec));

        let flipped = existing(
            "source_1_published_time_1",
            doc! { "source": 1, "published_time": 1 },
            false,
        );
        assert_eq!(classify(&spec, &[flipped]), IndexAction::Create(&spec));
    }

    #[test]
    fn test_classify_name_taken_by_other_keys_is_conflict() {
        let spec = url_spec();
        let squatter = existing("uniq_url", doc! { "link": 1 }, true);
        assert_eq!(
            classify(&spec, &[squatter.clone()]),
            IndexAction::Conflict {
                spec: &spec,
                existing: squatter
            }
        );
    }

    #[test]
    fn test_plan_keeps_declaration_order() {
        let specs = vec![
            url_spec(),
            IndexSpec::new("news", &[("source", Direction::Ascending)]).named("idx_source"),
        ];
        let catalog = vec![existing("idx_source", doc! { "source": 1 }, false)];
        let actions = plan(&specs, &catalog);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0], IndexAction::Create(&specs[0]));
        assert_eq!(
            actions[1],
            IndexAction::Existing {
                spec: &specs[1],
                name: "idx_source".to_string()
            }
        );
    }

    #[test]
    fn test_classify_partial_or_sparse_unique_index_is_conflict() {
        let spec = url_spec();
        let model = IndexModel::builder()
            .keys(doc! { "url": 1 })
            .options(
                IndexOptions::builder()
                    .name("url_1".to_string())
                    .unique(true)
                    .partial_filter_expression(doc! { "source": "coindesk" })
                    .build(),
            )
            .build();
        let partial = ExistingIndex::from(model);
        assert_eq!(
            classify(&spec, &[partial.clone()]),
            IndexAction::Conflict {
                spec: &spec,
                existing: partial
            }
        );

        let spec = IndexSpec::new("bulletin", &[("bulletin_id", Direction::Ascending)])
            .unique()
            .named("uniq_bulletin_id");
        let model = IndexModel::builder()
            .keys(doc! { "bulletin_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("bulletin_id_1".to_string())
                    .unique(true)
                    .sparse(true)
                    .build(),
            )
            .build();
        let sparse = ExistingIndex::from(model);
        assert!(sparse.is_scoped());
        assert_eq!(sparse.describe(), "bulletin_id_1 (bulletin_id: asc) sparse");
        assert!(matches!(
            classify(&spec, &[sparse]),
            IndexAction::Conflict { .. }
        ));
    }

    #[test]
    fn test_classify_collated_index_is_conflict() {
        let spec = url_spec();
        let collated = ExistingIndex {
            collation: Some("en".to_string()),
            ..existing("url_1", doc! { "url": 1 }, true)
        };
        assert!(matches!(
            classify(&spec, &[collated]),
            IndexAction::Conflict { .. }
        ));
    }

    #[test]
    fn test_classify_checks_every_index_on_the_same_keys() {
        let spec = url_spec();
        let partial = ExistingIndex {
            partial_filter: Some(doc! { "source": "coindesk" }),
            ..existing("url_coindesk", doc! { "url": 1 }, true)
        };
        let full = existing("url_1", doc! { "url": 1 }, true);

        // the full index is found even behind a partial twin
        assert_eq!(
            classify(&spec, &[partial.clone(), full.clone()]),
            IndexAction::Existing {
                spec: &spec,
                name: "url_1".to_string()
            }
        );
        assert_eq!(
            classify(&spec, &[full, partial.clone()]),
            IndexAction::Existing {
                spec: &spec,
                name: "url_1".to_string()
            }
        );

        // with only weaker twins the first one is reported
        let weaker = existing("url_plain", doc! { "url": 1 }, false);
        assert_eq!(
            classify(&spec, &[partial.clone(), weaker]),
            IndexAction::Conflict {
                spec: &spec,
                existing: partial
            }
        );
    }

    #[test]
    fn test_existing_index_from_model() {
        let model = IndexModel::builder()
            .keys(doc! { "bulletin_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("uniq_bulletin_id".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        let index = ExistingIndex::from(model);
        assert_eq!(index.name, "uniq_bulletin_id");
        assert!(index.unique);
        assert_eq!(index.field_set(), "bulletin_id: asc");

        let model = IndexModel::builder().keys(doc! { "created_at": -1 }).build();
        let index = ExistingIndex::from(model);
        assert!(!index.unique);
        assert!(!index.is_scoped());
        assert_eq!(index.field_set(), "created_at: desc");
    }
}
