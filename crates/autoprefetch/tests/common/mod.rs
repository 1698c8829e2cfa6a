//! In-memory storage backend shared by the integration tests.
//!
//! `MemoryDb` holds plain rows per model plus many-to-many link tables.
//! `MemoryLoader` answers relation loads from it the way a SQL backend would
//! (one `IN (...)` style fetch per call), materializes the fetched rows
//! through the session, and counts every call it receives.

#![allow(dead_code)]

use autoprefetch::prelude::*;
use autoprefetch::{RelationShape, StorageError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// ============================================================================
// Schema
// ============================================================================

/// Models used across the integration tests.
///
/// - `book.author` / `author.books`: foreign key
/// - `book.editor` / `author.edited_books`: nullable foreign key
/// - `restaurant.place` / `place.restaurant`: one-to-one
/// - `club.members` / `person.club_set`: many-to-many
/// - `node.parent` / `node.children`: self-referential foreign key
/// - `note.author`: on a model without peer groups
/// - `review.book`: plain field that never batches
pub fn registry() -> Arc<Registry> {
    let registry = Registry::builder()
        .model(ModelDef::new("author"))
        .model(
            ModelDef::new("book")
                .field(RelationField::foreign_key("author", "author").related_name("books"))
                .field(RelationField::foreign_key("editor", "author").related_name("edited_books")),
        )
        .model(ModelDef::new("place"))
        .model(ModelDef::new("restaurant").field(RelationField::one_to_one("place", "place")))
        .model(ModelDef::new("person"))
        .model(ModelDef::new("club").field(RelationField::many_to_many("members", "person")))
        .model(
            ModelDef::new("node")
                .field(RelationField::foreign_key("parent", "node").related_name("children")),
        )
        .model(
            ModelDef::new("note")
                .peer_groups(false)
                .field(RelationField::foreign_key("author", "author").related_name("notes")),
        )
        .model(
            ModelDef::new("review").field(
                RelationField::foreign_key("book", "book")
                    .related_name("reviews")
                    .prefetch(false),
            ),
        )
        .build()
        .expect("test registry is valid");
    Arc::new(registry)
}

pub fn session() -> Session {
    Session::new(registry())
}

// ============================================================================
// Storage
// ============================================================================

/// One stored row.
#[derive(Debug, Clone)]
pub struct Row {
    pub pk: i64,
    pub fields: Vec<(String, Value)>,
}

impl Row {
    pub fn int(&self, column: &str) -> Option<i64> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, value)| value.as_i64())
    }

    pub fn to_record(&self, model: &str) -> Record {
        self.fields
            .iter()
            .fold(Record::new(model, self.pk), |record, (column, value)| {
                record.with(column.clone(), value.clone())
            })
    }
}

#[derive(Debug, Default)]
pub struct MemoryDb {
    tables: HashMap<String, Vec<Row>>,
    links: HashMap<String, Vec<(i64, i64)>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: &str, pk: i64, fields: &[(&str, Value)]) {
        self.tables.entry(model.to_string()).or_default().push(Row {
            pk,
            fields: fields
                .iter()
                .map(|(name, value)| ((*name).to_string(), value.clone()))
                .collect(),
        });
    }

    /// Add a link table entry `(owner, target)`.
    pub fn link(&mut self, through: &str, owner: i64, target: i64) {
        self.links
            .entry(through.to_string())
            .or_default()
            .push((owner, target));
    }

    pub fn rows(&self, model: &str) -> &[Row] {
        self.tables.get(model).map(Vec::as_slice).unwrap_or_default()
    }

    /// All rows of `model` as fresh records, in storage order.
    pub fn select(&self, model: &str) -> Vec<Record> {
        self.rows(model).iter().map(|row| row.to_record(model)).collect()
    }

    /// Rows of `model` with the given primary keys, as fresh records.
    pub fn select_pks(&self, model: &str, pks: &[i64]) -> Vec<Record> {
        self.rows(model)
            .iter()
            .filter(|row| pks.contains(&row.pk))
            .map(|row| row.to_record(model))
            .collect()
    }

    pub fn links(&self, through: &str) -> &[(i64, i64)] {
        self.links.get(through).map(Vec::as_slice).unwrap_or_default()
    }

    /// Fetch the matching rows of `model` and materialize them as one
    /// result set.
    fn fetch<F>(
        &self,
        session: &mut Session,
        model: &str,
        matches: F,
    ) -> Result<Vec<(Row, RecordId)>>
    where
        F: Fn(&Row) -> bool,
    {
        let rows: Vec<Row> = self
            .rows(model)
            .iter()
            .filter(|row| matches(*row))
            .cloned()
            .collect();
        let ids = session.materialize(rows.iter().map(|row| row.to_record(model)))?;
        Ok(rows.into_iter().zip(ids).collect())
    }
}

/// The data set most tests run against.
///
/// - authors 1..=3; books 1..=6 with author `(pk - 1) % 3 + 1`, book 1
///   edited by author 2
/// - places 1..=3; restaurants 1 and 2 on places 1 and 2
/// - persons 1..=4; club 1 has persons 1 and 2, club 2 has persons 2 and 3
/// - nodes: 1 is the root, 2 and 3 are its children, 4 is a child of 2
/// - notes 1 and 2 by author 1; reviews 1 and 2 of book 1, review 3 of book 2
pub fn seeded_db() -> MemoryDb {
    let mut db = MemoryDb::new();
    for pk in 1..=3 {
        db.insert("author", pk, &[]);
    }
    for pk in 1..=6 {
        let editor = if pk == 1 { Value::BigInt(2) } else { Value::Null };
        db.insert(
            "book",
            pk,
            &[("author_id", Value::BigInt((pk - 1) % 3 + 1)), ("editor_id", editor)],
        );
    }
    for pk in 1..=3 {
        db.insert("place", pk, &[]);
    }
    db.insert("restaurant", 1, &[("place_id", Value::BigInt(1))]);
    db.insert("restaurant", 2, &[("place_id", Value::BigInt(2))]);
    for pk in 1..=4 {
        db.insert("person", pk, &[]);
    }
    db.insert("club", 1, &[]);
    db.insert("club", 2, &[]);
    db.link("club_members", 1, 1);
    db.link("club_members", 1, 2);
    db.link("club_members", 2, 2);
    db.link("club_members", 2, 3);
    db.insert("node", 1, &[("parent_id", Value::Null)]);
    db.insert("node", 2, &[("parent_id", Value::BigInt(1))]);
    db.insert("node", 3, &[("parent_id", Value::BigInt(1))]);
    db.insert("node", 4, &[("parent_id", Value::BigInt(2))]);
    db.insert("note", 1, &[("author_id", Value::BigInt(1))]);
    db.insert("note", 2, &[("author_id", Value::BigInt(1))]);
    db.insert("review", 1, &[("book_id", Value::BigInt(1))]);
    db.insert("review", 2, &[("book_id", Value::BigInt(1))]);
    db.insert("review", 3, &[("book_id", Value::BigInt(2))]);
    db
}

// ============================================================================
// Loader
// ============================================================================

/// Relation loader over a [`MemoryDb`] that records every call.
pub struct MemoryLoader {
    pub db: MemoryDb,
    /// `model.relation` of every individual load, in order
    pub single_calls: Vec<String>,
    /// `(model.relation, records)` of every batched load, in order
    pub batch_calls: Vec<(String, Vec<RecordId>)>,
    /// Number of upcoming batch loads that fail before fetching anything
    pub fail_batches: usize,
    /// Panic inside the next batch load
    pub panic_on_batch: bool,
    /// During the next batch, read the same relation on the second record
    pub reenter_sibling: bool,
    /// What the sibling saw: (lock held at the time, result of the read)
    pub reentrant: Option<(bool, Result<Related>)>,
}

impl MemoryLoader {
    pub fn new(db: MemoryDb) -> Self {
        Self {
            db,
            single_calls: Vec::new(),
            batch_calls: Vec::new(),
            fail_batches: 0,
            panic_on_batch: false,
            reenter_sibling: false,
            reentrant: None,
        }
    }

    pub fn seeded() -> Self {
        Self::new(seeded_db())
    }

    /// Total number of loader calls of either kind.
    pub fn calls(&self) -> usize {
        self.single_calls.len() + self.batch_calls.len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_calls.iter().map(|(_, records)| records.len()).collect()
    }

    pub fn reset_counts(&mut self) {
        self.single_calls.clear();
        self.batch_calls.clear();
    }

    fn resolve(
        &self,
        session: &mut Session,
        relation: &RelationInfo,
        records: &[RecordId],
    ) -> Result<()> {
        let mut keyed = Vec::with_capacity(records.len());
        for id in records {
            let record = session.record(*id)?;
            let pk = record.pk().as_i64();
            let local = record.field(&relation.column).as_i64();
            keyed.push((*id, pk, local));
        }

        match relation.shape {
            RelationShape::ForwardManyToOne | RelationShape::ForwardOneToOne => {
                let wanted: HashSet<i64> = keyed.iter().filter_map(|(_, _, local)| *local).collect();
                let fetched = self.db.fetch(session, &relation.related_model, |row| {
                    wanted.contains(&row.pk)
                })?;
                for (id, _, local) in keyed {
                    let target = local.and_then(|key| {
                        fetched
                            .iter()
                            .find(|(row, _)| row.pk == key)
                            .map(|(_, rid)| *rid)
                    });
                    session.fill_cache(id, relation, Loaded::One(target))?;
                }
            }
            RelationShape::ReverseOneToOne | RelationShape::ReverseManyToOne => {
                let owners: HashSet<i64> = keyed.iter().filter_map(|(_, pk, _)| *pk).collect();
                let fetched = self.db.fetch(session, &relation.related_model, |row| {
                    row.int(&relation.column).is_some_and(|key| owners.contains(&key))
                })?;
                for (id, pk, _) in keyed {
                    let related: Vec<RecordId> = fetched
                        .iter()
                        .filter(|(row, _)| pk.is_some() && row.int(&relation.column) == pk)
                        .map(|(_, rid)| *rid)
                        .collect();
                    let value = if relation.is_collection() {
                        Loaded::Many(related)
                    } else {
                        Loaded::One(related.first().copied())
                    };
                    session.fill_cache(id, relation, value)?;
                }
            }
            RelationShape::ForwardManyToMany | RelationShape::ReverseManyToMany => {
                let through = relation.through.as_deref().unwrap_or_default();
                let forward = relation.shape == RelationShape::ForwardManyToMany;
                let links: Vec<(i64, i64)> = self
                    .db
                    .links(through)
                    .iter()
                    .map(|&(owner, target)| if forward { (owner, target) } else { (target, owner) })
                    .collect();
                let keys: HashSet<i64> = keyed.iter().filter_map(|(_, pk, _)| *pk).collect();
                let wanted: HashSet<i64> = links
                    .iter()
                    .filter(|(from, _)| keys.contains(from))
                    .map(|(_, to)| *to)
                    .collect();
                let fetched = self.db.fetch(session, &relation.related_model, |row| {
                    wanted.contains(&row.pk)
                })?;
                for (id, pk, _) in keyed {
                    let related = links
                        .iter()
                        .filter(|(from, _)| Some(*from) == pk)
                        .filter_map(|(_, to)| {
                            fetched.iter().find(|(row, _)| row.pk == *to).map(|(_, rid)| *rid)
                        })
                        .collect();
                    session.fill_cache(id, relation, Loaded::Many(related))?;
                }
            }
        }
        Ok(())
    }
}

impl RelationLoader for MemoryLoader {
    fn load_one(
        &mut self,
        session: &mut Session,
        relation: &RelationInfo,
        record: RecordId,
    ) -> Result<()> {
        self.single_calls.push(relation.qualified_name());
        self.resolve(session, relation, &[record])
    }

    fn load_batch(
        &mut self,
        session: &mut Session,
        relation: &RelationInfo,
        records: &[RecordId],
    ) -> Result<()> {
        self.batch_calls
            .push((relation.qualified_name(), records.to_vec()));

        if self.fail_batches > 0 {
            self.fail_batches -= 1;
            return Err(StorageError::new("connection reset by peer").into());
        }
        if self.panic_on_batch {
            self.panic_on_batch = false;
            panic!("storage driver crashed");
        }
        if self.reenter_sibling && records.len() >= 2 {
            self.reenter_sibling = false;
            let sibling = records[1];
            let locked = session.is_prefetching(sibling, &relation.name)?;
            let result = session.get(self, sibling, &relation.name);
            self.reentrant = Some((locked, result));
        }

        self.resolve(session, relation, records)
    }
}
