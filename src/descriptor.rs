//! Table descriptors: the immutable, pre-built schema + accessor metadata
//! the core consumes, in place of reflection or a derive macro. The core
//! never introspects a concrete record type; every read/write of a field
//! goes through the `get`/`set` closures a [`ColumnDescriptor`] carries.

use crate::value::SqlValue;
use std::any::Any;
use std::fmt;

/// Marker trait for types the ORM can persist. Intentionally empty: the
/// core only ever touches instances through `&dyn Record` / `&mut dyn
/// Record`, downcast inside the closures a descriptor builder produced.
pub trait Record: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> Record for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// One of the storage classes SQLite columns declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Integer,
    Real,
    Text,
    Blob,
    /// A column with no declared affinity; SQLite accepts any storage class.
    NullOnly,
}

impl StorageType {
    #[must_use]
    pub const fn sql_keyword(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
            Self::NullOnly => "",
        }
    }
}

/// Per-column participation in an index.
#[derive(Debug, Clone)]
pub struct IndexParticipation {
    pub index_name: Option<String>,
    pub order: u32,
    pub unique: bool,
}

/// A single mapped column. `get`/`set` are the escape hatch that lets the
/// core stay generic over record types.
pub struct ColumnDescriptor {
    pub name: String,
    pub storage_type: StorageType,
    pub is_primary_key: bool,
    pub is_auto_increment: bool,
    pub is_nullable: bool,
    pub is_unique: bool,
    pub collation: Option<String>,
    pub default_expression: Option<String>,
    pub max_length: Option<u32>,
    pub indices: Vec<IndexParticipation>,
    pub get: Box<dyn Fn(&dyn Record) -> SqlValue + Send + Sync>,
    pub set: Box<dyn Fn(&mut dyn Record, SqlValue) + Send + Sync>,
}

impl fmt::Debug for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDescriptor")
            .field("name", &self.name)
            .field("storage_type", &self.storage_type)
            .field("is_primary_key", &self.is_primary_key)
            .field("is_auto_increment", &self.is_auto_increment)
            .field("is_nullable", &self.is_nullable)
            .field("is_unique", &self.is_unique)
            .finish_non_exhaustive()
    }
}

impl ColumnDescriptor {
    /// Render the column's `CREATE TABLE`/`ALTER TABLE ADD COLUMN`
    /// declaration fragment.
    #[must_use]
    pub fn sql_declaration(&self) -> String {
        let mut decl = format!(
            "\"{}\" {}",
            self.name,
            self.storage_type.sql_keyword()
        );
        if self.is_primary_key {
            decl.push_str(" PRIMARY KEY");
            if self.is_auto_increment {
                decl.push_str(" AUTOINCREMENT");
            }
        }
        if !self.is_nullable {
            decl.push_str(" NOT NULL");
        }
        if self.is_unique && !self.is_primary_key {
            decl.push_str(" UNIQUE");
        }
        if let Some(collation) = &self.collation {
            decl.push_str(&format!(" COLLATE {collation}"));
        }
        if let Some(default) = &self.default_expression {
            decl.push_str(&format!(" DEFAULT {default}"));
        }
        decl
    }
}

/// A named multi-column index, resolved by the schema mapper.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// A many-to-many relationship hook. The core treats `write_children` as an
/// opaque callback — child-table semantics are out of scope for the ORM
/// runtime itself.
pub trait RelationSpec: Send + Sync {
    /// Persist this relation's child rows for `record` after an
    /// insert/update/upsert has completed.
    fn write_children(&self, conn: &rusqlite::Connection, record: &dyn Record) -> crate::error::Result<()>;
}

/// An immutable description of a table schema and how to read/write
/// instances of the record type it maps.
pub struct TableDescriptor {
    pub table_name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub indices: Vec<IndexSpec>,
    pub relations: Vec<Box<dyn RelationSpec>>,
    pub primary_key_index: Option<usize>,
    pub has_auto_inc_pk: bool,
}

impl fmt::Debug for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDescriptor")
            .field("table_name", &self.table_name)
            .field("columns", &self.columns)
            .field("indices", &self.indices)
            .field("primary_key_index", &self.primary_key_index)
            .field("has_auto_inc_pk", &self.has_auto_inc_pk)
            .finish_non_exhaustive()
    }
}

impl TableDescriptor {
    /// The primary key column, if one was declared.
    #[must_use]
    pub fn primary_key(&self) -> Option<&ColumnDescriptor> {
        self.primary_key_index.and_then(|i| self.columns.get(i))
    }

    /// All columns except an auto-increment primary key.
    #[must_use]
    pub fn insert_columns(&self) -> Vec<&ColumnDescriptor> {
        self.columns
            .iter()
            .filter(|c| !c.is_auto_increment)
            .collect()
    }

    /// All non-primary-key columns.
    #[must_use]
    pub fn non_pk_columns(&self) -> Vec<&ColumnDescriptor> {
        self.columns.iter().filter(|c| !c.is_primary_key).collect()
    }

    /// Validate the invariant: at most one auto-increment primary key,
    /// whose storage type is 64-bit integer.
    pub fn validate(&self) -> crate::error::Result<()> {
        let autoinc: Vec<&ColumnDescriptor> = self
            .columns
            .iter()
            .filter(|c| c.is_auto_increment)
            .collect();
        if autoinc.len() > 1 {
            return Err(crate::error::OrmError::Schema(format!(
                "table {} declares more than one auto-increment column",
                self.table_name
            )));
        }
        if let Some(col) = autoinc.first() {
            if !col.is_primary_key {
                return Err(crate::error::OrmError::Schema(format!(
                    "table {}: auto-increment column {} is not the primary key",
                    self.table_name, col.name
                )));
            }
            if col.storage_type != StorageType::Integer {
                return Err(crate::error::OrmError::Schema(format!(
                    "table {}: auto-increment primary key {} must be INTEGER",
                    self.table_name, col.name
                )));
            }
        }
        Ok(())
    }
}

pub mod builder {
    //! A fluent builder for hand-assembling a [`TableDescriptor`] without a
    //! derive macro. Purely additive sugar — the core never depends on this
    //! module.

    use super::{ColumnDescriptor, IndexParticipation, RelationSpec, Record, StorageType, TableDescriptor};
    use crate::value::SqlValue;

    pub struct TableDescriptorBuilder {
        table_name: String,
        columns: Vec<ColumnDescriptor>,
        relations: Vec<Box<dyn RelationSpec>>,
    }

    impl TableDescriptorBuilder {
        #[must_use]
        pub fn new(table_name: impl Into<String>) -> Self {
            Self {
                table_name: table_name.into(),
                columns: Vec::new(),
                relations: Vec::new(),
            }
        }

        #[must_use]
        pub fn column(mut self, column: ColumnSpec) -> Self {
            self.columns.push(ColumnDescriptor {
                name: column.name,
                storage_type: column.storage_type,
                is_primary_key: column.is_primary_key,
                is_auto_increment: column.is_auto_increment,
                is_nullable: column.is_nullable,
                is_unique: column.is_unique,
                collation: column.collation,
                default_expression: column.default_expression,
                max_length: column.max_length,
                indices: column.indices,
                get: column.get,
                set: column.set,
            });
            self
        }

        #[must_use]
        pub fn relation(mut self, relation: Box<dyn RelationSpec>) -> Self {
            self.relations.push(relation);
            self
        }

        /// Finalize into an immutable [`TableDescriptor`], validating the
        /// single-auto-increment-pk invariant along the way.
        ///
        /// `indices` is left empty here: the schema mapper resolves
        /// `IndexSpec`s from each column's `indices` participation list at
        /// `CREATE TABLE` time, so this builder doesn't duplicate that
        /// logic.
        pub fn build(self) -> crate::error::Result<TableDescriptor> {
            let primary_key_index = self.columns.iter().position(|c| c.is_primary_key);
            let has_auto_inc_pk = self.columns.iter().any(|c| c.is_auto_increment);
            let descriptor = TableDescriptor {
                table_name: self.table_name,
                columns: self.columns,
                indices: Vec::new(),
                relations: self.relations,
                primary_key_index,
                has_auto_inc_pk,
            };
            descriptor.validate()?;
            Ok(descriptor)
        }
    }

    /// Declarative description of one column, consumed by
    /// [`TableDescriptorBuilder::column`].
    pub struct ColumnSpec {
        pub name: String,
        pub storage_type: StorageType,
        pub is_primary_key: bool,
        pub is_auto_increment: bool,
        pub is_nullable: bool,
        pub is_unique: bool,
        pub collation: Option<String>,
        pub default_expression: Option<String>,
        pub max_length: Option<u32>,
        pub indices: Vec<IndexParticipation>,
        pub get: Box<dyn Fn(&dyn Record) -> SqlValue + Send + Sync>,
        pub set: Box<dyn Fn(&mut dyn Record, SqlValue) + Send + Sync>,
    }

    impl ColumnSpec {
        #[must_use]
        pub fn new<T, F, G>(name: impl Into<String>, storage_type: StorageType, get: F, set: G) -> Self
        where
            T: Record,
            F: Fn(&T) -> SqlValue + Send + Sync + 'static,
            G: Fn(&mut T, SqlValue) + Send + Sync + 'static,
        {
            Self {
                name: name.into(),
                storage_type,
                is_primary_key: false,
                is_auto_increment: false,
                is_nullable: true,
                is_unique: false,
                collation: None,
                default_expression: None,
                max_length: None,
                indices: Vec::new(),
                get: Box::new(move |record| {
                    let typed = record
                        .as_any()
                        .downcast_ref::<T>()
                        .expect("descriptor used against mismatched record type");
                    get(typed)
                }),
                set: Box::new(move |record, value| {
                    let typed = record
                        .as_any_mut()
                        .downcast_mut::<T>()
                        .expect("descriptor used against mismatched record type");
                    set(typed, value);
                }),
            }
        }

        #[must_use]
        pub const fn primary_key(mut self) -> Self {
            self.is_primary_key = true;
            self.is_nullable = false;
            self
        }

        #[must_use]
        pub const fn auto_increment(mut self) -> Self {
            self.is_auto_increment = true;
            self
        }

        #[must_use]
        pub const fn not_null(mut self) -> Self {
            self.is_nullable = false;
            self
        }

        #[must_use]
        pub const fn unique(mut self) -> Self {
            self.is_unique = true;
            self
        }

        #[must_use]
        pub fn default_expression(mut self, expr: impl Into<String>) -> Self {
            self.default_expression = Some(expr.into());
            self
        }

        #[must_use]
        pub fn indexed(mut self, index_name: Option<&str>, order: u32, unique: bool) -> Self {
            self.indices.push(IndexParticipation {
                index_name: index_name.map(str::to_string),
                order,
                unique,
            });
            self
        }
    }
}
