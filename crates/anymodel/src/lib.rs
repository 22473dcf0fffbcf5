//! One model, any backend.
//!
//! `anymodel` is a connection-agnostic data-mapping layer: a [`Model`] binds
//! a table schema (field metadata, declared version, indexes) to a storage
//! backend — in-memory, flat-file JSON, MySQL, or PostgreSQL — and gives the
//! same validated CRUD surface over all of them. A search condition is a
//! backend-independent predicate tree (or a plain equality map) that selects
//! the same logical row set whether it runs as an in-process scan or as
//! generated SQL with bound parameters; `init` reconciles the backend's
//! schema with the declaration via additive, idempotent migration.
//!
//! # Quick start
//!
//! ```no_run
//! use anymodel::prelude::*;
//! use anymodel_memory::MemoryBackend;
//!
//! # async fn demo(cx: &Cx) -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let schema = TableSchema::builder("heroes", 1)
//!     .field(FieldDef::new("name", FieldType::String).required().size(100))
//!     .field(FieldDef::new("secret_identity", FieldType::String).filtered())
//!     .index(IndexDef::new(&["name"]))
//!     .build()?;
//!
//! let model = Model::new(schema, MemoryBackend::new());
//! let _ = model.init(cx).await;
//!
//! let mut hero = Record::new();
//! hero.insert("name".to_string(), Value::Text("arg_a".to_string()));
//! if let Outcome::Ok(id) = model.insert(cx, hero).await {
//!     let _found = model.get(cx, id).await;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The SQL backends live in their own crates (`anymodel-mysql`,
//! `anymodel-postgres`) and plug into the same [`Model`].

pub mod model;
pub mod registry;

pub use model::Model;

/// The common imports.
pub mod prelude {
    pub use crate::Model;
    pub use crate::registry;
    pub use anymodel_core::{
        Backend, Comparator, Cx, Direction, Error, FieldDef, FieldType, Filter, IndexDef, Outcome,
        Record, Result, SearchOptions, TableSchema, Value, Where,
    };
}
