//! # ShelfDB
//!
//! An embedded, schema-less document store written in Rust.
//!
//! A database is a directory. Each table is a sequence of records (maps from
//! field names to dynamically typed values) kept in memory and persisted to
//! one file per table. Every write replaces that file atomically, so a crash
//! leaves either the old or the new version on disk, never a mix. Queries use
//! a small `field__operator` grammar.
//!
//! ## Quick Start
//!
//! ```no_run
//! use shelfdb_core::api::ShelfDB;
//! use shelfdb_core::record::Record;
//! use serde_json::json;
//!
//! // Create or open a database directory
//! let db = ShelfDB::open("my_data").unwrap();
//!
//! // Insert records; ids are assigned automatically
//! let id = db.add("users", json!({"name": "Alice Savage", "age": 30}))
//!     .execute()
//!     .unwrap();
//! assert_eq!(id, 1);
//!
//! // Reject records with a validator
//! let rejected = db.add("users", json!({"name": "Kid", "age": 9}))
//!     .validator(|r: &Record| match r["age"].as_i64() {
//!         Some(age) if age >= 18 => Ok(()),
//!         _ => Err("must be an adult".to_string()),
//!     })
//!     .execute();
//! assert!(rejected.is_err());
//!
//! // Query with field__operator filters
//! let adults = db.find("users")
//!     .filter("age__gt", 21)
//!     .filter("name__contains", "Savage")
//!     .execute()
//!     .unwrap();
//! for record in &adults {
//!     println!("{}", record.unwrap().to_json());
//! }
//!
//! // Update and delete return the number of records affected
//! let n = db.update("users")
//!     .filter("name", "Alice Savage")
//!     .set("status", "idle")
//!     .execute()
//!     .unwrap();
//! assert_eq!(n, 1);
//! db.delete("users").filter("status", "idle").execute().unwrap();
//! ```

pub mod api;
pub mod error;
pub mod record;
pub mod storage;
pub mod types;
pub mod value;
