//! Test fixtures and store helpers.
//!
//! The bookstore schema mirrors the catalog the store was built for:
//! authors with validated biographical fields, books, and a fixed set of
//! genres, with a many-to-many author/book link.

use entigraph_core::schema::{
    Constraint, DeletePolicy, EntityType, EnumMember, LinkDefinition, PropertyDefinition,
};
use entigraph_core::{Config, CoreResult, EntityId, Store};
use entigraph_storage::InMemoryBackend;
use std::path::Path;
use tempfile::TempDir;

/// The bookstore schema with default (failing) delete policies.
pub fn bookstore_schema() -> Vec<EntityType> {
    bookstore_schema_with(DeletePolicy::Fail)
}

/// The bookstore schema where deleting an author applies `on_author_delete`
/// to the `Book.authors` links that reference it.
pub fn bookstore_schema_with(on_author_delete: DeletePolicy) -> Vec<EntityType> {
    vec![
        EntityType::enumeration(
            "Genre",
            [EnumMember::new("FANTASY"), EnumMember::new("ROMANCE")],
        ),
        EntityType::new("Author")
            .property(
                PropertyDefinition::string("name")
                    .required()
                    .constraint(Constraint::contains_none("?!")),
            )
            .property(
                PropertyDefinition::string("countryOfBirth")
                    .constraint(Constraint::length(3, 56))
                    .constraint(Constraint::regex("[A-Za-z.,]+")),
            )
            .property(
                PropertyDefinition::integer("yearOfBirth")
                    .required()
                    .constraint(Constraint::max(2019)),
            )
            .property(PropertyDefinition::integer("yearOfDeath").constraint(Constraint::max(2019)))
            .link(LinkDefinition::zero_to_many("books", "Book").inverse("authors")),
        EntityType::new("Book")
            .property(PropertyDefinition::string("title").required())
            .property(PropertyDefinition::integer("year"))
            .link(LinkDefinition::one_to_many("genres", "Genre"))
            .link(
                LinkDefinition::one_to_many("authors", "Author")
                    .inverse("books")
                    .on_target_delete(on_author_delete),
            ),
    ]
}

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Store,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// An in-memory store over the bookstore schema.
    pub fn memory() -> Self {
        Self::memory_with(bookstore_schema())
    }

    /// An in-memory store over `types`.
    pub fn memory_with(types: Vec<EntityType>) -> Self {
        Self {
            store: Store::open_in_memory(types).expect("Failed to open in-memory store"),
            temp_dir: None,
        }
    }

    /// An on-disk store over the bookstore schema in a fresh temp directory.
    pub fn file() -> Self {
        Self::file_with(bookstore_schema())
    }

    /// An on-disk store over `types` in a fresh temp directory.
    pub fn file_with(types: Vec<EntityType>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Store::open(&temp_dir.path().join("store"), types)
            .expect("Failed to open file store");
        Self {
            store,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.store.path()
    }

    /// Closes and reopens a file-based store with the same schema types.
    ///
    /// # Panics
    ///
    /// Panics for in-memory stores; use [`RestartableStorage`] instead.
    pub fn reopen(self, types: Vec<EntityType>) -> Self {
        let Self { store, temp_dir } = self;
        let temp_dir = temp_dir.expect("Only file stores can be reopened");
        store.close().expect("Failed to close store");
        drop(store);
        let store =
            Store::open(&temp_dir.path().join("store"), types).expect("Failed to reopen store");
        Self {
            store,
            temp_dir: Some(temp_dir),
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// In-memory backends that outlive the stores opened over them, for
/// restart and crash tests.
#[derive(Debug, Clone, Default)]
pub struct RestartableStorage {
    /// Backend holding the write-ahead log.
    pub wal: InMemoryBackend,
    /// Backend holding the segment file.
    pub segments: InMemoryBackend,
}

impl RestartableStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store over this storage.
    pub fn open(&self, types: Vec<EntityType>) -> CoreResult<Store> {
        Store::open_with_backends(
            Config::default(),
            Box::new(self.wal.clone()),
            Box::new(self.segments.clone()),
            types,
        )
    }

    /// Simulates a crash: the store is leaked without closing or flushing
    /// anything beyond what commit already made durable.
    pub fn crash(store: Store) {
        std::mem::forget(store);
    }
}

/// Runs a test with a temporary in-memory bookstore.
///
/// # Example
///
/// ```rust
/// use entigraph_testkit::with_temp_store;
///
/// with_temp_store(|store| {
///     assert!(store.describe("Author").is_ok());
/// });
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a temporary on-disk bookstore.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store, &Path) -> R,
{
    let test_store = TestStore::file();
    let path = test_store
        .path()
        .expect("File store should have a path")
        .to_path_buf();
    f(&test_store.store, &path)
}

/// Ids of the sample catalog created by [`seed_bookstore`].
#[derive(Debug, Clone, Copy)]
pub struct Bookstore {
    /// Genre `FANTASY`.
    pub fantasy: EntityId,
    /// Genre `ROMANCE`.
    pub romance: EntityId,
    /// Charlotte Brontë.
    pub bronte: EntityId,
    /// J. R. R. Tolkien.
    pub tolkien: EntityId,
    /// George R. R. Martin.
    pub martin: EntityId,
    /// Jane Eyre (1847).
    pub jane_eyre: EntityId,
    /// The Hobbit (1937).
    pub hobbit: EntityId,
    /// The Lord of the Rings (1955).
    pub lord_of_the_rings: EntityId,
    /// A Game of Thrones (1996).
    pub game_of_thrones: EntityId,
}

/// Creates the sample catalog, one author per transaction.
pub fn seed_bookstore(store: &Store) -> CoreResult<Bookstore> {
    let (fantasy, romance) = store.read(|txn| {
        Ok((
            txn.enum_member("Genre", "FANTASY")?,
            txn.enum_member("Genre", "ROMANCE")?,
        ))
    })?;

    let (bronte, jane_eyre) = store.write(|txn| {
        let author = txn.create(
            "Author",
            [
                ("name", "Charlotte Brontë".into()),
                ("countryOfBirth", "England".into()),
                ("yearOfBirth", 1816.into()),
                ("yearOfDeath", 1855.into()),
            ],
        )?;
        let book = add_book(txn, author, "Jane Eyre", 1847, romance)?;
        Ok((author, book))
    })?;

    let (tolkien, hobbit, lord_of_the_rings) = store.write(|txn| {
        let author = txn.create(
            "Author",
            [
                ("name", "J. R. R. Tolkien".into()),
                ("countryOfBirth", "England".into()),
                ("yearOfBirth", 1892.into()),
                ("yearOfDeath", 1973.into()),
            ],
        )?;
        let hobbit = add_book(txn, author, "The Hobbit", 1937, fantasy)?;
        let lotr = add_book(txn, author, "The Lord of the Rings", 1955, fantasy)?;
        Ok((author, hobbit, lotr))
    })?;

    let (martin, game_of_thrones) = store.write(|txn| {
        let author = txn.create(
            "Author",
            [
                ("name", "George R. R. Martin".into()),
                ("countryOfBirth", "USA".into()),
                ("yearOfBirth", 1948.into()),
            ],
        )?;
        let book = add_book(txn, author, "A Game of Thrones", 1996, fantasy)?;
        Ok((author, book))
    })?;

    Ok(Bookstore {
        fantasy,
        romance,
        bronte,
        tolkien,
        martin,
        jane_eyre,
        hobbit,
        lord_of_the_rings,
        game_of_thrones,
    })
}

fn add_book(
    txn: &mut entigraph_core::Transaction<'_>,
    author: EntityId,
    title: &str,
    year: i64,
    genre: EntityId,
) -> CoreResult<EntityId> {
    let book = txn.create("Book", [("title", title.into()), ("year", year.into())])?;
    txn.add_link(book, "genres", genre)?;
    txn.add_link(author, "books", book)?;
    Ok(book)
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigraph_core::DeletePolicy;

    #[test]
    fn schema_registers() {
        let store = TestStore::memory();
        assert!(store.describe("Genre").unwrap().is_enum());
        let authors = store.describe("Book").unwrap().link_def("authors").unwrap();
        assert_eq!(authors.on_target_delete, DeletePolicy::Fail);
    }

    #[test]
    fn seeded_catalog_is_linked_both_ways() {
        with_temp_store(|store| {
            let catalog = seed_bookstore(store).unwrap();
            let authors = store
                .read(|txn| txn.links(catalog.hobbit, "authors"))
                .unwrap();
            assert_eq!(authors, vec![catalog.tolkien]);
        });
    }

    #[test]
    fn file_store_reopens() {
        let test_store = TestStore::file();
        let catalog = seed_bookstore(&test_store).unwrap();
        let reopened = test_store.reopen(bookstore_schema());
        let title = reopened
            .read(|txn| Ok(txn.entity(catalog.jane_eyre)?.string("title").map(str::to_string)))
            .unwrap();
        assert_eq!(title.as_deref(), Some("Jane Eyre"));
    }
}
