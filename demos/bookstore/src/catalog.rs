//! Bookstore schema and sample data.

use entigraph_core::schema::{
    Constraint, EntityType, EnumMember, LinkDefinition, PropertyDefinition,
};
use entigraph_core::{CoreResult, EntityId, Store, Transaction};
use tracing::info;

/// Authors, books and the two genres.
pub fn schema() -> Vec<EntityType> {
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
            .link(LinkDefinition::one_to_many("authors", "Author").inverse("books")),
    ]
}

/// Adds the sample authors and books unless the store already has authors.
///
/// Each step runs in its own transaction, the way an application would
/// record them as they arrive.
pub fn seed(store: &Store) -> CoreResult<()> {
    let existing = store.read(|txn| Ok(txn.scan("Author")?.count()))?;
    if existing > 0 {
        info!(authors = existing, "catalog already present");
        return Ok(());
    }

    let bronte = store.write(|txn| {
        author(txn, "Charlotte Brontë", "England", 1816, Some(1855))
    })?;
    store.write(|txn| {
        let romance = txn.enum_member("Genre", "ROMANCE")?;
        let book = book(txn, "Jane Eyre", Some(1847), romance)?;
        txn.add_link(book, "authors", bronte)
    })?;

    let tolkien = store.write(|txn| {
        author(txn, "J. R. R. Tolkien", "England", 1892, Some(1973))
    })?;
    store.write(|txn| {
        let fantasy = txn.enum_member("Genre", "FANTASY")?;
        for (title, year) in [("The Hobbit", 1937), ("The Lord of the Rings", 1955)] {
            let book = book(txn, title, Some(year), fantasy)?;
            txn.add_link(tolkien, "books", book)?;
        }
        Ok(())
    })?;

    store.write(|txn| {
        let fantasy = txn.enum_member("Genre", "FANTASY")?;
        let martin = author(txn, "George R. R. Martin", "USA", 1948, None)?;
        let book = book(txn, "A Game of Thrones", Some(1996), fantasy)?;
        txn.add_link(martin, "books", book)
    })?;

    info!(entities = store.entity_count(), "catalog seeded");
    Ok(())
}

fn author(
    txn: &mut Transaction<'_>,
    name: &str,
    country: &str,
    born: i64,
    died: Option<i64>,
) -> CoreResult<EntityId> {
    let id = txn.create(
        "Author",
        [
            ("name", name.into()),
            ("countryOfBirth", country.into()),
            ("yearOfBirth", born.into()),
        ],
    )?;
    if let Some(died) = died {
        txn.set(id, "yearOfDeath", died)?;
    }
    Ok(id)
}

fn book(
    txn: &mut Transaction<'_>,
    title: &str,
    year: Option<i64>,
    genre: EntityId,
) -> CoreResult<EntityId> {
    let id = txn.create("Book", [("title", title.into())])?;
    if let Some(year) = year {
        txn.set(id, "year", year)?;
    }
    txn.add_link(id, "genres", genre)?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigraph_testkit::bookstore_schema;

    #[test]
    fn schema_matches_the_test_fixture() {
        assert_eq!(schema(), bookstore_schema());
    }

    #[test]
    fn seeding_twice_keeps_one_catalog() {
        let store = Store::open_in_memory(schema()).unwrap();
        seed(&store).unwrap();
        let entities = store.entity_count();

        seed(&store).unwrap();
        assert_eq!(store.entity_count(), entities);
    }
}
