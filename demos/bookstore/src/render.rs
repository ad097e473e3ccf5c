//! Plain-text rendering of catalog entities.

use entigraph_core::{CoreResult, EntityView, Transaction};

/// `FANTASY` -> `Fantasy`.
pub fn genre_label(key: &str) -> String {
    let lower = key.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `Title (year) - Genre, Genre`, with `Unknown` for a missing year.
pub fn book_line<'s>(txn: &Transaction<'s>, book: &EntityView<'s>) -> CoreResult<String> {
    let genres: Vec<String> = book
        .linked(txn, "genres")?
        .iter()
        .map(|genre| genre_label(genre.enum_key().unwrap_or_default()))
        .collect();
    let year = book
        .integer("year")
        .map_or_else(|| "Unknown".to_string(), |y| y.to_string());
    Ok(format!(
        "{} ({}) - {}",
        book.string("title").unwrap_or_default(),
        year,
        genres.join(", ")
    ))
}

/// `Name (born-died):` followed by one line per book; `???` while alive.
pub fn author_block<'s>(txn: &Transaction<'s>, author: &EntityView<'s>) -> CoreResult<String> {
    let books = author
        .linked(txn, "books")?
        .iter()
        .map(|book| book_line(txn, book))
        .collect::<CoreResult<Vec<_>>>()?;
    let born = author
        .integer("yearOfBirth")
        .map_or_else(String::new, |y| y.to_string());
    let died = author
        .integer("yearOfDeath")
        .map_or_else(|| "???".to_string(), |y| y.to_string());
    Ok(format!(
        "{} ({}-{}):\n{}",
        author.string("name").unwrap_or_default(),
        born,
        died,
        books.join("\n")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use entigraph_core::Store;

    #[test]
    fn genre_labels() {
        assert_eq!(genre_label("FANTASY"), "Fantasy");
        assert_eq!(genre_label("ROMANCE"), "Romance");
        assert_eq!(genre_label(""), "");
    }

    #[test]
    fn renders_authors_like_the_catalog() {
        let store = Store::open_in_memory(catalog::schema()).unwrap();
        catalog::seed(&store).unwrap();
        let blocks = store
            .read(|txn| {
                txn.query("Author")?
                    .iter()
                    .map(|a| author_block(txn, a))
                    .collect::<CoreResult<Vec<_>>>()
            })
            .unwrap();
        assert_eq!(
            blocks,
            [
                "Charlotte Brontë (1816-1855):\nJane Eyre (1847) - Romance",
                "J. R. R. Tolkien (1892-1973):\nThe Hobbit (1937) - Fantasy\nThe Lord of the Rings (1955) - Fantasy",
                "George R. R. Martin (1948-???):\nA Game of Thrones (1996) - Fantasy",
            ]
        );
    }

    #[test]
    fn seeding_twice_is_a_no_op() {
        let store = Store::open_in_memory(catalog::schema()).unwrap();
        catalog::seed(&store).unwrap();
        let count = store.entity_count();
        catalog::seed(&store).unwrap();
        assert_eq!(store.entity_count(), count);
    }
}
