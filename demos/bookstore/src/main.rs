//! Bookstore catalog demo.
//!
//! Records a few authors and their books, prints the catalog, then runs the
//! sample queries against one read-only snapshot.
//!
//! # Commands
//!
//! - `catalog` - Seed (if empty) and print every author with their books
//! - `queries` - Run the sample queries
//! - `schema` - Print the registered entity types

mod catalog;
mod render;

use clap::{Parser, Subcommand};
use entigraph_core::{CoreResult, Query, Store, Transaction};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Bookstore catalog on an embedded entity store.
#[derive(Parser)]
#[command(name = "bookstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Store directory; an in-memory store is used when omitted
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every author with their books
    Catalog,
    /// Run the sample queries
    Queries,
    /// Print the registered entity types
    Schema,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = match &cli.path {
        Some(path) => Store::open(path, catalog::schema())?,
        None => Store::open_in_memory(catalog::schema())?,
    };

    match cli.command {
        None => {
            catalog::seed(&store)?;
            print_catalog(&store)?;
            println!();
            print_queries(&store)?;
        }
        Some(Commands::Catalog) => {
            catalog::seed(&store)?;
            print_catalog(&store)?;
        }
        Some(Commands::Queries) => {
            catalog::seed(&store)?;
            print_queries(&store)?;
        }
        Some(Commands::Schema) => print_schema(&store),
    }

    store.close()?;
    info!("done");
    Ok(())
}

fn print_catalog(store: &Store) -> CoreResult<()> {
    let text = store.read(|txn| {
        let blocks = txn
            .query("Author")?
            .iter()
            .map(|author| render::author_block(txn, author))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(blocks.join("\n***\n"))
    })?;
    println!("{text}");
    Ok(())
}

fn print_queries(store: &Store) -> CoreResult<()> {
    store.read(|txn| {
        let fantasy = txn.enum_member("Genre", "FANTASY")?;

        let fantasy_books = txn.query("Book")?.linked_to("genres", fantasy);
        print_books(txn, "Fantasy books", &fantasy_books)?;

        let twentieth_century = txn
            .query("Book")?
            .filter(|book| book.integer("year").is_some_and(|y| (1900..1999).contains(&y)));
        print_books(txn, "Books of the 20th century", &twentieth_century)?;

        let prolific = txn
            .query("Author")?
            .filter(|author| author.link_count("books") > 1);
        println!("Authors with more than one book:");
        for author in &prolific {
            println!("  {}", author.string("name").unwrap_or_default());
        }

        let by_year = txn.query("Book")?.sorted_by(|book| book.integer("year"));
        print_books(txn, "Books sorted by year", &by_year)?;

        let genres = txn
            .query("Book")?
            .flat_map_distinct(|book| book.links("genres").collect::<Vec<_>>())?;
        println!("All genres:");
        for genre in &genres {
            println!("  {}", render::genre_label(genre.enum_key().unwrap_or_default()));
        }
        Ok(())
    })
}

fn print_books<'s>(txn: &Transaction<'s>, heading: &str, books: &Query<'_, 's>) -> CoreResult<()> {
    println!("{heading}:");
    for book in books {
        println!("  {}", render::book_line(txn, book)?);
    }
    Ok(())
}

fn print_schema(store: &Store) {
    for ty in store.schema().types() {
        println!("{}", ty.name());
        if let Some(members) = ty.members() {
            let keys: Vec<&str> = members.iter().map(|m| m.key.as_str()).collect();
            println!("  members: {}", keys.join(", "));
        }
        for property in ty.properties() {
            let rules: Vec<String> = property.constraints.iter().map(ToString::to_string).collect();
            println!(
                "  {}: {}{}{}",
                property.name,
                property.kind,
                if property.required { " required" } else { "" },
                if rules.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", rules.join(", "))
                }
            );
        }
        for link in ty.links() {
            println!(
                "  {} -> {} ({:?}{})",
                link.name,
                link.target,
                link.cardinality,
                link.inverse
                    .as_ref()
                    .map_or_else(String::new, |inv| format!(", inverse {inv}"))
            );
        }
    }
}
