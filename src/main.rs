// src/main.rs

use anyhow::{bail, Context, Result};
use medialib::engine::{GroupKey, QueryOutput};
use medialib::{logging, CollectionId, CollectionManager, EngineConfig, Filter, MediaRecord, Query};
use std::env;

const USAGE: &str = "\
Usage: medialib <command> [args]

  create <name> <root>...        create a collection
  list                           list registered collections
  history                        recently opened collections
  reindex <id>                   rebuild a collection's index
  query <id> <filter> [group]    filter records, optionally grouped by a field
  search <id> <text>...          free-text search over tag values
  duplicates <id>                files sharing a fingerprint
  private <id> | public <id>     toggle privacy
  delete <id>                    remove a collection and its data";

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::from_env().context("loading configuration")?;
    logging::init(&config);

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let manager = CollectionManager::new(config)?;
    let rest = &args[1..];

    match command.as_str() {
        "create" => {
            if rest.len() < 2 {
                bail!("create needs a name and at least one root");
            }
            let handle = manager.create(&rest[0], &rest[1..])?;
            println!("{}", handle.id());
        }
        "list" => {
            for entry in manager.list()? {
                let marker = if entry.private { " (private)" } else { "" };
                println!("{}  {}{}", entry.id, entry.name, marker);
            }
        }
        "history" => {
            for entry in manager.history()? {
                println!("{}  {}", entry.id, entry.name);
            }
        }
        "reindex" => {
            let handle = manager.open(&collection_arg(rest)?)?;
            let outcome = manager.reindex(&handle).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        "query" => {
            let handle = manager.open(&collection_arg(rest)?)?;
            let filter = match rest.get(1) {
                Some(text) => Filter::parse(text)?,
                None => Filter::All,
            };
            let mut query = Query::new().filter(filter).order_by("path");
            if let Some(group) = rest.get(2) {
                query = query.group_by(group.as_str());
            }
            match manager.query(&handle, &query)? {
                QueryOutput::Records(records) => {
                    for record in records {
                        print_record(&record?);
                    }
                }
                QueryOutput::Groups(groups) => {
                    for bucket in groups {
                        match bucket.key {
                            GroupKey::Value(value) => println!("{}\t{}", value, bucket.count),
                            GroupKey::NoValue => println!("(no value)\t{}", bucket.count),
                        }
                    }
                }
            }
        }
        "search" => {
            let handle = manager.open(&collection_arg(rest)?)?;
            let text = rest[1..].join(" ");
            for record in manager.search(&handle, &text)? {
                print_record(&record?);
            }
        }
        "duplicates" => {
            let handle = manager.open(&collection_arg(rest)?)?;
            for group in manager.duplicates(&handle)? {
                println!("{}", group.fingerprint.to_hex());
                for record in &group.records {
                    println!("  {}", record.path);
                }
            }
        }
        "private" | "public" => {
            let handle = manager.open(&collection_arg(rest)?)?;
            if command == "private" {
                manager.mark_private(&handle)?;
            } else {
                manager.mark_public(&handle)?;
            }
        }
        "delete" => {
            manager.delete(&collection_arg(rest)?)?;
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }

    Ok(())
}

fn collection_arg(rest: &[String]) -> Result<CollectionId> {
    match rest.first() {
        Some(id) => Ok(CollectionId::from(id.as_str())),
        None => bail!("missing collection id"),
    }
}

fn print_record(record: &MediaRecord) {
    let format = record.format.as_deref().unwrap_or("-");
    println!("{}\t{}\t{}", record.path, format, record.size);
}
