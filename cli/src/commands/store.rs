//! `acb store` command group.

use acb_core::error::Result;
use acb_core::BuildConfig;
use acb_runtime::{AppRef, ImageStore, StoreEntry};
use clap::{Args, Subcommand};

use crate::output;

#[derive(Subcommand)]
pub enum StoreCommand {
    /// Download an image into the store
    Fetch(FetchArgs),
    /// List stored images
    #[command(alias = "ls")]
    List(ListArgs),
    /// Remove a stored image
    Rm(RmArgs),
    /// Remove every stored image
    Clear(ClearArgs),
}

#[derive(Args)]
pub struct FetchArgs {
    /// Image reference, e.g. example.com/base:1.0
    pub image: String,

    /// Download even if a pinned copy is cached
    #[arg(long)]
    pub force: bool,

    /// Allow plain HTTP discovery and skip TLS verification
    #[arg(long)]
    pub insecure: bool,
}

#[derive(Args)]
pub struct ListArgs {
    /// Only show `name:version` lines
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct RmArgs {
    /// Image reference (`name:version`) or content key
    pub image: String,
}

#[derive(Args)]
pub struct ClearArgs;

impl StoreCommand {
    pub fn name(&self) -> &'static str {
        match self {
            StoreCommand::Fetch(_) => "store fetch",
            StoreCommand::List(_) => "store list",
            StoreCommand::Rm(_) => "store rm",
            StoreCommand::Clear(_) => "store clear",
        }
    }
}

pub async fn execute(cmd: StoreCommand, config: &BuildConfig) -> Result<()> {
    match cmd {
        StoreCommand::Fetch(args) => {
            let config = config.clone().with_insecure(args.insecure);
            let store = ImageStore::open(&config)?;
            let app = AppRef::parse(&args.image)?;
            let key = store.fetch(&app, None, args.force).await?;
            println!("{key}");
        }
        StoreCommand::List(args) => {
            let entries = ImageStore::open(config)?.entries()?;
            if args.quiet {
                for entry in &entries {
                    println!("{}", display_name(entry));
                }
            } else {
                println!("{}", render_table(&entries));
            }
        }
        StoreCommand::Rm(args) => {
            let store = ImageStore::open(config)?;
            let key = match acb_runtime::ContentKey::parse(args.image.as_str()) {
                Ok(key) => key,
                Err(_) => {
                    let app = AppRef::parse(&args.image)?;
                    store.find_key(app.name.as_str(), &app.labels)?
                }
            };
            store.delete(&key)?;
            println!("Removed: {}", key.short());
        }
        StoreCommand::Clear(_) => {
            ImageStore::open(config)?.delete_all()?;
        }
    }
    Ok(())
}

fn display_name(entry: &StoreEntry) -> String {
    output::image_label(entry.manifest.name.as_str(), entry.manifest.labels.version())
}

fn render_table(entries: &[StoreEntry]) -> comfy_table::Table {
    let mut table = output::table(&["NAME", "KEY", "SIZE", "FETCHED", "URL"]);
    for entry in entries {
        let (fetched, url) = match &entry.remote {
            Some(remote) => (output::age(&remote.download_time), remote.aci_url.clone()),
            None => ("-".to_string(), "-".to_string()),
        };
        table.add_row([
            display_name(entry),
            entry.key.short().to_string(),
            output::human_size(entry.size_bytes),
            fetched,
            url,
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use acb_runtime::{ContentKey, Manifest};

    fn entry(name: &str, version: &str) -> StoreEntry {
        let manifest = Manifest::placeholder()
            .unwrap()
            .with_name(name)
            .unwrap()
            .with_label("version", version)
            .unwrap();
        StoreEntry {
            key: ContentKey::from_digest(&[7u8; 64]),
            manifest,
            size_bytes: 2048,
            remote: None,
        }
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(&entry("example.com/base", "1.0")), "example.com/base:1.0");
    }

    #[test]
    fn test_render_table() {
        let rendered = render_table(&[entry("example.com/base", "1.0")]).to_string();
        assert!(rendered.contains("NAME"));
        assert!(rendered.contains("example.com/base:1.0"));
        assert!(rendered.contains("2.0 KB"));
        assert!(rendered.contains("sha512-070707070707"));
    }
}
