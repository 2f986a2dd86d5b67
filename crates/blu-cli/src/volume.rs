//! `blu-up volume` subcommands.

use anyhow::{Context, Result};
use blu_catalog::{Catalog, Volume};
use clap::Subcommand;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum VolumeCommands {
    /// Register a new volume
    Add {
        /// Human-readable name, unique within the catalog
        name: String,

        /// Free-form description
        #[arg(default_value = "")]
        description: String,

        /// Use this UUID instead of generating one
        #[arg(long)]
        uuid: Option<Uuid>,
    },

    /// Remove a volume and its blob records (stored files are left alone)
    #[command(visible_alias = "remove")]
    Rm {
        /// Volume name or UUID
        volume: String,
    },

    /// List volumes
    #[command(visible_alias = "list")]
    Ls,
}

pub fn run(catalog: &Catalog, command: VolumeCommands) -> Result<()> {
    match command {
        VolumeCommands::Add {
            name,
            description,
            uuid,
        } => {
            let volume = Volume {
                uuid: uuid.unwrap_or_else(Uuid::new_v4).to_string(),
                name,
                description,
            };
            catalog
                .add_volume(&volume)
                .with_context(|| format!("Failed to add volume {}", volume.name))?;
            println!("Added volume {} ({})", volume.name, volume.uuid);
        }
        VolumeCommands::Rm { volume } => {
            let (removed, blobs) = catalog
                .remove_volume(&volume)
                .with_context(|| format!("Failed to remove volume {}", volume))?;
            println!(
                "Removed volume {} ({}) and {} blob record(s)",
                removed.name, removed.uuid, blobs
            );
        }
        VolumeCommands::Ls => {
            let volumes = catalog.list_volumes()?;
            if volumes.is_empty() {
                println!("no volumes in the database");
                return Ok(());
            }
            let width = volumes.iter().map(|v| v.name.len()).max().unwrap_or(0);
            for v in volumes {
                println!("{}  {:<width$}  {}", v.uuid, v.name, v.description, width = width);
            }
        }
    }
    Ok(())
}
