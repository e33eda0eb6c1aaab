use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use magpak::vfs::cpk::CpkArchive;
use magpak::vfs::mpk::MpkArchive;
use magpak::vfs::{AnyArchive, Archive};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "magpak",
    version,
    about = "An unpacker/repacker for MAGES. MPK and CriWare CPK archives"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "List out contents of an archive")]
    #[command(arg_required_else_help = true, aliases = ["l", "ls"])]
    List {
        #[arg(help = "The archive to list")]
        archive: PathBuf,
    },
    #[command(about = "Extract files from an archive")]
    #[command(arg_required_else_help = true, aliases = ["x", "ex"])]
    Extract {
        #[arg(help = "The archive to extract")]
        archive: PathBuf,
        #[arg(
            help = "IDs or glob patterns of the entries to extract\nIf empty, the whole archive is extracted"
        )]
        entries: Vec<String>,
        #[arg(short, long, help = "Directory to extract into")]
        outdir: Option<PathBuf>,
    },
    #[command(about = "Pack a directory of unpacked files into a new archive")]
    #[command(arg_required_else_help = true, aliases = ["p", "re"])]
    Pack {
        #[arg(help = "The directory of files to pack")]
        indir: PathBuf,
        #[arg(help = "The archive to create; its extension (.mpk or .cpk) picks the format")]
        archive: PathBuf,
    },
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::List { archive } => {
            AnyArchive::open(&archive)
                .with_context(|| format!("failed to open '{}'", archive.display()))?
                .list_entries();
        }
        Commands::Extract {
            archive,
            entries,
            outdir,
        } => {
            AnyArchive::open(&archive)
                .with_context(|| format!("failed to open '{}'", archive.display()))?
                .extract_entries(&entries, outdir.as_deref())
                .with_context(|| format!("failed to extract from '{}'", archive.display()))?;
        }
        Commands::Pack { indir, archive } => {
            let format = archive
                .extension()
                .map(|ext| ext.to_ascii_lowercase())
                .unwrap_or_default();
            let packed = match format.to_str() {
                Some("mpk") => MpkArchive::pack_dir(&indir, &archive),
                Some("cpk") => CpkArchive::pack_dir(&indir, &archive),
                _ => bail!(
                    "cannot tell the archive format of '{}' (expected a .mpk or .cpk extension)",
                    archive.display()
                ),
            };
            packed.with_context(|| format!("failed to pack '{}'", indir.display()))?;
        }
    }

    Ok(())
}
