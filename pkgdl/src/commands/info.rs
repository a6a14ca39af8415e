use crate::utils;
use anyhow::{Context, Result};
use clap::Args;
use pkgdl::pkgdl_pkg::{Container, ContentKind, EntryKind};
use serde::Serialize;
use std::{
    fs::File,
    io::{self, Read},
    path::PathBuf,
};

const HEAD_LIMIT: u64 = 4 * 1024 * 1024;

/// Print header fields and file index of a local pkg file.
#[derive(Debug, Clone, Args)]
pub struct Info {
    /// Path of .pkg file.
    #[arg(required = true)]
    pub input: PathBuf,

    /// Print information in json format.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct PackageInfo {
    content_id: String,
    content_kind: ContentKind,
    content_type: u32,
    key_type: u8,
    revision: u16,
    package_type: u16,
    total_size: u64,
    enc_offset: u64,
    enc_size: u64,
    index_size: u64,
    iv: String,
    entries: Vec<EntryInfo>,
}

#[derive(Serialize)]
struct EntryInfo {
    name: String,
    offset: u64,
    size: u64,
    flags: u8,
    kind: EntryKind,
}

impl Info {
    pub fn execute(self) -> Result<()> {
        let file = File::open(&self.input)
            .with_context(|| format!("could not open {}", self.input.display()))?;
        let mut head = Vec::new();
        file.take(HEAD_LIMIT).read_to_end(&mut head)?;

        let container = Container::parse(&head)?;
        let header = &container.header;
        let entries = container
            .entries(&head)?
            .into_iter()
            .map(|x| EntryInfo {
                offset: header.enc_offset + x.data_offset,
                size: x.data_size,
                flags: x.flags,
                kind: x.kind,
                name: x.name,
            })
            .collect();

        let info = PackageInfo {
            content_id: header.content_id(),
            content_kind: container.metadata.content_kind,
            content_type: container.metadata.content_kind.code(),
            key_type: header.key_type,
            revision: header.revision,
            package_type: header.package_type,
            total_size: header.total_size,
            enc_offset: header.enc_offset,
            enc_size: header.enc_size,
            index_size: container.index_size,
            iv: hex::encode(header.iv),
            entries,
        };

        if self.json {
            serde_json::to_writer_pretty(io::stdout(), &info)?;
            println!();
        } else {
            print_info(&info);
        }

        Ok(())
    }
}

fn print_info(info: &PackageInfo) {
    println!("Content ID   : {}", info.content_id);
    println!(
        "Content Type : {} ({})",
        info.content_kind, info.content_type
    );
    println!("Key Type     : {}", info.key_type);
    println!("Revision     : {:#06x}", info.revision);
    println!(
        "Total Size   : {} ({} bytes)",
        utils::format_bytes(info.total_size, 2),
        info.total_size
    );
    println!("Payload      : {}+{}", info.enc_offset, info.enc_size);
    println!("IV           : {}", info.iv);
    println!("Files        : {}", info.entries.len());

    for entry in &info.entries {
        let kind = match entry.kind {
            EntryKind::File => "file",
            EntryKind::Directory => "dir",
            EntryKind::Skip => "skip",
        };

        println!(
            "  {:>12} {:>12} {:<4} {}",
            entry.offset, entry.size, kind, entry.name
        );
    }
}
