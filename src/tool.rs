// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! CLI tools over a storage image: dump, check and resize-blocks.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use term_index::database::mem::MemDatabase;
use term_index::database::DatabaseClient;
use term_index::key::KeyPrefix;
use term_index::meta::MetaDataDescription;
use term_index::storage::dump::{self, ResizeBlockType, ResizeOptions};
use term_index::{Docno, Error};

#[derive(Parser)]
#[command(
    name = "term-index",
    about = "Inspect and maintain term-index storage images"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pretty-print every record of a storage image
    Dump {
        /// Path of the storage image
        image: PathBuf,

        /// Restrict the dump to one key family (prefix character)
        #[arg(long)]
        prefix: Option<char>,
    },
    /// Decode every key/value pair and report corrupt entries
    Check {
        /// Path of the storage image
        image: PathBuf,
    },
    /// Rebuild blocks of a family with a new size target
    ResizeBlocks {
        /// Path of the storage image (rewritten in place)
        image: PathBuf,

        /// Block family: posinfo or forward
        blocktype: String,

        /// New target token count per block
        newsize: usize,

        /// Families rewritten per commit
        #[arg(long, default_value_t = 64)]
        commit: usize,

        /// Restrict to a docno range, as A:B
        #[arg(long)]
        docno: Option<String>,

        /// Restrict to one term type
        #[arg(long)]
        termtype: Option<String>,
    },
}

fn open_image(path: &PathBuf) -> Result<MemDatabase, Error> {
    let mut file = std::fs::File::open(path)?;
    MemDatabase::load_image(&mut file)
}

fn schema_of(db: &MemDatabase) -> Result<MetaDataDescription, Error> {
    let key = [KeyPrefix::MetaDataDescr as u8];
    match db.read_value(&key)? {
        Some(blob) => MetaDataDescription::from_string(
            std::str::from_utf8(&blob)
                .map_err(|_| Error::Database("metadata schema is not utf-8".to_string()))?,
        ),
        None => Ok(MetaDataDescription::new()),
    }
}

fn parse_docno_range(source: &str) -> Result<(Docno, Docno), Error> {
    let Some((lo, hi)) = source.split_once(':') else {
        return Err(Error::Config(format!("expected A:B, got '{source}'")));
    };
    let lo = lo
        .parse()
        .map_err(|_| Error::Config(format!("invalid docno '{lo}'")))?;
    let hi = hi
        .parse()
        .map_err(|_| Error::Config(format!("invalid docno '{hi}'")))?;
    Ok((lo, hi))
}

fn run() -> Result<(), Error> {
    let cli = Cli::parse();

    match cli.command {
        Command::Dump { image, prefix } => {
            let db = open_image(&image)?;
            let descr = schema_of(&db)?;
            let prefix = match prefix {
                Some(c) => Some(
                    KeyPrefix::try_from(c as u8)
                        .map_err(|_| Error::Config(format!("unknown key family '{c}'")))?,
                ),
                None => None,
            };
            for line in dump::dump_storage(&db, &descr, prefix)? {
                println!("{line}");
            }
        }
        Command::Check { image } => {
            let db = open_image(&image)?;
            let descr = schema_of(&db)?;
            let errors = dump::check_storage(&db, &descr)?;
            if errors > 0 {
                return Err(Error::Database(format!("{errors} corrupt entries")));
            }
            println!("storage is consistent");
        }
        Command::ResizeBlocks {
            image,
            blocktype,
            newsize,
            commit,
            docno,
            termtype,
        } => {
            let db = open_image(&image)?;

            let block_type = match blocktype.to_ascii_lowercase().as_str() {
                "posinfo" => ResizeBlockType::Posinfo,
                "forward" => ResizeBlockType::Forward,
                other => {
                    return Err(Error::Config(format!("unknown block type '{other}'")));
                }
            };
            let docno_range = docno.as_deref().map(parse_docno_range).transpose()?;
            let typeno = match termtype {
                Some(name) => {
                    let mut key = vec![KeyPrefix::TermType as u8];
                    key.extend_from_slice(name.as_bytes());
                    match db.read_value(&key)? {
                        Some(value) => {
                            let mut tail = &*value;
                            Some(term_index::coding::unpack_uint(&mut tail)?)
                        }
                        None => {
                            return Err(Error::Config(format!("unknown term type '{name}'")));
                        }
                    }
                }
                None => None,
            };

            let handle: Arc<dyn DatabaseClient> = Arc::new(db.clone());
            let rewritten = dump::resize_blocks(
                &handle,
                &ResizeOptions {
                    block_type,
                    new_size: newsize,
                    commit_chunk: commit,
                    docno_range,
                    typeno,
                },
            )?;

            let mut file = std::fs::File::create(&image)?;
            db.save_image(&mut file)?;
            println!("rewrote {rewritten} families");
        }
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
