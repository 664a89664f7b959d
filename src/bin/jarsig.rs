//! Command-line tool for checking the signatures of unpacked archives.
//!
//! `jarsig verify` checks every signature block under `<DIR>/META-INF/` and lists
//! which entries are signed by whom.  `jarsig digest` prints the section digests of a
//! manifest, which is useful when a signature file doesn't match.

use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use jarsig::{
    archive::UnpackedArchive,
    digest::{encode_digest, DigestAlgorithm},
    digester::MAIN_ATTRIBUTES,
    Limits, ManifestDigester,
};

/// jarsig
#[derive(Debug, Parser)]
#[clap(name = "jarsig", version)]
pub struct App {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Verify the signatures of an unpacked archive
    Verify {
        /// Directory containing META-INF/MANIFEST.MF
        dir: PathBuf,
        /// Size of the chunks signature files are streamed in
        #[clap(long, default_value_t = Limits::default().chunk_size)]
        chunk_size: usize,
        /// Largest signature file to accept, in bytes
        #[clap(long, default_value_t = Limits::default().max_signature_file_len)]
        max_signature_file_len: u64,
    },
    /// Print the digests of a manifest and each of its sections
    Digest {
        /// Path to a MANIFEST.MF
        manifest: PathBuf,
        /// Digest algorithm, e.g. SHA-256 or SHA1
        #[clap(long, default_value = "SHA-256")]
        algorithm: String,
    },
}

async fn verify(dir: PathBuf, limits: Limits) -> Result<ExitCode> {
    let archive = UnpackedArchive::open(&dir)?;
    let report = archive.verify(&limits).await?;

    let mut names: Vec<&String> = report.entries.keys().collect();
    names.sort();
    for name in names {
        let subjects: Vec<String> = report.entries[name]
            .iter()
            .map(|signer| match &signer.timestamp {
                Some(ts) => format!(
                    "{} (timestamped {})",
                    signer.subject(),
                    format_time(ts.time)
                ),
                None => signer.subject(),
            })
            .collect();
        println!("{name}: {}", subjects.join("; "));
    }

    for (file, digests) in &report.manifest_digests {
        for (key, value) in digests {
            log::debug!("{file}: {key}: {value}");
        }
    }

    if report.failures.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }
    for (name, err) in &report.failures {
        eprintln!("{name}: {err}");
    }
    Ok(ExitCode::FAILURE)
}

fn format_time(time: std::time::SystemTime) -> String {
    match time.duration_since(std::time::UNIX_EPOCH) {
        Ok(since) => format!("@{}", since.as_secs()),
        Err(_) => "before 1970".to_owned(),
    }
}

fn digest(path: PathBuf, algorithm: &str) -> Result<()> {
    let algorithm = DigestAlgorithm::from_name(algorithm)
        .with_context(|| format!("Unsupported digest algorithm {algorithm}"))?;
    let raw = fs::read(&path).with_context(|| format!("Reading {}", path.display()))?;
    let digester = ManifestDigester::new(raw);

    println!(
        "{algorithm}-Digest-Manifest: {}",
        encode_digest(&digester.manifest_digest(algorithm))
    );
    if let Some(main) = digester.main_attributes_digest(algorithm) {
        println!(
            "{algorithm}-Digest-{MAIN_ATTRIBUTES}: {}",
            encode_digest(&main)
        );
    }

    for name in digester.entry_names() {
        let Some(entry) = digester.get(name) else {
            continue;
        };
        println!();
        println!("Name: {name}");
        println!(
            "{algorithm}-Digest: {}",
            encode_digest(&digester.digest(entry, algorithm))
        );
        let legacy = digester.digest_workaround(entry, algorithm);
        if legacy != digester.digest(entry, algorithm) {
            println!("{algorithm}-Digest (legacy): {}", encode_digest(&legacy));
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::init();

    let args = App::parse();

    match args.cmd {
        Command::Verify {
            dir,
            chunk_size,
            max_signature_file_len,
        } => {
            let limits = Limits {
                chunk_size,
                max_signature_file_len,
            };
            verify(dir, limits).await
        }
        Command::Digest {
            manifest,
            algorithm,
        } => {
            digest(manifest, &algorithm)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
