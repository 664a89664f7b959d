//! Verifying every signature of an archive.
//!
//! Each signature file is verified on the blocking thread pool, independently of the
//! others.  The results are sent back over a channel to the caller's task, which is the
//! only place the [`SignerCache`] is ever touched.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
    sync::Arc,
    thread::available_parallelism,
};

use anyhow::{Context, Result};
use log::{debug, warn};
use tokio::sync::{mpsc, Semaphore};

use crate::{
    cache::{SignerCache, SignerSet},
    digester::ManifestDigester,
    error::VerifyError,
    is_block,
    limits::Limits,
    verifier::{FileContribution, SignatureFileVerifier},
    MANIFEST_NAME,
};

/// The `META-INF/` directory of an unpacked archive, ready for verification.
#[derive(Debug)]
pub struct UnpackedArchive {
    pub digester: ManifestDigester,
    /// One per signature block, sorted by name.
    pub verifiers: Vec<SignatureFileVerifier>,
    /// Signature blocks that couldn't be parsed.
    pub failures: Vec<(String, VerifyError)>,
}

impl UnpackedArchive {
    /// Read the manifest, signature blocks and signature files below `root`.
    ///
    /// Signature files are matched to their block case-insensitively.  A block whose
    /// signature file is missing is kept: verifying it reports the problem.
    pub fn open(root: &Path) -> Result<Self> {
        let manifest_path = root.join(MANIFEST_NAME);
        let manifest = fs::read(&manifest_path)
            .with_context(|| format!("Reading manifest {}", manifest_path.display()))?;
        let digester = ManifestDigester::new(manifest);

        let meta_inf = root.join("META-INF");
        let mut files = BTreeMap::new();
        for entry in fs::read_dir(&meta_inf)
            .with_context(|| format!("Listing {}", meta_inf.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            files.insert(format!("META-INF/{name}"), entry.path());
        }

        let mut verifiers = vec![];
        let mut failures = vec![];
        for (name, path) in &files {
            if !is_block(name) {
                continue;
            }
            let block = fs::read(path).with_context(|| format!("Reading {}", path.display()))?;
            let mut verifier = match SignatureFileVerifier::new(name, &block) {
                Ok(verifier) => verifier,
                Err(err) => {
                    warn!("{name}: {err}");
                    failures.push((name.clone(), err));
                    continue;
                }
            };

            if verifier.needs_signature_file() {
                let sf_name = verifier.signature_file_name();
                if let Some((_, sf_path)) = files
                    .iter()
                    .find(|(candidate, _)| candidate.eq_ignore_ascii_case(&sf_name))
                {
                    let sf = fs::read(sf_path)
                        .with_context(|| format!("Reading {}", sf_path.display()))?;
                    verifier.set_signature_file(sf);
                }
            }
            verifiers.push(verifier);
        }

        Ok(Self {
            digester,
            verifiers,
            failures,
        })
    }

    /// Verify all signature files.  Blocks that failed to parse are reported as
    /// failures.
    pub async fn verify(self, limits: &Limits) -> Result<ArchiveReport> {
        let mut report =
            verify_archive(Arc::new(self.digester), self.verifiers, limits).await?;
        report.failures.extend(self.failures);
        report.failures.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(report)
    }
}

/// The outcome of verifying all signature files of an archive.
#[derive(Debug, Default)]
pub struct ArchiveReport {
    /// Signed entries and their signers.  Entries that no file signs are absent.
    pub entries: HashMap<String, SignerSet>,
    /// Every `<ALG>-Digest-Manifest` attribute seen, keyed by signature block path.
    pub manifest_digests: BTreeMap<String, Vec<(String, String)>>,
    /// Signature blocks that failed verification, by path, with the reason.
    pub failures: Vec<(String, VerifyError)>,
    /// Number of distinct signer combinations across all entries.
    pub distinct_signer_sets: usize,
}

impl ArchiveReport {
    pub fn signers(&self, name: &str) -> Option<&SignerSet> {
        self.entries.get(name)
    }

    pub fn is_signed(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

struct FileOutcome {
    name: String,
    result: crate::Result<Option<FileContribution>>,
    manifest_digests: Vec<(String, String)>,
}

/// Verify a set of signature files against one manifest.
///
/// A failing signature file does not affect the others; it is listed in
/// [`ArchiveReport::failures`] and contributes no signers.
pub async fn verify_archive(
    digester: Arc<ManifestDigester>,
    verifiers: Vec<SignatureFileVerifier>,
    limits: &Limits,
) -> Result<ArchiveReport> {
    let threads = available_parallelism()?;
    let sem = Arc::new(Semaphore::new(threads.into()));
    // room for every result, so senders never wait on the receiver
    let (tx, mut rx) = mpsc::channel::<FileOutcome>(verifiers.len().max(1));

    let mut handles = vec![];
    for verifier in verifiers {
        let permit = Arc::clone(&sem).acquire_owned().await?;
        let digester = Arc::clone(&digester);
        let limits = limits.clone();
        let tx = tx.clone();

        handles.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut manifest_digests = vec![];
            let result = verifier.verify(&digester, &limits, &mut manifest_digests);
            // only fails if the receiver is gone, in which case nobody wants the result
            let _ = tx.blocking_send(FileOutcome {
                name: verifier.block_name().to_owned(),
                result,
                manifest_digests,
            });
        }));
    }
    drop(tx);

    let mut cache = SignerCache::new();
    let mut report = ArchiveReport::default();
    while let Some(outcome) = rx.recv().await {
        report
            .manifest_digests
            .insert(outcome.name.clone(), outcome.manifest_digests);
        match outcome.result {
            Ok(Some(contribution)) => {
                debug!(
                    "{}: {} signer(s) for {} entries",
                    outcome.name,
                    contribution.signers.len(),
                    contribution.entries.len()
                );
                contribution.merge_into(&mut cache);
            }
            Ok(None) => debug!("{}: no signers contributed", outcome.name),
            Err(err) => {
                warn!("{}: {err}", outcome.name);
                report.failures.push((outcome.name, err));
            }
        }
    }

    for handle in handles {
        handle.await.context("signature file verification task failed")?;
    }

    report.failures.sort_by(|(a, _), (b, _)| a.cmp(b));
    report.distinct_signer_sets = cache.distinct_sets();
    report.entries = cache.into_entries();
    Ok(report)
}
