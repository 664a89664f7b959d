//! Verification of one signature file against a manifest.
//!
//! A signature block (`META-INF/<NAME>.RSA`, `.DSA` or `.EC`) signs a signature file
//! (`META-INF/<NAME>.SF`), which in turn records digests of the manifest.  Verifying it
//! establishes which manifest entries the block's signers vouch for:
//!
//!  1. The signature file is streamed once, in chunks, through every signer record's
//!     verifier and through the attribute parser.  As soon as the main attributes are
//!     complete, the whole-manifest digest is checked.  If it matches, every manifest
//!     entry is covered and the per-entry sections no longer need to be parsed.
//!  2. At least one signer record must verify, or the file is rejected.
//!  3. Signer identities are derived once for the whole file.
//!  4. Without whole-manifest trust, the main-attributes digest must match and each
//!     per-entry section digest is checked individually.
//!
//! The verified entries are gathered into a [`FileContribution`] before anything is
//! merged, so a file that fails verification leaves the [`SignerCache`] untouched.

use std::{ops::ControlFlow, sync::Arc};

use log::{debug, trace};

use crate::{
    cache::{SignerCache, SignerSet},
    digest::{decode_expected, digests_equal, strip_digest_suffix, to_hex, DigestAlgorithm},
    digester::ManifestDigester,
    error::{Result, VerifyError},
    limits::Limits,
    manifest::Attributes,
    pkcs7::{SignatureContainer, SignerRecord, SignerVerifier},
    sfparser::SignatureFileParser,
    signer::derive_signers,
    MANIFEST_NAME,
};

const SIGNATURE_VERSION: &str = "Signature-Version";
const SUPPORTED_VERSION: &str = "1.0";

const DIGEST_MANIFEST_SUFFIX: &str = "-Digest-Manifest";
const DIGEST_MAIN_ATTRIBUTES_SUFFIX: &str = "-Digest-Manifest-Main-Attributes";
const DIGEST_SUFFIX: &str = "-Digest";

/// Mutable state carried across the sections of one signature file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerificationState {
    /// Set once a section only matched in its legacy form.  From then on the legacy
    /// form is the only one computed for this file.
    pub workaround_active: bool,
}

/// Progress of the streaming pass over a signature file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// The main attributes aren't complete yet.
    AccumulatingAttributes,
    /// The whole-manifest digest has been checked; `true` if it matched.  Never
    /// re-evaluated.
    WholeManifestDecided(bool),
    /// End of stream.
    Done,
}

impl StreamState {
    /// Whether the attribute parser still needs signature-file bytes.
    ///
    /// Once the whole manifest is trusted, the per-entry sections are irrelevant.
    pub fn wants_attributes(&self) -> bool {
        matches!(
            self,
            Self::AccumulatingAttributes | Self::WholeManifestDecided(false)
        )
    }

    /// Whether the signer verifiers still need signature-file bytes.  They always need
    /// all of them, since the signature covers the complete file.
    pub fn wants_verifier_bytes(&self) -> bool {
        !matches!(self, Self::Done)
    }
}

/// What a signature file contributes to an archive: its signers, and the names of
/// the entries they sign.
#[derive(Debug, Clone)]
pub struct FileContribution {
    pub signers: SignerSet,
    /// Normalized entry names, always ending with [`MANIFEST_NAME`].
    pub entries: Vec<String>,
}

impl FileContribution {
    /// Record the signers for every entry in `cache`.
    pub fn merge_into(&self, cache: &mut SignerCache) {
        for name in &self.entries {
            cache.merge(&self.signers, name);
        }
    }
}

/// Verifier for one signature block and its signature file.
#[derive(Debug)]
pub struct SignatureFileVerifier {
    /// Path of the block as given, e.g. `META-INF/signer.rsa`.
    block_name: String,
    /// Uppercased block name without extension, e.g. `META-INF/SIGNER`.
    name: String,
    container: SignatureContainer,
    signature_file: Option<Vec<u8>>,
}

impl SignatureFileVerifier {
    /// Parse a signature block.  `block_name` is its path within the archive.
    pub fn new(block_name: &str, raw_block: &[u8]) -> Result<Self> {
        let base = block_name
            .rsplit_once('.')
            .map_or(block_name, |(base, _ext)| base);
        let container = SignatureContainer::from_der(raw_block)?;
        trace!(
            "signature block {block_name}: {} signer(s), {} certificate(s)",
            container.signers().len(),
            container.certificates().len()
        );

        Ok(Self {
            block_name: block_name.to_owned(),
            name: base.to_uppercase(),
            container,
            signature_file: None,
        })
    }

    /// Path of the signature block, exactly as passed to [`new`].
    ///
    /// Unlike [`name`], this tells apart blocks that only differ in extension.
    ///
    /// [`new`]: SignatureFileVerifier::new
    /// [`name`]: SignatureFileVerifier::name
    pub fn block_name(&self) -> &str {
        &self.block_name
    }

    /// Uppercased block name without extension.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the signature file this block signs.
    pub fn signature_file_name(&self) -> String {
        format!("{}.SF", self.name)
    }

    /// Whether the signature file must be supplied with [`set_signature_file`].  It
    /// isn't needed when the block embeds it.
    ///
    /// [`set_signature_file`]: SignatureFileVerifier::set_signature_file
    pub fn needs_signature_file(&self) -> bool {
        self.signature_file.is_none() && self.container.content().is_none()
    }

    pub fn set_signature_file(&mut self, bytes: Vec<u8>) {
        self.signature_file = Some(bytes);
    }

    pub fn container(&self) -> &SignatureContainer {
        &self.container
    }

    /// Verify this signature file against `digester`.
    ///
    /// Every `<ALG>-Digest-Manifest` attribute seen is appended to `manifest_digests`.
    /// Returns `None` if the file contributes nothing: either its `Signature-Version`
    /// isn't supported, or none of its verified signers has a certificate.
    pub fn verify(
        &self,
        digester: &ManifestDigester,
        limits: &Limits,
        manifest_digests: &mut Vec<(String, String)>,
    ) -> Result<Option<FileContribution>> {
        let signature_file = self
            .signature_file
            .as_deref()
            .or(self.container.content())
            .ok_or_else(|| VerifyError::MissingSignatureFile {
                name: self.name.clone(),
            })?;
        let len = signature_file.len() as u64;
        if len > limits.max_signature_file_len {
            return Err(VerifyError::SignatureFileTooLarge {
                len,
                limit: limits.max_signature_file_len,
            });
        }

        let mut stream = SignatureFileStream::new(&self.container, digester, manifest_digests);
        for chunk in signature_file.chunks(limits.effective_chunk_size()) {
            if stream.update(chunk)?.is_break() {
                debug!("{}: unsupported signature file version, ignoring", self.name);
                return Ok(None);
            }
        }
        let Some(streamed) = stream.finish()? else {
            debug!("{}: unsupported signature file version, ignoring", self.name);
            return Ok(None);
        };

        if streamed.records.is_empty() {
            return Err(VerifyError::NoVerifyingSigner {
                name: self.name.clone(),
            });
        }

        let Some(signers) = derive_signers(&self.container, &streamed.records)? else {
            return Ok(None);
        };

        let mut entries = vec![];
        if streamed.whole_manifest_trusted {
            entries.extend(digester.entry_names().map(normalize_entry_name));
        } else {
            verify_main_attributes_digest(streamed.parser.main_attributes(), digester)?;

            let mut state = VerificationState::default();
            for (name, attrs) in streamed.parser.entries() {
                if verify_section(attrs, name, digester, &mut state)? {
                    debug!("processSignature signed name = {name}");
                    entries.push(normalize_entry_name(name));
                } else {
                    debug!("processSignature unsigned name = {name}");
                }
            }
        }
        entries.push(MANIFEST_NAME.to_owned());

        Ok(Some(FileContribution {
            signers: Arc::from(signers),
            entries,
        }))
    }

    /// Verify this signature file and merge its signers into `cache`.
    ///
    /// Nothing is merged if verification fails.
    pub fn process(
        self,
        digester: &ManifestDigester,
        limits: &Limits,
        manifest_digests: &mut Vec<(String, String)>,
        cache: &mut SignerCache,
    ) -> Result<()> {
        if let Some(contribution) = self.verify(digester, limits, manifest_digests)? {
            contribution.merge_into(cache);
        }
        Ok(())
    }
}

/// The streaming pass over one signature file.
struct SignatureFileStream<'c, 'a> {
    verifiers: Vec<SignerVerifier<'c>>,
    parser: SignatureFileParser,
    state: StreamState,
    digester: &'a ManifestDigester,
    manifest_digests: &'a mut Vec<(String, String)>,
}

struct Streamed<'c> {
    records: Vec<&'c SignerRecord>,
    parser: SignatureFileParser,
    whole_manifest_trusted: bool,
}

impl<'c, 'a> SignatureFileStream<'c, 'a> {
    fn new(
        container: &'c SignatureContainer,
        digester: &'a ManifestDigester,
        manifest_digests: &'a mut Vec<(String, String)>,
    ) -> Self {
        Self {
            verifiers: container.verifiers(),
            parser: SignatureFileParser::new(),
            state: StreamState::AccumulatingAttributes,
            digester,
            manifest_digests,
        }
    }

    /// Feed one chunk.  Breaks if the file turns out to have an unsupported version.
    fn update(&mut self, chunk: &[u8]) -> Result<ControlFlow<()>> {
        debug_assert!(self.state.wants_verifier_bytes());
        for verifier in &mut self.verifiers {
            verifier.update(chunk);
        }
        if self.state.wants_attributes() {
            self.parser.update(chunk)?;
            return Ok(self.observe_main_attributes());
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Decide whole-manifest trust as soon as the main attributes are complete.
    fn observe_main_attributes(&mut self) -> ControlFlow<()> {
        if self.state != StreamState::AccumulatingAttributes {
            return ControlFlow::Continue(());
        }
        let Some(main) = self.parser.main_attributes() else {
            return ControlFlow::Continue(());
        };
        if !is_supported_version(main) {
            return ControlFlow::Break(());
        }

        let trusted = try_whole_manifest_trust(main, self.digester, self.manifest_digests);
        self.state = StreamState::WholeManifestDecided(trusted);
        ControlFlow::Continue(())
    }

    /// End of stream.  Returns `None` if the file has an unsupported version.
    fn finish(mut self) -> Result<Option<Streamed<'c>>> {
        if self.state.wants_attributes() {
            self.parser.finish()?;
            if self.observe_main_attributes().is_break() {
                return Ok(None);
            }
        }
        let whole_manifest_trusted = self.state == StreamState::WholeManifestDecided(true);
        self.state = StreamState::Done;

        let records = self
            .verifiers
            .into_iter()
            .filter_map(SignerVerifier::verify)
            .collect();

        Ok(Some(Streamed {
            records,
            parser: self.parser,
            whole_manifest_trusted,
        }))
    }
}

fn is_supported_version(main: &Attributes) -> bool {
    main.get(SIGNATURE_VERSION)
        .is_some_and(|version| version.eq_ignore_ascii_case(SUPPORTED_VERSION))
}

/// Strip a leading `./`, then a leading `/`.
fn normalize_entry_name(name: &str) -> String {
    let name = name.strip_prefix("./").unwrap_or(name);
    name.strip_prefix('/').unwrap_or(name).to_owned()
}

/// Check the `<ALG>-Digest-Manifest` attributes against the whole manifest.
///
/// Returns `true` if any supported algorithm matches.  Every such attribute is recorded
/// in `manifest_digests`, matching or not.
pub fn try_whole_manifest_trust(
    main: &Attributes,
    digester: &ManifestDigester,
    manifest_digests: &mut Vec<(String, String)>,
) -> bool {
    let mut trusted = false;

    for (key, value) in main.iter() {
        let Some(name) = strip_digest_suffix(key, DIGEST_MANIFEST_SUFFIX) else {
            continue;
        };
        manifest_digests.push((key.to_owned(), value.to_owned()));

        let Some(algorithm) = DigestAlgorithm::from_name(name) else {
            debug!("skipping unsupported manifest digest algorithm {name}");
            continue;
        };
        let computed = digester.manifest_digest(algorithm);
        let expected = decode_expected(value).unwrap_or_default();
        debug!(
            "Signature File: Manifest digest {algorithm}\n  sigfile  {}\n  computed {}",
            to_hex(&expected),
            to_hex(&computed)
        );

        if digests_equal(&computed, &expected) {
            trusted = true;
        }
    }

    trusted
}

/// Check the `<ALG>-Digest-Manifest-Main-Attributes` attributes.
///
/// Fails on the first mismatch.  A file without such attributes passes.
pub fn verify_main_attributes_digest(
    main: Option<&Attributes>,
    digester: &ManifestDigester,
) -> Result<()> {
    let Some(main) = main else {
        return Ok(());
    };

    for (key, value) in main.iter() {
        let Some(name) = strip_digest_suffix(key, DIGEST_MAIN_ATTRIBUTES_SUFFIX) else {
            continue;
        };
        let Some(algorithm) = DigestAlgorithm::from_name(name) else {
            debug!("skipping unsupported main attributes digest algorithm {name}");
            continue;
        };

        let Some(computed) = digester.main_attributes_digest(algorithm) else {
            return Err(VerifyError::MainAttributesDigestMismatch);
        };
        let expected = decode_expected(value).unwrap_or_default();
        debug!(
            "Signature File: Manifest Main Attributes digest {algorithm}\n  sigfile  {}\n  computed {}",
            to_hex(&expected),
            to_hex(&computed)
        );

        if !digests_equal(&computed, &expected) {
            return Err(VerifyError::MainAttributesDigestMismatch);
        }
    }

    Ok(())
}

/// Check the `<ALG>-Digest` attributes of one signature-file section against the
/// manifest section named `name`.
///
/// Returns `false` if the section has no digest attribute with a supported algorithm.
/// A section that only matches in its legacy form turns on the workaround for every
/// later section of the same file.
pub fn verify_section(
    attrs: &Attributes,
    name: &str,
    digester: &ManifestDigester,
    state: &mut VerificationState,
) -> Result<bool> {
    let entry = digester
        .get(name)
        .ok_or_else(|| VerifyError::MissingManifestSection {
            entry: name.to_owned(),
        })?;

    let mut verified = false;
    for (key, value) in attrs.iter() {
        let Some(alg_name) = strip_digest_suffix(key, DIGEST_SUFFIX) else {
            continue;
        };
        let Some(algorithm) = DigestAlgorithm::from_name(alg_name) else {
            debug!("skipping unsupported section digest algorithm {alg_name}");
            continue;
        };
        let expected = decode_expected(value).unwrap_or_default();

        let computed = if state.workaround_active {
            digester.digest_workaround(entry, algorithm)
        } else {
            digester.digest(entry, algorithm)
        };
        debug!(
            "Signature Block File: {name} digest={algorithm}\n  expected {}\n  computed {}",
            to_hex(&expected),
            to_hex(&computed)
        );

        if digests_equal(&computed, &expected) {
            verified = true;
            continue;
        }

        if !state.workaround_active {
            let computed = digester.digest_workaround(entry, algorithm);
            debug!(
                "re-computed {name} digest={algorithm} using workaround\n  computed {}",
                to_hex(&computed)
            );
            if digests_equal(&computed, &expected) {
                state.workaround_active = true;
                verified = true;
                continue;
            }
        }

        return Err(VerifyError::SectionDigestMismatch {
            algorithm: algorithm.as_str(),
            entry: name.to_owned(),
        });
    }

    Ok(verified)
}
