//! Code-signer identities derived from verified signer records.

use std::{fmt, sync::Arc, time::SystemTime};

use der::Encode;
use log::debug;
use x509_cert::Certificate;

use crate::{
    error::{Result, VerifyError},
    pkcs7::{tst_info_gen_time, SignatureContainer, SignerRecord},
};

/// A certificate chain as presented in a signature block, leaf first.
#[derive(Clone, PartialEq, Eq)]
pub struct CertPath {
    certificates: Vec<Certificate>,
}

impl CertPath {
    pub fn new(certificates: Vec<Certificate>) -> Self {
        Self { certificates }
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    pub fn leaf(&self) -> Option<&Certificate> {
        self.certificates.first()
    }

    /// DER encodings of the chain, leaf first.
    pub fn to_der(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .certificates
            .iter()
            .map(|cert| cert.to_der())
            .collect::<der::Result<_>>()?)
    }
}

impl fmt::Debug for CertPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // full certificates are far too noisy for debug output
        f.debug_list()
            .entries(
                self.certificates
                    .iter()
                    .map(|cert| cert.tbs_certificate.subject.to_string()),
            )
            .finish()
    }
}

/// A trusted timestamp: when the signature was made, and who attested it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamp {
    pub time: SystemTime,
    pub tsa_chain: CertPath,
}

/// One entity's attested authorship: a certificate chain plus an optional timestamp.
///
/// Two identities are equal when both chain and timestamp are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSigner {
    pub chain: CertPath,
    pub timestamp: Option<Timestamp>,
}

impl CodeSigner {
    /// Subject of the leaf certificate, for display.
    pub fn subject(&self) -> String {
        self.chain
            .leaf()
            .map(|cert| cert.tbs_certificate.subject.to_string())
            .unwrap_or_default()
    }
}

/// Build one [`CodeSigner`] per verified record.
///
/// This is done once per signature block; every entry the block signs shares the
/// resulting identities.  Returns `None` if no record yields a usable certificate chain.
pub fn derive_signers(
    container: &SignatureContainer,
    records: &[&SignerRecord],
) -> Result<Option<Vec<Arc<CodeSigner>>>> {
    let mut signers = vec![];

    for record in records {
        let Some(chain) = container.certificate_chain(record) else {
            debug!("verified signer has no certificate in the block, skipping");
            continue;
        };
        let chain = CertPath::new(chain);
        let timestamp = record.timestamp_token().map(parse_timestamp).transpose()?;
        debug!("Signature Block Certificate: {chain:?}");
        signers.push(Arc::new(CodeSigner { chain, timestamp }));
    }

    Ok((!signers.is_empty()).then_some(signers))
}

/// Parse and verify an RFC 3161 timestamp token.
///
/// The token is itself a signature block whose embedded content is a `TSTInfo`; it must
/// verify against that content.  The first verifying signer is taken as the TSA.
pub fn parse_timestamp(token: &[u8]) -> Result<Timestamp> {
    let container = SignatureContainer::from_der(token)?;
    let content = container
        .content()
        .ok_or_else(|| VerifyError::Timestamp("token has no embedded TSTInfo".into()))?;

    let tsa = container
        .verifiers()
        .into_iter()
        .find_map(|mut verifier| {
            verifier.update(content);
            verifier.verify()
        })
        .ok_or_else(|| VerifyError::Timestamp("token signature does not verify".into()))?;
    let tsa_chain = container
        .certificate_chain(tsa)
        .map(CertPath::new)
        .ok_or_else(|| VerifyError::Timestamp("TSA certificate missing".into()))?;

    Ok(Timestamp {
        time: tst_info_gen_time(content)?,
        tsa_chain,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use openssl::pkcs7::Pkcs7Flags;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::test::{sign, tst_info, CA, LEAF, OTHER};

    const CONTENT: &[u8] = b"Signature-Version: 1.0\n\n";

    fn verified(container: &SignatureContainer) -> Vec<&SignerRecord> {
        container
            .verifiers()
            .into_iter()
            .filter_map(|mut verifier| {
                verifier.update(CONTENT);
                verifier.verify()
            })
            .collect()
    }

    #[test]
    fn test_derive_signers() {
        let container =
            SignatureContainer::from_der(&sign(&LEAF, &[&CA.cert], CONTENT, Pkcs7Flags::DETACHED))
                .unwrap();
        let records = verified(&container);
        let signers = derive_signers(&container, &records).unwrap().unwrap();
        assert_eq!(signers.len(), 1);
        assert_eq!(signers[0].chain.certificates().len(), 2);
        assert_eq!(signers[0].timestamp, None);
        assert!(signers[0].subject().contains("jarsig-test-leaf"));
    }

    #[test]
    fn test_identity_equality() {
        let a = SignatureContainer::from_der(&sign(&LEAF, &[], CONTENT, Pkcs7Flags::DETACHED))
            .unwrap();
        let b = SignatureContainer::from_der(&sign(
            &LEAF,
            &[],
            b"different content",
            Pkcs7Flags::NOATTR,
        ))
        .unwrap();
        let c = SignatureContainer::from_der(&sign(&OTHER, &[], CONTENT, Pkcs7Flags::DETACHED))
            .unwrap();

        let chain = |container: &SignatureContainer| {
            CertPath::new(container.certificate_chain(&container.signers()[0]).unwrap())
        };
        let signer = |chain| CodeSigner {
            chain,
            timestamp: None,
        };

        // same certificate in two different blocks is the same identity
        assert_eq!(signer(chain(&a)), signer(chain(&b)));
        assert!(signer(chain(&a)) != signer(chain(&c)));

        let stamped = CodeSigner {
            chain: chain(&a),
            timestamp: Some(Timestamp {
                time: SystemTime::UNIX_EPOCH,
                tsa_chain: chain(&c),
            }),
        };
        assert!(stamped != signer(chain(&a)));
    }

    #[test]
    fn test_no_verified_records() {
        let container =
            SignatureContainer::from_der(&sign(&LEAF, &[], CONTENT, Pkcs7Flags::DETACHED))
                .unwrap();
        assert!(derive_signers(&container, &[]).unwrap().is_none());
    }

    #[test]
    fn test_timestamp() {
        let token = sign(&OTHER, &[&CA.cert], &tst_info("20240102030405Z"), Pkcs7Flags::empty());
        let timestamp = parse_timestamp(&token).unwrap();
        assert_eq!(
            timestamp.time,
            SystemTime::UNIX_EPOCH + Duration::from_secs(1704164645)
        );
        assert_eq!(timestamp.tsa_chain.certificates().len(), 2);

        // attach it to a signer record and derive through the normal path
        let container =
            SignatureContainer::from_der(&sign(&LEAF, &[], CONTENT, Pkcs7Flags::DETACHED))
                .unwrap();
        let mut record = container.signers()[0].clone();
        record.timestamp_token = Some(token);
        let signers = derive_signers(&container, &[&record]).unwrap().unwrap();
        assert_eq!(signers[0].timestamp.as_ref(), Some(&timestamp));
    }

    #[test]
    fn test_bad_timestamp_tokens() {
        // detached: no TSTInfo to verify against
        let detached = sign(&OTHER, &[], &tst_info("20240102030405Z"), Pkcs7Flags::DETACHED);
        assert!(matches!(
            parse_timestamp(&detached),
            Err(VerifyError::Timestamp(_))
        ));

        // embedded content that isn't a TSTInfo
        let bogus = sign(&OTHER, &[], b"hello", Pkcs7Flags::empty());
        assert!(parse_timestamp(&bogus).is_err());

        assert!(parse_timestamp(b"garbage").is_err());
    }
}
