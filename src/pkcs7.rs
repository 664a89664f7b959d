//! PKCS#7 / CMS `SignedData` signature blocks.
//!
//! A signature block (`.RSA`, `.DSA` or `.EC` file) is decoded once into plain data: the
//! optional embedded content, the certificate bag, and one [`SignerRecord`] per signer.
//! Verification is streaming: a [`SignerVerifier`] is fed the signed content in chunks
//! and finalized once, so a large signature file never has to be buffered to check the
//! block's own signatures.
//!
//! Only the public-key step is delegated to OpenSSL.  Certificates are parsed with
//! `x509-cert` so that chains can be compared by value.

use std::time::{Duration, SystemTime};

use cms::{
    cert::CertificateChoices,
    content_info::ContentInfo,
    signed_data::{SignedData, SignerIdentifier, SignerInfo},
};
use der::{
    asn1::{AnyRef, ObjectIdentifier},
    Decode, Encode, Reader, SliceReader, Tag, Tagged,
};
use log::debug;
use openssl::{md::Md, md::MdRef, pkey_ctx::PkeyCtx, x509::X509};
use x509_cert::{ext::pkix::SubjectKeyIdentifier, Certificate};

use crate::{
    digest::{digests_equal, DigestAlgorithm, Hasher},
    error::{Result, VerifyError},
};

const OID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const OID_MESSAGE_DIGEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
const OID_SUBJECT_KEY_IDENTIFIER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.14");

/// `id-aa-signatureTimeStampToken`, the unsigned attribute holding an RFC 3161 token.
pub const OID_TIMESTAMP_TOKEN: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");

/// Signed attributes of one signer.
#[derive(Debug, Clone)]
pub struct SignedAttributes {
    /// DER encoding of the attribute SET; this is what the signature covers.
    der: Vec<u8>,
    /// Value of the `messageDigest` attribute.
    message_digest: Option<Vec<u8>>,
}

/// One signer inside a signature block.
#[derive(Debug, Clone)]
pub struct SignerRecord {
    sid: SignerIdentifier,
    /// `None` if the block uses a digest algorithm we don't support.
    digest_algorithm: Option<DigestAlgorithm>,
    signed_attrs: Option<SignedAttributes>,
    signature: Vec<u8>,
    pub(crate) timestamp_token: Option<Vec<u8>>,
}

impl SignerRecord {
    fn from_signer_info(info: &SignerInfo) -> Result<Self> {
        let digest_algorithm = DigestAlgorithm::from_oid(&info.digest_alg.oid);
        if digest_algorithm.is_none() {
            debug!("unsupported signer digest algorithm {}", info.digest_alg.oid);
        }

        let signed_attrs = match &info.signed_attrs {
            Some(attrs) => {
                let message_digest = attrs
                    .iter()
                    .find(|attr| attr.oid == OID_MESSAGE_DIGEST)
                    .and_then(|attr| attr.values.iter().next())
                    .filter(|value| value.tag() == Tag::OctetString)
                    .map(|value| value.value().to_vec());
                Some(SignedAttributes {
                    der: attrs.to_der()?,
                    message_digest,
                })
            }
            None => None,
        };

        let timestamp_token = match &info.unsigned_attrs {
            Some(attrs) => attrs
                .iter()
                .find(|attr| attr.oid == OID_TIMESTAMP_TOKEN)
                .and_then(|attr| attr.values.iter().next())
                .map(|value| value.to_der())
                .transpose()?,
            None => None,
        };

        Ok(Self {
            sid: info.sid.clone(),
            digest_algorithm,
            signed_attrs,
            signature: info.signature.as_bytes().to_vec(),
            timestamp_token,
        })
    }

    pub fn digest_algorithm(&self) -> Option<DigestAlgorithm> {
        self.digest_algorithm
    }

    /// DER encoding of the RFC 3161 timestamp token in the unsigned attributes, if any.
    pub fn timestamp_token(&self) -> Option<&[u8]> {
        self.timestamp_token.as_deref()
    }
}

/// A decoded signature block.
#[derive(Debug, Clone)]
pub struct SignatureContainer {
    content: Option<Vec<u8>>,
    certificates: Vec<Certificate>,
    signers: Vec<SignerRecord>,
}

impl SignatureContainer {
    /// Decode a DER `ContentInfo` wrapping `SignedData`.
    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        let info = ContentInfo::from_der(bytes)?;
        if info.content_type != OID_SIGNED_DATA {
            return Err(VerifyError::MalformedContainer(format!(
                "content type {} is not signedData",
                info.content_type
            )));
        }
        let signed = SignedData::from_der(&info.content.to_der()?)?;

        let content = match &signed.encap_content_info.econtent {
            // CMS wraps the content in an OCTET STRING; PKCS#7 may embed it directly
            Some(any) if any.tag() == Tag::OctetString => Some(any.value().to_vec()),
            Some(any) => Some(any.to_der()?),
            None => None,
        };

        let certificates = signed
            .certificates
            .as_ref()
            .map(|set| {
                set.0
                    .iter()
                    .filter_map(|choice| match choice {
                        CertificateChoices::Certificate(cert) => Some(cert.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let signers = signed
            .signer_infos
            .0
            .iter()
            .map(SignerRecord::from_signer_info)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            content,
            certificates,
            signers,
        })
    }

    /// The embedded content, or `None` for a detached signature.
    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    pub fn signers(&self) -> &[SignerRecord] {
        &self.signers
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// One streaming verifier per signer record, in record order.
    pub fn verifiers(&self) -> Vec<SignerVerifier<'_>> {
        self.signers
            .iter()
            .map(|record| SignerVerifier {
                container: self,
                record,
                hasher: record.digest_algorithm.map(|alg| alg.hasher()),
            })
            .collect()
    }

    /// The certificate named by a signer identifier.
    pub fn find_certificate(&self, sid: &SignerIdentifier) -> Option<&Certificate> {
        self.certificates.iter().find(|cert| match sid {
            SignerIdentifier::IssuerAndSerialNumber(isn) => {
                cert.tbs_certificate.issuer == isn.issuer
                    && cert.tbs_certificate.serial_number == isn.serial_number
            }
            SignerIdentifier::SubjectKeyIdentifier(ski) => {
                subject_key_identifier(cert).is_some_and(|id| id.0 == ski.0)
            }
        })
    }

    /// Assemble the certificate chain of a signer, leaf first, as presented in the block.
    ///
    /// Issuers are found by subject name.  Assembly stops at a self-issued certificate,
    /// at an issuer that isn't in the block, or on a cycle.  No trust decisions are made.
    pub fn certificate_chain(&self, record: &SignerRecord) -> Option<Vec<Certificate>> {
        let leaf = self.find_certificate(&record.sid)?;
        let mut chain = vec![leaf.clone()];
        let mut current = leaf;

        loop {
            let tbs = &current.tbs_certificate;
            if tbs.issuer == tbs.subject {
                break;
            }
            let Some(issuer) = self
                .certificates
                .iter()
                .find(|cert| cert.tbs_certificate.subject == tbs.issuer)
            else {
                break;
            };
            if chain.contains(issuer) {
                break;
            }
            chain.push(issuer.clone());
            current = issuer;
        }

        Some(chain)
    }
}

fn subject_key_identifier(cert: &Certificate) -> Option<SubjectKeyIdentifier> {
    cert.tbs_certificate
        .extensions
        .as_ref()?
        .iter()
        .find(|ext| ext.extn_id == OID_SUBJECT_KEY_IDENTIFIER)
        .and_then(|ext| SubjectKeyIdentifier::from_der(ext.extn_value.as_bytes()).ok())
}

/// Streaming verification of one signer's signature over the signed content.
#[derive(Debug)]
pub struct SignerVerifier<'c> {
    container: &'c SignatureContainer,
    record: &'c SignerRecord,
    hasher: Option<Hasher>,
}

impl<'c> SignerVerifier<'c> {
    pub fn update(&mut self, data: &[u8]) {
        if let Some(hasher) = &mut self.hasher {
            hasher.update(data);
        }
    }

    /// Finish the computation.  Returns the record if its signature is valid.
    ///
    /// Anything that prevents verification (unsupported algorithm, missing certificate,
    /// key type OpenSSL can't handle) means the record doesn't verify.
    pub fn verify(self) -> Option<&'c SignerRecord> {
        let (Some(algorithm), Some(hasher)) = (self.record.digest_algorithm, self.hasher) else {
            return None;
        };
        let content_digest = hasher.finalize();

        let signed_digest = match &self.record.signed_attrs {
            Some(attrs) => {
                match &attrs.message_digest {
                    Some(expected) if digests_equal(&content_digest, expected) => {}
                    _ => {
                        debug!("signer messageDigest does not match the signed content");
                        return None;
                    }
                }
                algorithm.digest(&attrs.der)
            }
            None => content_digest,
        };

        let Some(cert) = self.container.find_certificate(&self.record.sid) else {
            debug!("signer certificate not present in signature block");
            return None;
        };

        match verify_digest_signature(cert, algorithm, &signed_digest, &self.record.signature) {
            Ok(true) => Some(self.record),
            Ok(false) => {
                debug!("signer signature does not verify");
                None
            }
            Err(err) => {
                debug!("signer signature could not be checked: {err}");
                None
            }
        }
    }
}

fn openssl_md(algorithm: DigestAlgorithm) -> &'static MdRef {
    match algorithm {
        DigestAlgorithm::Sha1 => Md::sha1(),
        DigestAlgorithm::Sha224 => Md::sha224(),
        DigestAlgorithm::Sha256 => Md::sha256(),
        DigestAlgorithm::Sha384 => Md::sha384(),
        DigestAlgorithm::Sha512 => Md::sha512(),
    }
}

fn verify_digest_signature(
    cert: &Certificate,
    algorithm: DigestAlgorithm,
    digest: &[u8],
    signature: &[u8],
) -> Result<bool> {
    let cert = X509::from_der(&cert.to_der()?)?;
    let key = cert.public_key()?;
    let mut ctx = PkeyCtx::new(&key)?;
    ctx.verify_init()?;
    ctx.set_signature_md(openssl_md(algorithm))?;
    Ok(ctx.verify(digest, signature)?)
}

/// Extract `genTime` from a DER `TSTInfo`.
///
/// Fractional seconds are accepted and dropped.
pub fn tst_info_gen_time(tst_info: &[u8]) -> Result<SystemTime> {
    let invalid = |what: &str| VerifyError::Timestamp(format!("TSTInfo: {what}"));

    let seq = AnyRef::from_der(tst_info)?;
    if seq.tag() != Tag::Sequence {
        return Err(invalid("not a SEQUENCE"));
    }
    let mut reader = SliceReader::new(seq.value())?;
    // version, policy, messageImprint, serialNumber
    for _ in 0..4 {
        let _: AnyRef<'_> = reader.decode()?;
    }
    let gen_time: AnyRef<'_> = reader.decode()?;
    if gen_time.tag() != Tag::GeneralizedTime {
        return Err(invalid("genTime is not a GeneralizedTime"));
    }

    let text = std::str::from_utf8(gen_time.value()).map_err(|_| invalid("genTime not ASCII"))?;
    let text = text
        .strip_suffix('Z')
        .ok_or_else(|| invalid("genTime not in UTC"))?;
    let whole = text.split('.').next().unwrap_or_default();
    if whole.len() != 14 || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("malformed genTime"));
    }
    let field = |range: std::ops::Range<usize>| -> u8 { whole[range].parse().unwrap_or(u8::MAX) };
    let year: u16 = whole[0..4].parse().map_err(|_| invalid("malformed genTime"))?;
    let datetime = der::DateTime::new(
        year,
        field(4..6),
        field(6..8),
        field(8..10),
        field(10..12),
        field(12..14),
    )?;

    Ok(SystemTime::UNIX_EPOCH + Duration::from_secs(datetime.unix_duration().as_secs()))
}
