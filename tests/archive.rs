use std::{fs, path::Path, process::Command};

use openssl::pkcs7::Pkcs7Flags;
use similar_asserts::assert_eq;
use tempfile::TempDir;

use jarsig::{archive::UnpackedArchive, Limits, ManifestDigester, VerifyError, MANIFEST_NAME};

mod common;
use common::*;

fn write(root: &Path, name: &str, data: &[u8]) {
    let path = root.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

/// An unpacked archive signed by LEAF (detached) and OTHER (embedded), plus a broken
/// block and a block whose signature file is missing.
fn unpacked_archive() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let names = ["a.txt", "dir/b.txt"];
    let raw = manifest(&names);
    let md = ManifestDigester::new(raw.clone());
    let sf = signature_file_for(&md, &names);

    write(dir.path(), MANIFEST_NAME, &raw);
    write(
        dir.path(),
        "META-INF/LEAF.RSA",
        &sign(&LEAF, &[&CA.cert], &sf, Pkcs7Flags::DETACHED),
    );
    write(dir.path(), "META-INF/leaf.sf", &sf);
    write(
        dir.path(),
        "META-INF/OTHER.EC",
        &sign(&OTHER, &[&CA.cert], &sf, Pkcs7Flags::empty()),
    );
    write(dir.path(), "META-INF/BROKEN.DSA", b"not a signature block");
    write(
        dir.path(),
        "META-INF/LONELY.RSA",
        &sign(&LEAF, &[], &sf, Pkcs7Flags::DETACHED),
    );
    for name in names {
        write(dir.path(), name, name.as_bytes());
    }
    dir
}

#[tokio::test]
async fn test_verify_unpacked_archive() {
    let dir = unpacked_archive();
    let archive = UnpackedArchive::open(dir.path()).unwrap();
    assert_eq!(archive.verifiers.len(), 3);
    assert_eq!(archive.failures.len(), 1);

    let report = archive.verify(&Limits::default()).await.unwrap();

    let mut signed: Vec<&str> = report.entries.keys().map(String::as_str).collect();
    signed.sort();
    assert_eq!(signed, vec![MANIFEST_NAME, "a.txt", "dir/b.txt"]);
    for name in &signed {
        assert_eq!(report.signers(name).unwrap().len(), 2, "{name}");
    }
    assert!(!report.is_signed("META-INF/LEAF.RSA"));
    assert_eq!(report.distinct_signer_sets, 2);

    let failed: Vec<&str> = report.failures.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(failed, vec!["META-INF/BROKEN.DSA", "META-INF/LONELY.RSA"]);
    assert!(matches!(report.failures[0].1, VerifyError::Der(_)));
    assert!(matches!(
        report.failures[1].1,
        VerifyError::MissingSignatureFile { .. }
    ));
}

#[tokio::test]
async fn test_blocks_sharing_a_signature_file() {
    let dir = tempfile::tempdir().unwrap();
    let names = ["a.txt"];
    let raw = manifest(&names);
    let md = ManifestDigester::new(raw.clone());
    let sf = signature_file(
        &[
            "Signature-Version: 1.0",
            &format!("SHA-256-Digest-Manifest: {}", manifest_digest(&md)),
        ],
        &[("a.txt", section_digest(&md, "a.txt"))],
    );

    write(dir.path(), MANIFEST_NAME, &raw);
    write(dir.path(), "META-INF/SIGNER.SF", &sf);
    write(
        dir.path(),
        "META-INF/SIGNER.RSA",
        &sign(&LEAF, &[&CA.cert], &sf, Pkcs7Flags::DETACHED),
    );
    write(
        dir.path(),
        "META-INF/SIGNER.DSA",
        &sign(&OTHER, &[&CA.cert], &sf, Pkcs7Flags::DETACHED),
    );

    let report = UnpackedArchive::open(dir.path())
        .unwrap()
        .verify(&Limits::default())
        .await
        .unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(report.signers("a.txt").unwrap().len(), 2);

    let files: Vec<&str> = report.manifest_digests.keys().map(String::as_str).collect();
    assert_eq!(files, vec!["META-INF/SIGNER.DSA", "META-INF/SIGNER.RSA"]);
    for digests in report.manifest_digests.values() {
        assert_eq!(
            digests,
            &vec![("SHA-256-Digest-Manifest".to_owned(), manifest_digest(&md))]
        );
    }
}

#[test]
fn test_open_without_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let err = UnpackedArchive::open(dir.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Reading manifest"));
}

#[test]
fn test_cli_verify() {
    let dir = unpacked_archive();
    let output = Command::new(env!("CARGO_BIN_EXE_jarsig"))
        .arg("verify")
        .arg(dir.path())
        .args(["--chunk-size", "5"])
        .output()
        .unwrap();

    // the broken blocks make the run fail, but the signed entries are still listed
    assert!(!output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("META-INF/MANIFEST.MF: "));
    assert!(lines[1].starts_with("a.txt: "));
    assert!(lines[1].contains("jarsig-test-leaf"));
    assert!(lines[1].contains("jarsig-test-other"));

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("META-INF/BROKEN.DSA"));
    assert!(stderr.contains("META-INF/LONELY.RSA"));
}

#[test]
fn test_cli_digest() {
    let dir = tempfile::tempdir().unwrap();
    let raw = manifest(&["a.txt"]);
    write(dir.path(), "MANIFEST.MF", &raw);
    let md = ManifestDigester::new(raw);

    let output = Command::new(env!("CARGO_BIN_EXE_jarsig"))
        .arg("digest")
        .arg(dir.path().join("MANIFEST.MF"))
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let expected = format!(
        "SHA-256-Digest-Manifest: {}\nSHA-256-Digest-Manifest-Main-Attributes: {}\n\nName: a.txt\nSHA-256-Digest: {}\nSHA-256-Digest (legacy): {}\n",
        manifest_digest(&md),
        jarsig::digest::encode_digest(&md.main_attributes_digest(SHA256).unwrap()),
        section_digest(&md, "a.txt"),
        legacy_section_digest(&md, "a.txt"),
    );
    assert_eq!(stdout, expected);

    let output = Command::new(env!("CARGO_BIN_EXE_jarsig"))
        .arg("digest")
        .args(["--algorithm", "MD5"])
        .arg(dir.path().join("MANIFEST.MF"))
        .output()
        .unwrap();
    assert!(!output.status.success());
}
