use httpshare_server::certs::{self, Fingerprint, CERT_FILE, KEY_FILE};
use sha1::{Digest, Sha1};

#[test]
fn issuing_twice_reuses_material() {
    let dir = tempfile::tempdir().unwrap();

    let first = certs::issue(dir.path(), "192.168.0.10").unwrap();
    assert!(!first.reused);
    assert_eq!(first.cert_path, dir.path().join(CERT_FILE));
    assert_eq!(first.key_path, dir.path().join(KEY_FILE));
    let cert_pem = std::fs::read(&first.cert_path).unwrap();
    let key_pem = std::fs::read(&first.key_path).unwrap();

    let second = certs::issue(dir.path(), "192.168.0.10").unwrap();
    assert!(second.reused);
    assert_eq!(second.cert_path, first.cert_path);
    assert_eq!(second.key_path, first.key_path);
    assert_eq!(second.fingerprint, first.fingerprint);
    assert_eq!(std::fs::read(&second.cert_path).unwrap(), cert_pem);
    assert_eq!(std::fs::read(&second.key_path).unwrap(), key_pem);
}

#[test]
fn fingerprint_matches_written_pem() {
    let dir = tempfile::tempdir().unwrap();
    let issued = certs::issue(dir.path(), "share.example,10.0.0.4").unwrap();

    assert_eq!(
        Fingerprint::of_pem_file(&issued.cert_path).unwrap(),
        issued.fingerprint
    );

    // Independent re-read: strip the PEM armour and digest the DER.
    let pem = std::fs::read(&issued.cert_path).unwrap();
    let der = rustls_pemfile::certs(&mut pem.as_slice())
        .next()
        .unwrap()
        .unwrap();
    let expected = Sha1::digest(der.as_ref())
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":");
    assert_eq!(issued.fingerprint.sha1, expected);
}

#[test]
fn fresh_directories_get_distinct_certificates() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    let fa = certs::issue(a.path(), "localhost").unwrap().fingerprint;
    let fb = certs::issue(b.path(), "localhost").unwrap().fingerprint;
    assert_ne!(fa, fb);
}

#[test]
fn written_key_is_a_pem_private_key() {
    let dir = tempfile::tempdir().unwrap();
    let issued = certs::issue(dir.path(), "localhost").unwrap();
    let key = std::fs::read(&issued.key_path).unwrap();
    assert!(rustls_pemfile::private_key(&mut key.as_slice())
        .unwrap()
        .is_some());
}
