//! Self-signed TLS identity for a share session.
//!
//! There is no CA behind these certificates. Peers verify them by comparing
//! the fingerprint logged at startup with the one their client shows, so the
//! fingerprint has to be communicated out-of-band.
//!
//! Material is cached in a directory: if `cert.pem` and `key.pem` already
//! exist and parse, they are reused. Under [`ReusePolicy::Always`] presence
//! is the only criterion, so a cached certificate issued for another host or
//! already expired is still served. [`ReusePolicy::MatchHosts`] reissues in
//! those cases. Two processes issuing into the same empty directory at the
//! same time race; the last writer wins.

use std::fs;
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use rand::{rngs::OsRng, RngCore};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Ia5String, IsCa,
    KeyPair, KeyUsagePurpose, SanType, SerialNumber, SignatureAlgorithm,
};
use rustls_pemfile::Item;
use rustls_pki_types::CertificateDer;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use zeroize::Zeroizing;

pub const CERT_FILE: &str = "cert.pem";
pub const KEY_FILE: &str = "key.pem";
pub const ORGANIZATION: &str = "httpshare";
pub const VALIDITY_DAYS: i64 = 365;

/// When cached material in the target directory may be served again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReusePolicy {
    /// Reuse whenever both files exist and parse.
    #[default]
    Always,
    /// Reuse only if the cached certificate names exactly the announced hosts
    /// and has not expired.
    MatchHosts,
}

#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("no host given to issue a certificate for")]
    NoHost,
    #[error("host {0:?} is neither an IP address nor a valid DNS name")]
    InvalidHost(String),
    #[error("failed to generate serial number: {0}")]
    Serial(#[from] rand::Error),
    #[error("failed to generate private key: {0}")]
    KeyGen(#[source] rcgen::Error),
    #[error("failed to create certificate: {0}")]
    Sign(#[source] rcgen::Error),
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("{} does not contain a PEM certificate", .0.display())]
    NoCertificate(PathBuf),
}

/// Digests of a DER certificate, formatted as colon-separated uppercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub sha1: String,
    pub sha256: String,
}

impl Fingerprint {
    pub fn of_der(der: &[u8]) -> Self {
        Self {
            sha1: colon_hex(&Sha1::digest(der)),
            sha256: colon_hex(&Sha256::digest(der)),
        }
    }

    /// Re-read a PEM certificate from disk and digest its first certificate.
    pub fn of_pem_file(path: &Path) -> Result<Self, CertError> {
        let der = read_cert_der(path)?.ok_or_else(|| CertError::NoCertificate(path.into()))?;
        Ok(Self::of_der(&der))
    }
}

#[derive(Debug, Clone)]
pub struct CertificateMaterial {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub fingerprint: Fingerprint,
    /// True when cached files were served instead of generating new ones.
    pub reused: bool,
}

/// Issue or reuse certificate material in `dir` for a comma-separated host
/// list, treating any parseable cached material as valid.
pub fn issue(dir: &Path, hosts: &str) -> Result<CertificateMaterial, CertError> {
    issue_with_policy(dir, hosts, ReusePolicy::Always)
}

pub fn issue_with_policy(
    dir: &Path,
    hosts: &str,
    policy: ReusePolicy,
) -> Result<CertificateMaterial, CertError> {
    let sans = parse_hosts(hosts)?;
    let cert_path = dir.join(CERT_FILE);
    let key_path = dir.join(KEY_FILE);

    if let Some(der) = load_cached(&cert_path, &key_path)? {
        if policy == ReusePolicy::Always || matches_hosts(&der, &sans) {
            let fingerprint = Fingerprint::of_der(&der);
            info!(cert = %cert_path.display(), "reusing existing certificate");
            log_fingerprint(&fingerprint);
            return Ok(CertificateMaterial {
                cert_path,
                key_path,
                fingerprint,
                reused: true,
            });
        }
        info!("cached certificate does not match announced hosts or has expired, reissuing");
    }

    let key_pair = KeyPair::generate().map_err(CertError::KeyGen)?;
    let params = certificate_params(&key_pair, sans)?;
    let cert = params.self_signed(&key_pair).map_err(CertError::Sign)?;

    fs::write(&cert_path, cert.pem()).map_err(|source| CertError::Write {
        path: cert_path.clone(),
        source,
    })?;
    let key_pem = Zeroizing::new(key_pair.serialize_pem());
    write_private(&key_path, key_pem.as_bytes()).map_err(|source| CertError::Write {
        path: key_path.clone(),
        source,
    })?;

    let fingerprint = Fingerprint::of_der(cert.der());
    info!(cert = %cert_path.display(), "generated self-signed certificate, send the fingerprint to your clients");
    log_fingerprint(&fingerprint);

    Ok(CertificateMaterial {
        cert_path,
        key_path,
        fingerprint,
        reused: false,
    })
}

/// Split a comma-separated host list into SAN entries. Literal IPs (bare or
/// bracketed) become IP SANs, everything else DNS SANs.
pub fn parse_hosts(hosts: &str) -> Result<Vec<SanType>, CertError> {
    let sans = hosts
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(|h| {
            let bare = h.trim_start_matches('[').trim_end_matches(']');
            match bare.parse::<IpAddr>() {
                Ok(ip) => Ok(SanType::IpAddress(ip)),
                Err(_) => Ia5String::try_from(h)
                    .map(SanType::DnsName)
                    .map_err(|_| CertError::InvalidHost(h.to_owned())),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    if sans.is_empty() {
        return Err(CertError::NoHost);
    }
    Ok(sans)
}

fn certificate_params(
    key_pair: &KeyPair,
    sans: Vec<SanType>,
) -> Result<CertificateParams, CertError> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, ORGANIZATION);
    params.distinguished_name = dn;

    let not_before = OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + Duration::days(VALIDITY_DAYS);

    // Key encipherment only applies to RSA key exchange.
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    if is_rsa(key_pair.algorithm()) {
        params.key_usages.push(KeyUsagePurpose::KeyEncipherment);
    }
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.is_ca = IsCa::ExplicitNoCa;

    let mut serial = [0u8; 16];
    OsRng.try_fill_bytes(&mut serial)?;
    serial[0] &= 0x7f;
    params.serial_number = Some(SerialNumber::from_slice(&serial));

    params.subject_alt_names = sans;
    Ok(params)
}

fn is_rsa(alg: &SignatureAlgorithm) -> bool {
    [
        &rcgen::PKCS_RSA_SHA256,
        &rcgen::PKCS_RSA_SHA384,
        &rcgen::PKCS_RSA_SHA512,
    ]
    .contains(&alg)
}

/// DER of the cached certificate, if both files exist and parse.
fn load_cached(cert_path: &Path, key_path: &Path) -> Result<Option<Vec<u8>>, CertError> {
    if !cert_path.is_file() || !key_path.is_file() {
        return Ok(None);
    }
    let Some(der) = read_cert_der(cert_path)? else {
        warn!(cert = %cert_path.display(), "cached certificate is unreadable, reissuing");
        return Ok(None);
    };
    let key = fs::read(key_path).map_err(|source| CertError::Read {
        path: key_path.into(),
        source,
    })?;
    let key = Zeroizing::new(key);
    match rustls_pemfile::private_key(&mut key.as_slice()) {
        Ok(Some(_)) => Ok(Some(der)),
        _ => {
            warn!(key = %key_path.display(), "cached private key is unreadable, reissuing");
            Ok(None)
        }
    }
}

fn read_cert_der(path: &Path) -> Result<Option<Vec<u8>>, CertError> {
    let pem = fs::read(path).map_err(|source| CertError::Read {
        path: path.into(),
        source,
    })?;
    for item in rustls_pemfile::read_all(&mut pem.as_slice()) {
        if let Ok(Item::X509Certificate(der)) = item {
            return Ok(Some(der.to_vec()));
        }
    }
    Ok(None)
}

fn matches_hosts(der: &[u8], sans: &[SanType]) -> bool {
    let der = CertificateDer::from(der.to_vec());
    let Ok(cached) = CertificateParams::from_ca_cert_der(&der) else {
        return false;
    };
    if cached.not_after <= OffsetDateTime::now_utc() {
        return false;
    }
    let have = &cached.subject_alt_names;
    sans.iter().all(|s| have.contains(s)) && have.iter().all(|s| sans.contains(s))
}

fn write_private(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn log_fingerprint(fp: &Fingerprint) {
    info!(sha1 = %fp.sha1, "certificate fingerprint");
    info!(sha256 = %fp.sha256, "certificate fingerprint");
}

fn colon_hex(digest: &[u8]) -> String {
    let hex = hex::encode_upper(digest);
    let mut out = String::with_capacity(hex.len() + hex.len() / 2);
    for (i, c) in hex.chars().enumerate() {
        if i > 0 && i % 2 == 0 {
            out.push(':');
        }
        out.push(c);
    }
    out
}
