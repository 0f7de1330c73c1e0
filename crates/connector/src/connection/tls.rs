/// What a TLS layer negotiated for a connection.
///
/// The connector does not run handshakes itself, a TLS front end attaches this to the
/// connection so handlers can inspect the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    cipher_suite: String,
    /// DER encoded chain, `None` when the peer was not verified.
    peer_certificates: Option<Vec<Vec<u8>>>,
}

impl TlsInfo {
    pub fn new(cipher_suite: impl Into<String>, peer_certificates: Option<Vec<Vec<u8>>>) -> Self {
        Self { cipher_suite: cipher_suite.into(), peer_certificates }
    }

    pub fn cipher_suite(&self) -> &str {
        &self.cipher_suite
    }

    pub fn peer_certificates(&self) -> Option<&[Vec<u8>]> {
        self.peer_certificates.as_deref()
    }

    /// Symmetric key size in bits, derived from the cipher suite name.
    pub fn key_size(&self) -> Option<u32> {
        key_size(&self.cipher_suite)
    }
}

fn key_size(cipher_suite: &str) -> Option<u32> {
    const SIZES: [(&str, u32); 7] = [
        ("AES_256", 256),
        ("AES_128", 128),
        ("CHACHA20", 256),
        ("3DES", 168),
        ("RC4_128", 128),
        ("RC4_40", 40),
        ("DES", 56),
    ];

    let name = cipher_suite.to_ascii_uppercase();
    SIZES.iter().find(|(marker, _)| name.contains(marker)).map(|(_, size)| *size)
}
