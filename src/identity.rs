//! Signing identity and where its secret lives between sessions.

use std::{
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
};

use secp256k1::{schnorr::Signature, Keypair, Message, Secp256k1};
use tracing::info;

use crate::error::{IdentityError, SigningError};

/// secp256k1 keypair used to author archive events.
///
/// Read-only once created; clone it or share it by reference freely.
#[derive(Clone)]
pub struct Keys {
    keypair: Keypair,
    public_hex: String,
}

impl Keys {
    /// Generate a fresh keypair from the OS random number generator.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::new(&secp, &mut rand::thread_rng());
        Self::from_keypair(keypair)
    }

    /// Rebuild a keypair from a 64-character hex secret.
    pub fn from_secret_hex(secret: &str) -> Result<Self, SigningError> {
        let secp = Secp256k1::new();
        Keypair::from_seckey_str(&secp, secret.trim())
            .map(Self::from_keypair)
            .map_err(|_| SigningError::InvalidSecretKey)
    }

    /// Load the identity held by `store`, generating and saving one if empty.
    pub fn load_or_generate(store: &dyn SecretStore) -> Result<Self, IdentityError> {
        if let Some(secret) = store.load()? {
            return Ok(Self::from_secret_hex(&secret)?);
        }
        let keys = Self::generate();
        store.save(&keys.secret_hex())?;
        info!(pubkey = %keys.public_key_hex(), "generated new identity");
        Ok(keys)
    }

    fn from_keypair(keypair: Keypair) -> Self {
        let public_hex = hex::encode(keypair.x_only_public_key().0.serialize());
        Self {
            keypair,
            public_hex,
        }
    }

    /// x-only public key as lowercase hex, the `pubkey` of authored events.
    pub fn public_key_hex(&self) -> &str {
        &self.public_hex
    }

    /// Secret scalar as lowercase hex.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }

    /// BIP-340 signature over a 32-byte digest.
    pub(crate) fn sign_digest(&self, digest: [u8; 32]) -> Signature {
        let secp = Secp256k1::signing_only();
        secp.sign_schnorr(&Message::from_digest(digest), &self.keypair)
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("public", &self.public_hex)
            .finish_non_exhaustive()
    }
}

/// Backing storage for an identity's secret key.
pub trait SecretStore: Send + Sync {
    /// Return the stored hex secret, if one exists.
    fn load(&self) -> Result<Option<String>, IdentityError>;
    /// Replace the stored secret.
    fn save(&self, secret_hex: &str) -> Result<(), IdentityError>;
}

/// Store that never persists anything, giving a new identity every session.
#[derive(Debug, Default, Clone, Copy)]
pub struct EphemeralStore;

impl SecretStore for EphemeralStore {
    fn load(&self) -> Result<Option<String>, IdentityError> {
        Ok(None)
    }

    fn save(&self, _secret_hex: &str) -> Result<(), IdentityError> {
        Ok(())
    }
}

/// Hex secret kept in a single file readable only by its owner.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretStore for FileSecretStore {
    fn load(&self) -> Result<Option<String>, IdentityError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&self.path)?;
        let secret = data.trim();
        if secret.is_empty() {
            return Ok(None);
        }
        Ok(Some(secret.to_string()))
    }

    fn save(&self, secret_hex: &str) -> Result<(), IdentityError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;
        // Atomic replace via a sibling temp file.
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(secret_hex.as_bytes())?;
        tmp.write_all(b"\n")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
        }
        tmp.persist(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn generated_keys_are_distinct() {
        let a = Keys::generate();
        let b = Keys::generate();
        assert_ne!(a.public_key_hex(), b.public_key_hex());
        assert_eq!(a.public_key_hex().len(), 64);
    }

    #[test]
    fn secret_hex_round_trips() {
        let keys = Keys::generate();
        let again = Keys::from_secret_hex(&keys.secret_hex()).unwrap();
        assert_eq!(keys.public_key_hex(), again.public_key_hex());
    }

    #[test]
    fn malformed_secret_is_rejected() {
        assert_eq!(
            Keys::from_secret_hex("not hex").unwrap_err(),
            SigningError::InvalidSecretKey
        );
        // zero is not a valid scalar
        assert!(Keys::from_secret_hex(&"00".repeat(32)).is_err());
    }

    #[test]
    fn debug_hides_secret() {
        let keys = Keys::from_secret_hex(&"01".repeat(32)).unwrap();
        let dbg = format!("{keys:?}");
        assert!(dbg.contains(keys.public_key_hex()));
        assert!(!dbg.contains(&keys.secret_hex()));
    }

    #[test]
    fn ephemeral_store_generates_each_time() {
        let a = Keys::load_or_generate(&EphemeralStore).unwrap();
        let b = Keys::load_or_generate(&EphemeralStore).unwrap();
        assert_ne!(a.public_key_hex(), b.public_key_hex());
    }

    #[test]
    fn file_store_persists_identity() {
        let dir = TempDir::new().unwrap();
        let store = FileSecretStore::new(dir.path().join("keys/identity.hex"));
        let first = Keys::load_or_generate(&store).unwrap();
        assert!(store.path().exists());
        let second = Keys::load_or_generate(&store).unwrap();
        assert_eq!(first.public_key_hex(), second.public_key_hex());
    }

    #[cfg(unix)]
    #[test]
    fn file_store_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = FileSecretStore::new(dir.path().join("identity.hex"));
        store.save(&"01".repeat(32)).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn file_store_rejects_corrupt_secret() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identity.hex");
        fs::write(&path, "zz").unwrap();
        let err = Keys::load_or_generate(&FileSecretStore::new(&path)).unwrap_err();
        assert!(matches!(
            err,
            IdentityError::Key(SigningError::InvalidSecretKey)
        ));
    }
}
