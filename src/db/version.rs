//! Database directory identity: the backend marker and the UUID file.

use std::fs;
use std::io::Write;
use std::path::Path;

use rand::RngCore;

use crate::error::{NautexError, Result};

/// Name and content of the backend marker file.
pub const MARKER_FILE: &str = "iamnautex";
const MARKER_BANNER: &[u8] = b"nautex btree backend\n";

/// Name of the 16-byte binary UUID file.
pub const UUID_FILE: &str = "uuid";

/// Write the marker identifying this directory as a nautex database.
pub fn write_marker(dir: &Path) -> Result<()> {
    let mut f = fs::File::create(dir.join(MARKER_FILE))?;
    f.write_all(MARKER_BANNER)?;
    f.sync_all()?;
    Ok(())
}

/// Confirm the directory holds a nautex database.
pub fn check_marker(dir: &Path) -> Result<()> {
    match fs::read(dir.join(MARKER_FILE)) {
        Ok(content) if content == MARKER_BANNER => Ok(()),
        Ok(_) => Err(NautexError::corrupt(format!(
            "{} has an unrecognised backend marker",
            dir.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(NautexError::InvalidArgument(format!(
                "{} is not a nautex database",
                dir.display()
            )))
        }
        Err(e) => Err(e.into()),
    }
}

/// Generate and persist a fresh 16-byte UUID.
pub fn write_fresh_uuid(dir: &Path) -> Result<[u8; 16]> {
    let mut uuid = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut uuid);
    // RFC 4122 version/variant bits, so external tooling can parse it.
    uuid[6] = (uuid[6] & 0x0f) | 0x40;
    uuid[8] = (uuid[8] & 0x3f) | 0x80;
    let mut f = fs::File::create(dir.join(UUID_FILE))?;
    f.write_all(&uuid)?;
    f.sync_all()?;
    Ok(uuid)
}

pub fn read_uuid(dir: &Path) -> Result<[u8; 16]> {
    let bytes = fs::read(dir.join(UUID_FILE))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| NautexError::corrupt("uuid file is not 16 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_marker_roundtrip() {
        let dir = TempDir::new().unwrap();
        assert!(check_marker(dir.path()).is_err());
        write_marker(dir.path()).unwrap();
        check_marker(dir.path()).unwrap();
    }

    #[test]
    fn test_uuid_roundtrip() {
        let dir = TempDir::new().unwrap();
        let uuid = write_fresh_uuid(dir.path()).unwrap();
        assert_eq!(read_uuid(dir.path()).unwrap(), uuid);
        // Version nibble says 4.
        assert_eq!(uuid[6] >> 4, 4);
        // A restamp changes it.
        let other = write_fresh_uuid(dir.path()).unwrap();
        assert_ne!(uuid, other);
    }
}
