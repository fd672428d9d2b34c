//! Content fingerprints

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 64 * 1024;

/// BLAKE3 hex digest and byte length of a file's content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
	pub checksum: String,
	pub size: u64,
}

/// Stream `reader` to its end in fixed size chunks
pub async fn compute<R>(reader: &mut R) -> io::Result<Fingerprint>
where
	R: AsyncRead + Unpin + ?Sized,
{
	let mut hasher = blake3::Hasher::new();
	let mut buf = vec![0; CHUNK_SIZE];
	let mut size = 0u64;

	loop {
		let read = reader.read(&mut buf).await?;
		if read == 0 {
			break;
		}
		hasher.update(&buf[..read]);
		size += read as u64;
	}

	Ok(Fingerprint {
		checksum: hasher.finalize().to_hex().to_string(),
		size,
	})
}

pub fn compute_bytes(bytes: &[u8]) -> Fingerprint {
	Fingerprint {
		checksum: blake3::hash(bytes).to_hex().to_string(),
		size: bytes.len() as u64,
	}
}
