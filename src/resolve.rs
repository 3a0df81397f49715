//! Torrent identifier resolution
//!
//! Turns user input into a [`TorrentSource`]:
//! - `magnet:?xt=urn:btih:...` URIs (hex or base32 hashes)
//! - bare 40 character hex info hashes
//! - http(s) URLs of `.torrent` files
//! - anything else is retried as a filesystem path to a `.torrent` file
//!
//! Also builds `.torrent` files from local content (`create`, `seed`) and the
//! JSON report printed by `info`.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_bencode::value::Value;
use sha1::{Digest, Sha1};

use crate::error::InputError;
use crate::models::{InfoHash, TorrentFile, TorrentMetadata};

const DEFAULT_CREATED_BY: &str = concat!("swarmcast/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Sources
// =============================================================================

/// Parsed magnet URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

/// What a swarm client is asked to join
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentSource {
    /// Full metadata from a `.torrent` file
    Metadata(TorrentMetadata),
    /// Info hash only, metadata must come from peers
    Magnet(MagnetLink),
}

impl TorrentSource {
    pub fn info_hash(&self) -> InfoHash {
        match self {
            TorrentSource::Metadata(m) => m.info_hash,
            TorrentSource::Magnet(m) => m.info_hash,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match self {
            TorrentSource::Metadata(m) => Some(m.name.as_str()),
            TorrentSource::Magnet(m) => m.display_name.as_deref(),
        }
    }

    pub fn trackers(&self) -> &[String] {
        match self {
            TorrentSource::Metadata(m) => &m.announce,
            TorrentSource::Magnet(m) => &m.trackers,
        }
    }

    pub fn magnet_uri(&self) -> String {
        magnet_uri(self.info_hash(), self.display_name(), self.trackers())
    }
}

/// Resolve user input, falling back to reading it as a `.torrent` path
pub async fn resolve(identifier: &str) -> Result<TorrentSource, InputError> {
    let identifier = identifier.trim();

    if identifier.starts_with("http://") || identifier.starts_with("https://") {
        let bytes = fetch(identifier).await?;
        return parse_torrent(&bytes)
            .map(TorrentSource::Metadata)
            .map_err(|reason| invalid(identifier, reason));
    }

    let parse_error = match parse_identifier(identifier) {
        Ok(source) => return Ok(source),
        Err(reason) => reason,
    };

    tracing::debug!(identifier, %parse_error, "not a magnet or info hash, trying as a path");
    match tokio::fs::read(identifier).await {
        Ok(bytes) => parse_torrent(&bytes)
            .map(TorrentSource::Metadata)
            .map_err(|reason| invalid(identifier, reason)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(invalid(
            identifier,
            "not a magnet URI, info hash, URL or .torrent file".to_string(),
        )),
        Err(e) => Err(invalid(identifier, e.to_string())),
    }
}

/// Magnet URI or bare info hash
pub fn parse_identifier(identifier: &str) -> Result<TorrentSource, String> {
    if identifier.starts_with("magnet:") {
        return parse_magnet(identifier).map(TorrentSource::Magnet);
    }
    if let Some(info_hash) = parse_hash(identifier) {
        return Ok(TorrentSource::Magnet(MagnetLink {
            info_hash,
            display_name: None,
            trackers: Vec::new(),
        }));
    }
    Err("unrecognized torrent identifier".to_string())
}

fn invalid(identifier: &str, reason: String) -> InputError {
    InputError::InvalidIdentifier {
        identifier: identifier.to_string(),
        reason,
    }
}

async fn fetch(url: &str) -> Result<Vec<u8>, InputError> {
    let fetch_error = |reason: String| InputError::Fetch {
        url: url.to_string(),
        reason,
    };
    let response = reqwest::get(url)
        .await
        .map_err(|e| fetch_error(e.to_string()))?;
    if !response.status().is_success() {
        return Err(fetch_error(format!("HTTP {}", response.status())));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| fetch_error(e.to_string()))?;
    Ok(bytes.to_vec())
}

// =============================================================================
// Magnet URIs
// =============================================================================

pub fn parse_magnet(uri: &str) -> Result<MagnetLink, String> {
    let query = uri
        .strip_prefix("magnet:?")
        .ok_or_else(|| "magnet URI must start with 'magnet:?'".to_string())?;

    let mut info_hash = None;
    let mut display_name = None;
    let mut trackers = Vec::new();

    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = urlencoding::decode(&value.replace('+', " "))
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());
        match key {
            "xt" => {
                if let Some(hash) = value.strip_prefix("urn:btih:") {
                    info_hash = parse_hash(hash);
                    if info_hash.is_none() {
                        return Err(format!("invalid info hash \"{}\"", hash));
                    }
                }
            }
            "dn" => display_name = Some(value),
            "tr" => trackers.push(value),
            _ => {}
        }
    }

    let info_hash = info_hash.ok_or_else(|| "magnet URI has no btih info hash".to_string())?;
    Ok(MagnetLink {
        info_hash,
        display_name,
        trackers,
    })
}

/// 40 hex characters or 32 base32 characters
fn parse_hash(s: &str) -> Option<InfoHash> {
    match s.len() {
        40 => InfoHash::from_hex(s),
        32 => base32_decode(s).map(InfoHash::new),
        _ => None,
    }
}

fn base32_decode(s: &str) -> Option<[u8; 20]> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut out = [0u8; 20];
    let mut buffer: u64 = 0;
    let mut bits = 0;
    let mut written = 0;
    for c in s.bytes() {
        let value = ALPHABET
            .iter()
            .position(|&a| a == c.to_ascii_uppercase())? as u64;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out[written] = (buffer >> bits) as u8;
            written += 1;
        }
    }
    (written == 20).then_some(out)
}

pub fn magnet_uri(info_hash: InfoHash, name: Option<&str>, trackers: &[String]) -> String {
    let mut uri = format!("magnet:?xt=urn:btih:{}", info_hash.to_hex());
    if let Some(name) = name {
        uri.push_str("&dn=");
        uri.push_str(&urlencoding::encode(name));
    }
    for tracker in trackers {
        uri.push_str("&tr=");
        uri.push_str(&urlencoding::encode(tracker));
    }
    uri
}

// =============================================================================
// .torrent Files
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawTorrent {
    info: Value,
    announce: Option<String>,
    #[serde(rename = "announce-list")]
    announce_list: Option<Vec<Vec<String>>>,
    #[serde(rename = "url-list")]
    url_list: Option<Value>,
    comment: Option<String>,
    #[serde(rename = "created by")]
    created_by: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<RawFile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    name: String,
    #[serde(rename = "piece length")]
    piece_length: u64,
    #[serde(with = "serde_bytes")]
    pieces: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    private: Option<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawFile {
    length: u64,
    path: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RawTorrentOut<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    announce: Option<&'a str>,
    #[serde(rename = "announce-list", skip_serializing_if = "Option::is_none")]
    announce_list: Option<Vec<Vec<&'a str>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
    #[serde(rename = "created by")]
    created_by: &'a str,
    #[serde(rename = "creation date")]
    creation_date: i64,
    info: &'a RawInfo,
}

/// Parse bencoded `.torrent` bytes
pub fn parse_torrent(bytes: &[u8]) -> Result<TorrentMetadata, String> {
    let raw: RawTorrent =
        serde_bencode::from_bytes(bytes).map_err(|e| format!("invalid .torrent file: {}", e))?;
    let info_bytes =
        serde_bencode::to_bytes(&raw.info).map_err(|e| format!("invalid info dictionary: {}", e))?;
    let info: RawInfo = serde_bencode::from_bytes(&info_bytes)
        .map_err(|e| format!("invalid info dictionary: {}", e))?;

    let mut announce: Vec<String> = raw
        .announce_list
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .collect();
    if let Some(primary) = raw.announce {
        if !announce.contains(&primary) {
            announce.insert(0, primary);
        }
    }

    let url_list = match raw.url_list {
        Some(Value::Bytes(b)) => vec![String::from_utf8_lossy(&b).into_owned()],
        Some(Value::List(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::Bytes(b) => Some(String::from_utf8_lossy(&b).into_owned()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    build_metadata(
        info,
        sha1_digest(&info_bytes),
        announce,
        url_list,
        raw.comment,
        raw.created_by,
    )
}

fn build_metadata(
    info: RawInfo,
    info_hash: [u8; 20],
    announce: Vec<String>,
    url_list: Vec<String>,
    comment: Option<String>,
    created_by: Option<String>,
) -> Result<TorrentMetadata, String> {
    if info.piece_length == 0 {
        return Err("piece length must be positive".to_string());
    }
    if info.pieces.len() % 20 != 0 {
        return Err("pieces field is not a multiple of 20 bytes".to_string());
    }

    let mut files = Vec::new();
    let mut offset = 0u64;
    match (&info.files, info.length) {
        (Some(entries), _) => {
            for (index, entry) in entries.iter().enumerate() {
                let mut path = PathBuf::from(&info.name);
                for component in &entry.path {
                    path.push(component);
                }
                files.push(TorrentFile {
                    index,
                    name: entry.path.last().cloned().unwrap_or_default(),
                    path,
                    length: entry.length,
                    offset,
                });
                offset += entry.length;
            }
        }
        (None, Some(length)) => {
            files.push(TorrentFile {
                index: 0,
                name: info.name.clone(),
                path: PathBuf::from(&info.name),
                length,
                offset: 0,
            });
            offset = length;
        }
        (None, None) => return Err("info dictionary has neither length nor files".to_string()),
    }

    let pieces = info
        .pieces
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect::<Vec<_>>();

    if pieces.len() as u64 != offset.div_ceil(info.piece_length) {
        return Err("piece count does not match content length".to_string());
    }

    Ok(TorrentMetadata {
        name: info.name,
        info_hash: InfoHash::new(info_hash),
        files,
        piece_length: info.piece_length,
        pieces,
        length: offset,
        announce,
        url_list,
        comment,
        created_by,
        private: info.private == Some(1),
    })
}

fn sha1_digest(bytes: &[u8]) -> [u8; 20] {
    let digest = Sha1::digest(bytes);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

// =============================================================================
// Torrent Creation
// =============================================================================

/// Options for building a torrent from local content
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub announce: Vec<String>,
    pub comment: Option<String>,
    pub private: bool,
    pub piece_length: Option<u64>,
    pub created_by: Option<String>,
}

/// A freshly built torrent
#[derive(Debug, Clone)]
pub struct CreatedTorrent {
    pub metadata: TorrentMetadata,
    /// Bencoded `.torrent` file contents
    pub bytes: Vec<u8>,
}

/// Piece length for content of the given size: the power of two nearest to
/// 1/1024 of the size (1/2048 above 1 GiB), never below 16 KiB
pub fn default_piece_length(total: u64) -> u64 {
    const MIN: u64 = 16 * 1024;
    let target = if total < 1 << 30 {
        total / 1024
    } else {
        total / 2048
    };
    if target == 0 {
        return MIN;
    }
    let exponent = ((target as f64).log2() + 0.5).floor() as u32;
    (1u64 << exponent).max(MIN)
}

/// Hash local content into a torrent. Blocking, run off the async runtime.
pub fn create_torrent(root: &Path, options: &CreateOptions) -> std::io::Result<CreatedTorrent> {
    let root = root.canonicalize()?;
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "torrent".to_string());

    let mut entries: Vec<(PathBuf, Vec<String>, u64)> = Vec::new();
    if root.is_file() {
        let length = root.metadata()?.len();
        entries.push((root.clone(), vec![name.clone()], length));
    } else {
        for entry in walkdir::WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        {
            let entry = entry.map_err(std::io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&root)
                .map_err(std::io::Error::other)?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            entries.push((entry.path().to_path_buf(), relative, entry.metadata()?.len()));
        }
    }
    if entries.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("no files to add in {}", root.display()),
        ));
    }

    let total: u64 = entries.iter().map(|(_, _, len)| len).sum();
    let piece_length = options
        .piece_length
        .unwrap_or_else(|| default_piece_length(total));
    let pieces = hash_pieces(entries.iter().map(|(path, _, _)| path.as_path()), piece_length)?;

    let info = RawInfo {
        files: root.is_dir().then(|| {
            entries
                .iter()
                .map(|(_, path, length)| RawFile {
                    length: *length,
                    path: path.clone(),
                })
                .collect()
        }),
        length: root.is_file().then_some(total),
        name,
        piece_length,
        pieces,
        private: options.private.then_some(1),
    };

    let created_by = options.created_by.as_deref().unwrap_or(DEFAULT_CREATED_BY);
    let creation_date = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let out = RawTorrentOut {
        announce: options.announce.first().map(String::as_str),
        announce_list: (options.announce.len() > 1)
            .then(|| options.announce.iter().map(|a| vec![a.as_str()]).collect()),
        comment: options.comment.as_deref(),
        created_by,
        creation_date,
        info: &info,
    };
    let bytes = serde_bencode::to_bytes(&out).map_err(std::io::Error::other)?;
    let info_bytes = serde_bencode::to_bytes(&info).map_err(std::io::Error::other)?;

    let metadata = build_metadata(
        info,
        sha1_digest(&info_bytes),
        options.announce.clone(),
        Vec::new(),
        options.comment.clone(),
        Some(created_by.to_string()),
    )
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    Ok(CreatedTorrent { metadata, bytes })
}

/// SHA-1 of every piece across the concatenated files
fn hash_pieces<'a>(
    paths: impl Iterator<Item = &'a Path>,
    piece_length: u64,
) -> std::io::Result<Vec<u8>> {
    let mut pieces = Vec::new();
    let mut buffer = Vec::with_capacity(piece_length as usize);
    let mut chunk = vec![0u8; 64 * 1024];

    for path in paths {
        let mut file = File::open(path)?;
        loop {
            let want = chunk.len().min(piece_length as usize - buffer.len());
            let n = file.read(&mut chunk[..want])?;
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
            if buffer.len() as u64 == piece_length {
                pieces.extend_from_slice(&sha1_digest(&buffer));
                buffer.clear();
            }
        }
    }
    if !buffer.is_empty() {
        pieces.extend_from_slice(&sha1_digest(&buffer));
    }
    Ok(pieces)
}

// =============================================================================
// Info Report
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoFile {
    pub path: String,
    pub name: String,
    pub length: u64,
    pub offset: u64,
}

/// Parsed torrent as printed by the `info` command
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoReport {
    pub info_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub announce: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub url_list: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub private: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<InfoFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub piece_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_piece_length: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pieces: Vec<String>,
    #[serde(rename = "magnetURI")]
    pub magnet_uri: String,
}

impl InfoReport {
    pub fn new(source: &TorrentSource) -> Self {
        let magnet_uri = source.magnet_uri();
        match source {
            TorrentSource::Metadata(m) => Self {
                info_hash: m.info_hash.to_hex(),
                name: Some(m.name.clone()),
                announce: m.announce.clone(),
                url_list: m.url_list.clone(),
                comment: m.comment.clone(),
                created_by: m.created_by.clone(),
                private: m.private,
                files: m
                    .files
                    .iter()
                    .map(|f| InfoFile {
                        path: f.path.to_string_lossy().into_owned(),
                        name: f.name.clone(),
                        length: f.length,
                        offset: f.offset,
                    })
                    .collect(),
                length: Some(m.length),
                piece_length: Some(m.piece_length),
                last_piece_length: Some(m.last_piece_length()),
                pieces: m.pieces.iter().map(hex::encode).collect(),
                magnet_uri,
            },
            TorrentSource::Magnet(m) => Self {
                info_hash: m.info_hash.to_hex(),
                name: m.display_name.clone(),
                announce: m.trackers.clone(),
                url_list: Vec::new(),
                comment: None,
                created_by: None,
                private: false,
                files: Vec::new(),
                length: None,
                piece_length: None,
                last_piece_length: None,
                pieces: Vec::new(),
                magnet_uri,
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "c9e15763f722f23e98a29decdfae341b98d53056";

    #[test]
    fn test_parse_magnet_fields() {
        let uri = format!(
            "magnet:?xt=urn:btih:{}&dn=Cosmos+Laundromat&tr=udp%3A%2F%2Fexplodie.org%3A6969",
            HASH
        );
        let magnet = parse_magnet(&uri).unwrap();
        assert_eq!(magnet.info_hash.to_hex(), HASH);
        assert_eq!(magnet.display_name.as_deref(), Some("Cosmos Laundromat"));
        assert_eq!(magnet.trackers, vec!["udp://explodie.org:6969".to_string()]);
    }

    #[test]
    fn test_parse_magnet_base32_hash() {
        // base32 form of 20 zero bytes
        let uri = format!("magnet:?xt=urn:btih:{}", "A".repeat(32));
        let magnet = parse_magnet(&uri).unwrap();
        assert_eq!(magnet.info_hash, InfoHash::new([0; 20]));
    }

    #[test]
    fn test_parse_magnet_without_hash_fails() {
        assert!(parse_magnet("magnet:?dn=nothing").is_err());
        assert!(parse_magnet("magnet:?xt=urn:btih:1234").is_err());
    }

    #[test]
    fn test_bare_info_hash() {
        match parse_identifier(HASH).unwrap() {
            TorrentSource::Magnet(m) => assert_eq!(m.info_hash.to_hex(), HASH),
            other => panic!("expected magnet, got {:?}", other),
        }
        assert!(parse_identifier("not a torrent").is_err());
    }

    #[test]
    fn test_magnet_uri_encodes_name_and_trackers() {
        let hash = InfoHash::from_hex(HASH).unwrap();
        let uri = magnet_uri(hash, Some("a b"), &["udp://t:1".to_string()]);
        assert_eq!(
            uri,
            format!("magnet:?xt=urn:btih:{}&dn=a%20b&tr=udp%3A%2F%2Ft%3A1", HASH)
        );
        assert_eq!(parse_magnet(&uri).unwrap().display_name.as_deref(), Some("a b"));
    }

    #[test]
    fn test_default_piece_length() {
        assert_eq!(default_piece_length(1000), 16 * 1024);
        assert_eq!(default_piece_length(700 * 1024 * 1024), 512 * 1024);
        assert!(default_piece_length(4 << 30).is_power_of_two());
    }

    #[test]
    fn test_create_then_parse_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, vec![7u8; 40_000]).unwrap();

        let created = create_torrent(
            &path,
            &CreateOptions {
                announce: vec!["udp://tracker.example:1337".into()],
                comment: Some("test".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(created.metadata.files.len(), 1);
        assert_eq!(created.metadata.length, 40_000);
        assert_eq!(created.metadata.piece_count(), 3);

        let parsed = parse_torrent(&created.bytes).unwrap();
        assert_eq!(parsed.info_hash, created.metadata.info_hash);
        assert_eq!(parsed.name, "clip.mp4");
        assert_eq!(parsed.announce, vec!["udp://tracker.example:1337".to_string()]);
        assert_eq!(parsed.comment.as_deref(), Some("test"));
        assert_eq!(parsed.pieces, created.metadata.pieces);
    }

    #[test]
    fn test_create_multi_file_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("album");
        std::fs::create_dir_all(root.join("cd1")).unwrap();
        std::fs::write(root.join("cd1/01.flac"), vec![1u8; 1000]).unwrap();
        std::fs::write(root.join("cover.jpg"), vec![2u8; 500]).unwrap();
        std::fs::write(root.join(".DS_Store"), vec![3u8; 10]).unwrap();

        let created = create_torrent(&root, &CreateOptions::default()).unwrap();
        let m = &created.metadata;
        assert_eq!(m.name, "album");
        assert_eq!(m.files.len(), 2);
        assert_eq!(m.files[0].path, PathBuf::from("album/cd1/01.flac"));
        assert_eq!(m.files[1].name, "cover.jpg");
        assert_eq!(m.files[1].offset, 1000);
        assert_eq!(m.length, 1500);

        let parsed = parse_torrent(&created.bytes).unwrap();
        assert_eq!(parsed.info_hash, m.info_hash);
        assert_eq!(parsed.files, m.files);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_torrent(b"not bencode").is_err());
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_path() {
        let dir = tempfile::tempdir().unwrap();
        let content = dir.path().join("movie.mkv");
        std::fs::write(&content, vec![9u8; 1000]).unwrap();
        let created = create_torrent(&content, &CreateOptions::default()).unwrap();
        let torrent_path = dir.path().join("movie.torrent");
        std::fs::write(&torrent_path, &created.bytes).unwrap();

        let source = resolve(torrent_path.to_str().unwrap()).await.unwrap();
        assert_eq!(source.info_hash(), created.metadata.info_hash);
    }

    #[tokio::test]
    async fn test_resolve_unknown_input_is_input_error() {
        let err = resolve("/definitely/not/here.torrent").await.unwrap_err();
        assert!(matches!(err, InputError::InvalidIdentifier { .. }));
    }

    #[test]
    fn test_info_report_for_magnet() {
        let source = parse_identifier(HASH).unwrap();
        let report = InfoReport::new(&source);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["infoHash"], HASH);
        assert_eq!(json["magnetURI"], format!("magnet:?xt=urn:btih:{}", HASH));
        assert!(json.get("files").is_none());
    }
}
