//! File selection
//!
//! Picks the file of a multi-file torrent that gets streamed and played.

use crate::models::{format_bytes, TorrentFile};

/// What the user asked for on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectRequest {
    /// Nothing specified, pick the largest file
    #[default]
    Auto,
    /// `--select` without an index: list the files and stop
    List,
    /// `--select <index>`
    Index(usize),
}

impl SelectRequest {
    /// From clap's `Option<Option<usize>>` for a flag with an optional value
    pub fn from_flag(flag: Option<Option<usize>>) -> Self {
        match flag {
            None => SelectRequest::Auto,
            Some(None) => SelectRequest::List,
            Some(Some(index)) => SelectRequest::Index(index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Stream this index
    File(usize),
    /// Show this listing and end the session without downloading
    Listing(Vec<String>),
}

/// Index of the largest file; the first one wins ties. None for no files.
pub fn largest_file(files: &[TorrentFile]) -> Option<usize> {
    files
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, u64)>, (i, file)| match best {
            Some((_, length)) if length >= file.length => best,
            _ => Some((i, file.length)),
        })
        .map(|(i, _)| files[i].index)
}

/// Resolve the request against the torrent's files. An explicit index is
/// used verbatim; the swarm reports it if it does not exist.
pub fn select(files: &[TorrentFile], request: SelectRequest) -> Selection {
    match request {
        SelectRequest::Index(index) => Selection::File(index),
        SelectRequest::List => Selection::Listing(listing(files)),
        SelectRequest::Auto => Selection::File(largest_file(files).unwrap_or(0)),
    }
}

/// `index name (size)` lines followed by the re-run hint
pub fn listing(files: &[TorrentFile]) -> Vec<String> {
    let mut lines = vec!["Select a file to download:".to_string()];
    lines.extend(
        files
            .iter()
            .map(|f| format!("{:>2} {} ({})", f.index, f.name, format_bytes(f.length))),
    );
    lines.push(String::new());
    lines.push(
        "To select a specific file, re-run `swarmcast download` with \"--select [index]\""
            .to_string(),
    );
    lines.push("Example: swarmcast download \"magnet:...\" --select 0".to_string());
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn files(lengths: &[u64]) -> Vec<TorrentFile> {
        lengths
            .iter()
            .enumerate()
            .map(|(index, &length)| TorrentFile {
                index,
                name: format!("file{}.mkv", index),
                path: PathBuf::from(format!("file{}.mkv", index)),
                length,
                offset: 0,
            })
            .collect()
    }

    #[test]
    fn test_largest_file_wins() {
        assert_eq!(largest_file(&files(&[10, 300, 20])), Some(1));
        assert_eq!(largest_file(&files(&[1000])), Some(0));
        assert_eq!(largest_file(&[]), None);
    }

    #[test]
    fn test_ties_go_to_lowest_index() {
        assert_eq!(largest_file(&files(&[5, 9, 9, 2, 9])), Some(1));
        assert_eq!(largest_file(&files(&[0, 0, 0])), Some(0));
    }

    #[test]
    fn test_explicit_index_is_verbatim() {
        let f = files(&[10, 20]);
        assert_eq!(select(&f, SelectRequest::Index(0)), Selection::File(0));
        assert_eq!(select(&f, SelectRequest::Index(42)), Selection::File(42));
    }

    #[test]
    fn test_listing_mode() {
        let f = files(&[1500, 20]);
        let Selection::Listing(lines) = select(&f, SelectRequest::List) else {
            panic!("expected a listing");
        };
        assert_eq!(lines[0], "Select a file to download:");
        assert_eq!(lines[1], " 0 file0.mkv (1.5 kB)");
        assert_eq!(lines[2], " 1 file1.mkv (20 B)");
        assert!(lines.last().unwrap().contains("--select 0"));
    }

    #[test]
    fn test_request_from_flag() {
        assert_eq!(SelectRequest::from_flag(None), SelectRequest::Auto);
        assert_eq!(SelectRequest::from_flag(Some(None)), SelectRequest::List);
        assert_eq!(SelectRequest::from_flag(Some(Some(3))), SelectRequest::Index(3));
    }
}
